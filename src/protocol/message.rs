//! FBP protocol message envelope and payload shapes.

use serde_json::{Value, json};

use crate::foundation::error::{PixflowError, PixflowResult};

/// One protocol message: `{protocol, command, payload}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub protocol: String,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(protocol: impl Into<String>, command: impl Into<String>, payload: Value) -> Self {
        Self {
            protocol: protocol.into(),
            command: command.into(),
            payload,
        }
    }

    /// Parse a message from JSON text.
    pub fn from_json(text: &str) -> PixflowResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| PixflowError::serde(format!("invalid protocol message: {e}")))
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> PixflowResult<String> {
        serde_json::to_string(self).map_err(|e| PixflowError::serde(e.to_string()))
    }

    /// An error response on the given protocol.
    pub fn error(protocol: &str, message: impl std::fmt::Display) -> Self {
        Self::new(protocol, "error", json!({ "message": message.to_string() }))
    }

    /// Deserialize the payload into a typed shape.
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> PixflowResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| PixflowError::serde(format!("invalid payload: {e}")))
    }
}

/// `{node, port}` reference used by edge and IIP payloads.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EndpointRef {
    pub node: String,
    pub port: String,
}

/// Payload of `graph clear`: creates (or replaces) a graph.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct ClearPayload {
    pub id: String,
}

/// Payload of `graph addnode` / `removenode`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct NodePayload {
    pub graph: String,
    pub id: String,
    #[serde(default)]
    pub component: String,
}

/// Payload of `graph addedge` / `removeedge`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct EdgePayload {
    pub graph: String,
    pub src: EndpointRef,
    pub tgt: EndpointRef,
}

/// `src` half of an `addinitial` payload: the literal itself.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct InitialSource {
    pub data: Value,
}

/// Payload of `graph addinitial`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct AddInitialPayload {
    pub graph: String,
    pub src: InitialSource,
    pub tgt: EndpointRef,
}

/// Payload of `graph removeinitial`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct RemoveInitialPayload {
    pub graph: String,
    pub tgt: EndpointRef,
}

/// Payload of `network start` / `stop` / `getstatus` / `debug`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct NetworkPayload {
    pub graph: String,
}

/// Payload of `component source`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct SourcePayload {
    pub name: String,
    pub code: String,
}

/// Payload of `component getsource`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct GetSourcePayload {
    pub name: String,
}
