//! Structural serialization of a [`Graph`].
//!
//! The document preserves node ids, component names, edges and IIPs; the
//! round-trip is lossless for all of those. Visual metadata from editors is
//! not part of the model and is dropped on load.

use serde_json::Value;

use crate::foundation::error::{PixflowError, PixflowResult};
use crate::graph::model::{Endpoint, Graph};
use crate::library::components::ComponentLibrary;

/// One node record: `{id, component}`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub component: String,
}

/// One edge record: `{src: {node, port}, dst: {node, port}}`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EdgeRecord {
    pub src: Endpoint,
    pub dst: Endpoint,
}

/// One IIP record: `{dst: {node, port}, value}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IipRecord {
    pub dst: Endpoint,
    pub value: Value,
}

/// Serialized form of a graph.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphDocument {
    pub id: String,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
    #[serde(default)]
    pub iips: Vec<IipRecord>,
}

impl GraphDocument {
    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> PixflowResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| PixflowError::serde(format!("invalid graph document: {e}")))
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> PixflowResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PixflowError::serde(e.to_string()))
    }
}

impl Graph {
    /// Structural snapshot of this graph.
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            id: self.id().to_owned(),
            nodes: self
                .nodes()
                .iter()
                .map(|(id, spec)| NodeRecord {
                    id: id.clone(),
                    component: spec.component.clone(),
                })
                .collect(),
            edges: self
                .edges()
                .iter()
                .map(|e| EdgeRecord {
                    src: e.src.clone(),
                    dst: e.dst.clone(),
                })
                .collect(),
            iips: self
                .iips()
                .iter()
                .map(|iip| IipRecord {
                    dst: iip.dst.clone(),
                    value: iip.value.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a graph from a document through the ordinary mutation API, so
    /// every record is validated the same way live edits are.
    pub fn from_document(library: &ComponentLibrary, doc: &GraphDocument) -> PixflowResult<Self> {
        let mut graph = Graph::new(doc.id.clone());
        for node in &doc.nodes {
            graph.add_node(library, node.id.clone(), node.component.clone())?;
        }
        for edge in &doc.edges {
            graph.add_edge(
                library,
                &edge.src.node,
                &edge.src.port,
                &edge.dst.node,
                &edge.dst.port,
            )?;
        }
        for iip in &doc.iips {
            graph.add_iip(library, &iip.dst.node, &iip.dst.port, iip.value.clone())?;
        }
        Ok(graph)
    }
}
