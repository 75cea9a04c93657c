/// Convenience result type used across Pixflow.
pub type PixflowResult<T> = Result<T, PixflowError>;

/// Top-level error taxonomy used by engine APIs.
///
/// All graph/network mutation errors are local and recoverable: the failing
/// call leaves state unchanged and the protocol layer surfaces the failure to
/// the client. [`PixflowError::RenderFailed`] degrades to "no image
/// available" for that request only.
#[derive(thiserror::Error, Debug)]
pub enum PixflowError {
    /// An id was already taken within its namespace (node id within a graph).
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// A referenced node, graph or binding does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A component name did not resolve against the component library.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// A named port does not exist on the resolved component descriptor.
    #[error("unknown port: {0}")]
    UnknownPort(String),

    /// Adding the edge would make the node-level dependency graph cyclic.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// The node has no valid computed output for this render request.
    #[error("render failed: {0}")]
    RenderFailed(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PixflowError {
    /// Build a [`PixflowError::DuplicateId`] value.
    pub fn duplicate_id(msg: impl Into<String>) -> Self {
        Self::DuplicateId(msg.into())
    }

    /// Build a [`PixflowError::NotFound`] value.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Build a [`PixflowError::UnknownComponent`] value.
    pub fn unknown_component(msg: impl Into<String>) -> Self {
        Self::UnknownComponent(msg.into())
    }

    /// Build a [`PixflowError::UnknownPort`] value.
    pub fn unknown_port(msg: impl Into<String>) -> Self {
        Self::UnknownPort(msg.into())
    }

    /// Build a [`PixflowError::CycleDetected`] value.
    pub fn cycle_detected(msg: impl Into<String>) -> Self {
        Self::CycleDetected(msg.into())
    }

    /// Build a [`PixflowError::RenderFailed`] value.
    pub fn render_failed(msg: impl Into<String>) -> Self {
        Self::RenderFailed(msg.into())
    }

    /// Build a [`PixflowError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}
