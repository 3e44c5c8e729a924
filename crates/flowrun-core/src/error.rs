use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Flow validation failed: {0}")]
    Validation(String),

    // Lookup errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    // Graph errors
    #[error("No trigger node found")]
    NoTriggerFound,

    #[error("Cycle detected at node: {0}")]
    CycleDetected(String),

    // External call errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Run cancelled")]
    Cancelled,

    /// A handler failure, wrapped with the node that produced it.
    #[error("Node {label} failed: {source}")]
    NodeFailed {
        node_id: String,
        label: String,
        #[source]
        source: Box<FlowError>,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error category callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    ExternalCall,
    Cancellation,
    NoTriggerFound,
    Cycle,
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::ConfigNotFound(_)
            | Self::Validation(_)
            | Self::Json(_) => ErrorKind::Configuration,
            Self::NodeNotFound(_) | Self::CredentialNotFound(_) | Self::FlowNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::NoTriggerFound => ErrorKind::NoTriggerFound,
            Self::CycleDetected(_) => ErrorKind::Cycle,
            Self::LlmRequest(_)
            | Self::LlmStream(_)
            | Self::Http(_)
            | Self::Database(_)
            | Self::Io(_) => ErrorKind::ExternalCall,
            Self::Cancelled => ErrorKind::Cancellation,
            Self::NodeFailed { source, .. } => source.kind(),
        }
    }

    /// Wrap a handler error with the node's identity.
    pub fn in_node(self, node_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::NodeFailed {
            node_id: node_id.into(),
            label: label.into(),
            source: Box::new(self),
        }
    }

    /// The id of the node that failed, if this error came from a handler.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
