use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A variable scope or node output: name → dynamically typed value.
pub type Variables = HashMap<String, serde_json::Value>;

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message sent to the completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Whether a statement yields rows or only an affected-row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Execute,
}

/// A parameterised SQL statement. Placeholders are `?1`, `?2`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub kind: StatementKind,
}

impl SqlStatement {
    pub fn query(sql: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            kind: StatementKind::Query,
        }
    }

    pub fn execute(sql: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            kind: StatementKind::Execute,
        }
    }
}

/// Result of running a `SqlStatement`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    Rows(Vec<serde_json::Map<String, serde_json::Value>>),
    Affected(u64),
}

/// A message prepared by a SendMessage node, for the caller to deliver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub node_id: String,
    pub text: String,
    #[serde(default)]
    pub reply_to_trigger: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<String>,
}

/// Lifecycle event published while a flow runs.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// Run started at the given entry node.
    RunStarted { flow_id: String, entry_node: String },
    /// A node is about to be dispatched.
    NodeStarted { node_id: String, node_type: String },
    /// A node's handler returned.
    NodeCompleted { node_id: String, elapsed_ms: u64 },
    /// A node's handler failed.
    NodeFailed { node_id: String, error: String },
    /// Run completed.
    RunCompleted { flow_id: String, steps: usize, elapsed_ms: u64 },
    /// Run aborted.
    RunFailed { flow_id: String, error: String },
}
