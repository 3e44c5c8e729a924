//! Flow graph model.
//!
//! A flow is an ordered list of `Node`s connected by `Edge`s, plus a set of
//! declared `Variable`s that seed the variable scope of every run. Nodes carry
//! a schema-less `data` bag on the wire; `crate::node_config::NodeConfig`
//! parses it into a typed per-kind configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix shared by every trigger node type.
pub const TRIGGER_PREFIX: &str = "trigger_";

pub const NODE_TRIGGER_WHATSAPP: &str = "trigger_whatsapp";
pub const NODE_TRIGGER_TELEGRAM: &str = "trigger_telegram";
pub const NODE_TRIGGER_INSTAGRAM: &str = "trigger_instagram";
pub const NODE_TRIGGER_WEBHOOK: &str = "trigger_webhook";
pub const NODE_TRIGGER_SCHEDULE: &str = "trigger_schedule";
pub const NODE_AI_AGENT: &str = "ai_agent";
pub const NODE_HTTP_REQUEST: &str = "http_request";
pub const NODE_DATABASE: &str = "database";
pub const NODE_CONDITION: &str = "condition";
pub const NODE_DELAY: &str = "delay";
pub const NODE_SEND_MESSAGE: &str = "send_message";
pub const NODE_SET_VARIABLE: &str = "set_variable";

/// Output key a branching node uses to select its outgoing edges.
pub const HANDLE_KEY: &str = "_handle";

/// A saved automation graph belonging to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub agent_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            agent_id: String::new(),
            name: name.into(),
            description: String::new(),
            is_active: true,
            nodes: vec![],
            edges: vec![],
            variables: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// First node (in node order) whose type starts with `prefix`.
    pub fn find_trigger(&self, prefix: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_trigger(prefix))
    }

    /// Edges leaving `node_id`, in edge order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}

/// One step in a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            node_type: node_type.into(),
            position: Position::default(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// Set one configuration key.
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn is_trigger(&self, prefix: &str) -> bool {
        self.node_type.starts_with(prefix)
    }

    /// Label if set, otherwise the id.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

/// Editor canvas coordinates. Display-only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Create an unqualified edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            source_handle: None,
            target_handle: None,
            label: None,
        }
    }

    /// Create an edge leaving a named output handle of `source`.
    pub fn from_handle(
        source: impl Into<String>,
        handle: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let mut edge = Self::new(source, target);
        edge.source_handle = Some(handle.into());
        edge
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Declared type of a flow variable. Informational only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// A flow-level variable seeding the scope of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, rename = "type")]
    pub var_type: VariableType,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        let var_type = match &value {
            serde_json::Value::Number(_) => VariableType::Number,
            serde_json::Value::Bool(_) => VariableType::Boolean,
            serde_json::Value::Object(_) => VariableType::Object,
            serde_json::Value::Array(_) => VariableType::Array,
            _ => VariableType::String,
        };
        Self {
            name: name.into(),
            value,
            var_type,
        }
    }
}
