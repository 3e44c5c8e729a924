//! Typed per-kind node configuration.
//!
//! On the wire a node's configuration is a free-form `data` object. Each kind
//! is parsed here into a struct with explicit fields and defaults, and checked
//! for required fields. The same parse runs when a flow is saved and right
//! before a node is dispatched.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};
use crate::flow::*;

/// Parsed configuration of one node.
#[derive(Debug, Clone)]
pub enum NodeConfig {
    Trigger,
    AiAgent(AiAgentConfig),
    HttpRequest(HttpRequestConfig),
    Database(DatabaseConfig),
    Condition(ConditionConfig),
    Delay(DelayConfig),
    SendMessage(SendMessageConfig),
    SetVariable(SetVariableConfig),
    /// A type tag with no handler.
    Unknown(String),
}

impl NodeConfig {
    /// Parse a node's `data` bag according to its type tag.
    pub fn parse(node: &Node, trigger_prefix: &str) -> Result<Self> {
        if node.is_trigger(trigger_prefix) {
            return Ok(Self::Trigger);
        }
        match node.node_type.as_str() {
            NODE_AI_AGENT => decode(node).map(Self::AiAgent),
            NODE_HTTP_REQUEST => decode(node).map(Self::HttpRequest),
            NODE_DATABASE => decode(node).map(Self::Database),
            NODE_CONDITION => decode(node).map(Self::Condition),
            NODE_DELAY => decode(node).map(Self::Delay),
            NODE_SEND_MESSAGE => decode(node).map(Self::SendMessage),
            NODE_SET_VARIABLE => decode(node).map(Self::SetVariable),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// Required-field checks run after deserialization.
trait Validate {
    fn validate(&self) -> std::result::Result<(), String>;
}

fn decode<T: DeserializeOwned + Validate>(node: &Node) -> Result<T> {
    let config: T = serde_json::from_value(Value::Object(node.data.clone())).map_err(|e| {
        FlowError::Configuration(format!("{} node '{}': {}", node.node_type, node.id, e))
    })?;
    config.validate().map_err(|msg| {
        FlowError::Configuration(format!("{} node '{}': {}", node.node_type, node.id, msg))
    })?;
    Ok(config)
}

/// Treat empty strings like absent values.
fn present(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ── AI agent ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiAgentConfig {
    /// `openai` credential holding the API key.
    #[serde(default)]
    pub credential_id: Option<String>,
    /// Inline key, used when no credential resolves.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AiAgentConfig {
    pub fn credential_id(&self) -> Option<&str> {
        present(&self.credential_id)
    }

    pub fn inline_key(&self) -> Option<&str> {
        present(&self.api_key)
    }

    pub fn model(&self) -> Option<&str> {
        present(&self.model)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        present(&self.system_prompt)
    }
}

impl Validate for AiAgentConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.credential_id().is_none() && self.inline_key().is_none() {
            return Err("AI agent requires API key (credential_id or api_key)".into());
        }
        Ok(())
    }
}

// ── HTTP request ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Header values that aren't strings are ignored.
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub query_params: Map<String, Value>,
    /// A string body is interpolated; any other JSON is sent serialized.
    #[serde(default)]
    pub body: Option<Value>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Optional `custom_api` credential.
    #[serde(default)]
    pub credential_id: Option<String>,
}

impl HttpRequestConfig {
    /// Upper-cased method, `GET` when unset.
    pub fn method(&self) -> String {
        present(&self.method)
            .map(|m| m.to_uppercase())
            .unwrap_or_else(|| "GET".to_string())
    }

    pub fn url(&self) -> Option<&str> {
        present(&self.url)
    }

    pub fn credential_id(&self) -> Option<&str> {
        present(&self.credential_id)
    }

    /// Node timeout, or `default` when unset, non-positive or unrepresentable.
    pub fn timeout(&self, default: Duration) -> Duration {
        match self.timeout {
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).unwrap_or(default),
            _ => default,
        }
    }
}

/// Longest per-request timeout a node may ask for.
pub const MAX_HTTP_TIMEOUT_SECS: f64 = 86_400.0;

impl Validate for HttpRequestConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.url().is_none() {
            return Err("URL is required for HTTP request".into());
        }
        let method = self.method();
        if !method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("invalid HTTP method '{}'", method));
        }
        if let Some(secs) = self.timeout {
            if !secs.is_finite() || secs > MAX_HTTP_TIMEOUT_SECS {
                return Err(format!(
                    "timeout must be at most {} seconds",
                    MAX_HTTP_TIMEOUT_SECS
                ));
            }
        }
        Ok(())
    }
}

// ── Database ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseOperation {
    Raw,
    Select,
    Insert,
    Update,
    Delete,
}

/// Comparison used in a structured `where` predicate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SqlOperator {
    #[default]
    #[serde(alias = "=")]
    Eq,
    #[serde(alias = "!=", alias = "<>")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<=")]
    Lte,
    Like,
    IsNull,
    IsNotNull,
}

impl SqlOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Whether the operator binds a value.
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

/// One `column <op> value` predicate. Predicates are AND-ed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WherePredicate {
    pub column: String,
    #[serde(default)]
    pub operator: SqlOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub credential_id: Option<String>,
    pub operation: DatabaseOperation,
    #[serde(default)]
    pub table: Option<String>,
    /// `raw` only: SQL where each `{{path}}` becomes a bound parameter.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, rename = "where", deserialize_with = "where_predicates")]
    pub where_clause: Vec<WherePredicate>,
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Structured predicates. `null` and blank strings mean no predicates; any
/// other string is refused since free-form SQL is only allowed in `raw`.
fn where_predicates<'de, D>(deserializer: D) -> std::result::Result<Vec<WherePredicate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(_) => Err(D::Error::custom(
            "where must be a list of predicates; use the raw operation for SQL text",
        )),
        other => serde_json::from_value(other).map_err(D::Error::custom),
    }
}

impl DatabaseConfig {
    pub fn credential_id(&self) -> Option<&str> {
        present(&self.credential_id)
    }

    pub fn table(&self) -> Option<&str> {
        present(&self.table)
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.credential_id().is_none() {
            return Err("database credential is required".into());
        }
        if self.operation == DatabaseOperation::Raw {
            if present(&self.query).is_none() {
                return Err("query required for raw operation".into());
            }
            return Ok(());
        }

        let table = self.table().ok_or("table required")?;
        check_identifier(table)?;
        for col in &self.columns {
            check_identifier(col)?;
        }
        for col in self.values.keys() {
            check_identifier(col)?;
        }
        for pred in &self.where_clause {
            check_identifier(&pred.column)?;
        }

        match self.operation {
            DatabaseOperation::Insert if self.values.is_empty() => {
                Err("values required for insert".into())
            }
            DatabaseOperation::Update if self.values.is_empty() => {
                Err("values required for update".into())
            }
            DatabaseOperation::Update | DatabaseOperation::Delete
                if self.where_clause.is_empty() =>
            {
                Err("where clause required for update and delete".into())
            }
            _ => Ok(()),
        }
    }
}

/// Accept `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(ident: &str) -> bool {
    let parts: Vec<&str> = ident.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn check_identifier(ident: &str) -> std::result::Result<(), String> {
    if is_valid_identifier(ident) {
        Ok(())
    } else {
        Err(format!("invalid identifier '{}'", ident))
    }
}

// ── Condition ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    #[serde(alias = "equals", alias = "==")]
    Eq,
    #[serde(alias = "not_equals", alias = "!=")]
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<=")]
    Lte,
    Empty,
    NotEmpty,
    /// Evaluates to false.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    /// Dot-path into the variable scope.
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    Or,
    /// Anything but `or` combines with AND.
    #[default]
    #[serde(other)]
    And,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(default)]
    pub conditions: Vec<ConditionRule>,
    #[serde(default)]
    pub combine_with: Combinator,
}

impl Validate for ConditionConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        match self.conditions.iter().find(|c| c.field.trim().is_empty()) {
            Some(_) => Err("condition field must not be empty".into()),
            None => Ok(()),
        }
    }
}

// ── Delay ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    /// Unrecognised units count as seconds.
    #[default]
    #[serde(other)]
    Seconds,
}

impl DelayUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3600.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub unit: DelayUnit,
}

impl DelayConfig {
    /// Wait time capped at `max`. Zero for non-positive durations.
    pub fn wait(&self, max: Duration) -> Duration {
        let secs = self.duration * self.unit.seconds();
        if !(secs > 0.0) {
            return Duration::ZERO;
        }
        if secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Validate for DelayConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.duration.is_nan() {
            return Err("duration must be a number".into());
        }
        Ok(())
    }
}

// ── Send message ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageConfig {
    /// Template; may contain `{{variables}}`.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reply_to_trigger: bool,
    /// Target integration when not replying to the trigger.
    #[serde(default)]
    pub integration_id: Option<String>,
}

impl Validate for SendMessageConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

// ── Set variable ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetVariableConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl Validate for SetVariableConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}
