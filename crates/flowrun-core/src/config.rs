use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::flow::TRIGGER_PREFIX;

/// Top-level flowrun configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// What the traversal does when a fanned-out branch fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Abort the whole run on the first node failure.
    #[default]
    AbortAll,
    /// Abandon the failing branch, record the failure, keep running siblings.
    ContinueSiblings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fan_out: FanOutPolicy,
    /// Timeout for HTTP request nodes that don't set their own.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Upper bound on a single Delay node. Values above
    /// [`MAX_DELAY_SECS`] are ignored.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Node types starting with this prefix are entry points.
    #[serde(default = "default_trigger_prefix")]
    pub trigger_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fan_out: FanOutPolicy::default(),
            http_timeout_secs: default_http_timeout(),
            max_delay_secs: default_max_delay(),
            trigger_prefix: default_trigger_prefix(),
        }
    }
}

impl EngineConfig {
    /// Delay cap; configuration can shorten it but never extend it.
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs.min(MAX_DELAY_SECS))
    }
}

/// Hard cap on a single Delay node.
pub const MAX_DELAY_SECS: u64 = 300;

fn default_http_timeout() -> u64 { 30 }
fn default_max_delay() -> u64 { MAX_DELAY_SECS }
fn default_trigger_prefix() -> String { TRIGGER_PREFIX.to_string() }

/// Defaults for AI agent nodes. Flows don't inherit per-agent chat settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Endpoint used when a credential doesn't name one.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            default_model: default_model(),
            default_system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            base_url: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_system_prompt() -> String {
    "You are a helpful assistant. Respond concisely and helpfully to user messages.".to_string()
}
fn default_max_tokens() -> u32 { 500 }
fn default_temperature() -> f32 { 0.7 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.flowrun/flows.db".to_string() }

/// Per-call model settings handed to an `LlmClient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_headers: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowError::Configuration(e.to_string()))
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the store path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        let p = &self.store.path;
        if let Some(rest) = p.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(p)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
