use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Kind of external service a credential authenticates against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Database,
    #[serde(rename = "openai")]
    OpenAi,
    Smtp,
    CustomApi,
    GoogleSheets,
    SerpApi,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::OpenAi => "openai",
            Self::Smtp => "smtp",
            Self::CustomApi => "custom_api",
            Self::GoogleSheets => "google_sheets",
            Self::SerpApi => "serp_api",
        }
    }
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored credential. `config` holds the serialized type-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub id: String,
    pub agent_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    pub config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        credential_type: CredentialType,
        payload: &impl Serialize,
    ) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            name: id.clone(),
            id,
            agent_id: agent_id.into(),
            credential_type,
            config: serde_json::to_string(payload)?,
            created_at: None,
            updated_at: None,
        })
    }

    /// Decode the payload, checking it is of the expected type.
    pub fn decode<T: CredentialPayload>(&self) -> Result<T> {
        if self.credential_type != T::TYPE {
            return Err(FlowError::Configuration(format!(
                "credential '{}' is of type {}, expected {}",
                self.id,
                self.credential_type,
                T::TYPE
            )));
        }
        serde_json::from_str(&self.config).map_err(|e| {
            FlowError::Configuration(format!("invalid {} credential '{}': {}", T::TYPE, self.id, e))
        })
    }
}

/// A typed credential payload.
pub trait CredentialPayload: DeserializeOwned {
    const TYPE: CredentialType;
}

/// Relational database connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseCredential {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    /// Database name; the SQLite connector treats it as a file path.
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssl_mode: String,
}

impl CredentialPayload for DatabaseCredential {
    const TYPE: CredentialType = CredentialType::Database;
}

/// AI provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiCredential {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Proxy or compatible endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl CredentialPayload for OpenAiCredential {
    const TYPE: CredentialType = CredentialType::OpenAi;
}

/// Outbound mail server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpCredential {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub use_tls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

impl CredentialPayload for SmtpCredential {
    const TYPE: CredentialType = CredentialType::Smtp;
}

/// How a custom API authenticates requests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Bearer,
    ApiKey,
}

/// Settings for an arbitrary HTTP API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomApiCredential {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth_value: String,
}

impl CredentialPayload for CustomApiCredential {
    const TYPE: CredentialType = CredentialType::CustomApi;
}
