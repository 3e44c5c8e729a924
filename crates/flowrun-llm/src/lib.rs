pub mod providers;
pub mod streaming;

use flowrun_core::config::LlmConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;

/// Create an LLM client for the configured provider.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" | "openai_compatible" => Ok(Box::new(OpenAiClient::new())),
        other => Err(FlowError::Configuration(format!(
            "unsupported LLM provider '{}'",
            other
        ))),
    }
}
