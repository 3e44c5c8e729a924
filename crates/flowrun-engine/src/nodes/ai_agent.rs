use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use flowrun_core::config::ModelConfig;
use flowrun_core::credential::OpenAiCredential;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::node_config::AiAgentConfig;
use flowrun_core::traits::LlmClient;
use flowrun_core::types::{ChatMessage, StreamDelta, Variables};

use super::{cancellable, NodeServices};
use crate::context::ExecutionContext;

/// Ask the completion provider to answer the current `message` (or `text`).
pub async fn run(
    cfg: &AiAgentConfig,
    ctx: &ExecutionContext<'_>,
    services: &NodeServices,
) -> Result<Variables> {
    let defaults = &services.config.llm;

    let mut model = ModelConfig::new(cfg.model().unwrap_or(&defaults.default_model));
    model.provider = defaults.provider.clone();
    model.max_tokens = defaults.max_tokens;
    model.temperature = defaults.temperature;
    model.base_url = defaults.base_url.clone();
    model.api_key = Some(resolve_key(cfg, services, &mut model).await?);

    let user_message = ctx
        .text_var("message")
        .or_else(|| ctx.text_var("text"))
        .ok_or_else(|| FlowError::Configuration("no message to process".into()))?
        .to_string();

    let system_prompt =
        ctx.interpolate(cfg.system_prompt().unwrap_or(&defaults.default_system_prompt));

    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_message),
    ];
    let reply = cancellable(&ctx.cancel, complete(services.llm.as_ref(), &model, messages)).await?;
    let reply = Value::String(reply.trim().to_string());

    Ok([
        ("response".to_string(), reply.clone()),
        ("ai_response".to_string(), reply.clone()),
        ("message".to_string(), reply),
    ]
    .into_iter()
    .collect())
}

/// Key from the referenced credential, else the inline key.
async fn resolve_key(
    cfg: &AiAgentConfig,
    services: &NodeServices,
    model: &mut ModelConfig,
) -> Result<String> {
    if let Some(id) = cfg.credential_id() {
        match services.credentials.resolve::<OpenAiCredential>(id).await {
            Ok(cred) if !cred.api_key.is_empty() => {
                if let Some(url) = cred.base_url.filter(|u| !u.is_empty()) {
                    model.base_url = Some(url);
                }
                if let Some(org) = cred.organization.filter(|o| !o.is_empty()) {
                    model
                        .extra_headers
                        .insert("OpenAI-Organization".to_string(), org);
                }
                return Ok(cred.api_key);
            }
            Ok(_) => warn!(credential_id = %id, "AI credential has an empty api_key"),
            Err(e) => warn!(credential_id = %id, error = %e, "AI credential unavailable"),
        }
    }

    cfg.inline_key()
        .map(String::from)
        .ok_or_else(|| FlowError::Configuration("AI agent requires API key".into()))
}

async fn complete(
    llm: &dyn LlmClient,
    model: &ModelConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let mut stream = llm.chat_stream(model, messages).await?;
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
            StreamDelta::Usage {
                input_tokens,
                output_tokens,
            } => debug!(input_tokens, output_tokens, model = %model.model_id, "Completion usage"),
            StreamDelta::Stop(_) => {}
        }
    }
    Ok(text)
}
