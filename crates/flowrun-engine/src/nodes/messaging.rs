//! SendMessage and SetVariable: the two handlers that only touch run state.

use serde_json::Value;
use tracing::debug;

use flowrun_core::node_config::{SendMessageConfig, SetVariableConfig};
use flowrun_core::types::{OutboundMessage, Variables};

use crate::context::ExecutionContext;

/// Render the message and queue it for the caller to deliver. Nothing is
/// sent from here.
pub fn send_message(
    cfg: &SendMessageConfig,
    node_id: &str,
    ctx: &mut ExecutionContext<'_>,
) -> Variables {
    let text = ctx.interpolate(&cfg.message);
    debug!(node_id, chars = text.len(), reply_to_trigger = cfg.reply_to_trigger, "Message prepared");

    ctx.outbound.push(OutboundMessage {
        node_id: node_id.to_string(),
        text: text.clone(),
        reply_to_trigger: cfg.reply_to_trigger,
        integration_id: cfg.integration_id.clone().filter(|id| !id.is_empty()),
    });

    [
        ("message".to_string(), Value::String(text.clone())),
        ("response".to_string(), Value::String(text)),
        ("reply_to_trigger".to_string(), Value::Bool(cfg.reply_to_trigger)),
    ]
    .into_iter()
    .collect()
}

pub fn set_variable(cfg: &SetVariableConfig, ctx: &mut ExecutionContext<'_>) -> Variables {
    if cfg.name.is_empty() {
        return ctx.variables.clone();
    }

    let value = match &cfg.value {
        Value::String(s) => Value::String(ctx.interpolate(s)),
        other => other.clone(),
    };
    ctx.variables.insert(cfg.name.clone(), value.clone());

    [(cfg.name.clone(), value)].into_iter().collect()
}
