//! Node handlers and the dispatcher that selects one by node type.

pub mod ai_agent;
pub mod condition;
pub mod database;
pub mod delay;
pub mod http_request;
pub mod messaging;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use flowrun_core::config::AppConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::Node;
use flowrun_core::node_config::NodeConfig;
use flowrun_core::traits::{LlmClient, SqlConnector};
use flowrun_core::types::Variables;

use crate::context::ExecutionContext;
use crate::credentials::CredentialResolver;

/// Collaborators shared by every handler. Read-only during a run.
pub struct NodeServices {
    pub credentials: CredentialResolver,
    pub llm: Arc<dyn LlmClient>,
    pub sql: Arc<dyn SqlConnector>,
    pub http: reqwest::Client,
    pub config: AppConfig,
}

/// Parse the node's configuration and run the matching handler.
pub async fn dispatch(
    node: &Node,
    ctx: &mut ExecutionContext<'_>,
    services: &NodeServices,
) -> Result<Variables> {
    let config = NodeConfig::parse(node, &services.config.engine.trigger_prefix)?;

    match config {
        NodeConfig::Trigger => Ok(ctx.input.clone()),
        NodeConfig::AiAgent(cfg) => ai_agent::run(&cfg, ctx, services).await,
        NodeConfig::HttpRequest(cfg) => http_request::run(&cfg, ctx, services).await,
        NodeConfig::Database(cfg) => database::run(&cfg, ctx, services).await,
        NodeConfig::Condition(cfg) => Ok(condition::run(&cfg, ctx)),
        NodeConfig::Delay(cfg) => delay::run(&cfg, ctx, services).await,
        NodeConfig::SendMessage(cfg) => Ok(messaging::send_message(&cfg, &node.id, ctx)),
        NodeConfig::SetVariable(cfg) => Ok(messaging::set_variable(&cfg, ctx)),
        NodeConfig::Unknown(kind) => {
            debug!(node_id = %node.id, node_type = %kind, "No handler for node type, passing through");
            Ok(ctx.variables.clone())
        }
    }
}

/// Race `fut` against the run's cancellation token.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FlowError::Cancelled),
        result = fut => result,
    }
}
