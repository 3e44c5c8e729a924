use tracing::debug;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::node_config::DelayConfig;
use flowrun_core::types::Variables;

use super::NodeServices;
use crate::context::ExecutionContext;

/// Suspend the run for the configured duration, capped at five minutes or
/// `engine.max_delay_secs` if lower. Outputs the scope unchanged.
pub async fn run(
    cfg: &DelayConfig,
    ctx: &ExecutionContext<'_>,
    services: &NodeServices,
) -> Result<Variables> {
    let wait = cfg.wait(services.config.engine.max_delay());
    if wait.is_zero() {
        return Ok(ctx.variables.clone());
    }

    debug!(wait_secs = wait.as_secs_f64(), "Delaying run");
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(FlowError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(ctx.variables.clone()),
    }
}
