use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flowrun_core::config::{AppConfig, FanOutPolicy};
use flowrun_core::error::{FlowError, Result};
use flowrun_core::event::EventBus;
use flowrun_core::flow::{Flow, Node};
use flowrun_core::traits::{CredentialStore, LlmClient, SqlConnector};
use flowrun_core::types::{FlowEvent, OutboundMessage, Variables};
use flowrun_core::validate::find_cycle;

use crate::context::ExecutionContext;
use crate::credentials::CredentialResolver;
use crate::nodes::{self, NodeServices};

/// One executed node.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub node_id: String,
    pub label: String,
    pub node_type: String,
    pub elapsed_ms: u64,
}

/// A branch abandoned under `FanOutPolicy::ContinueSiblings`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeFailure {
    pub node_id: String,
    pub label: String,
    pub error: String,
}

/// Result of running a flow to completion.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Output of the last node executed.
    pub output: Variables,
    /// The final variable scope.
    pub variables: Variables,
    /// Executed nodes, in execution order.
    pub steps: Vec<StepRecord>,
    /// Messages prepared by SendMessage nodes, for the caller to deliver.
    pub outbound: Vec<OutboundMessage>,
    /// Always empty under `FanOutPolicy::AbortAll`.
    pub failures: Vec<NodeFailure>,
    pub total_elapsed_ms: u64,
}

/// Per-run overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Start here instead of at the first trigger node.
    pub entry_node: Option<String>,
    /// Caller-owned token. Defaults to a child of the engine's token.
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn entry(mut self, node_id: impl Into<String>) -> Self {
        self.entry_node = Some(node_id.into());
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Runs flows. One engine may run many flows concurrently; each run owns
/// its own `ExecutionContext` and only reads from the engine.
pub struct FlowEngine {
    services: NodeServices,
    events: Option<Arc<EventBus>>,
    cancel: CancellationToken,
}

impl FlowEngine {
    pub fn new(
        config: AppConfig,
        credentials: Arc<dyn CredentialStore>,
        llm: Arc<dyn LlmClient>,
        sql: Arc<dyn SqlConnector>,
    ) -> Self {
        Self {
            services: NodeServices {
                credentials: CredentialResolver::new(credentials),
                llm,
                sql,
                http: reqwest::Client::new(),
                config,
            },
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.services.http = http;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Cancelling this token aborts every run that did not bring its own.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.services.config
    }

    /// Run `flow` from its trigger with `input` as the initial scope overlay.
    pub async fn execute(&self, flow: &Flow, input: Variables) -> Result<ExecutionResult> {
        self.execute_with(flow, input, RunOptions::default()).await
    }

    pub async fn execute_with(
        &self,
        flow: &Flow,
        input: Variables,
        options: RunOptions,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        let entry = match options.entry_node.as_deref() {
            Some(id) => flow
                .node(id)
                .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))?,
            None => self.find_entry(flow)?,
        };
        if let Some(node_id) = find_cycle(flow, [entry.id.as_str()]) {
            warn!(flow_id = %flow.id, node_id = %node_id, "Refusing to run cyclic flow");
            return Err(FlowError::CycleDetected(node_id));
        }

        let cancel = options.cancel.unwrap_or_else(|| self.cancel.child_token());
        let mut ctx = ExecutionContext::new(flow, input, cancel);

        info!(flow_id = %flow.id, flow_name = %flow.name, entry_node = %entry.id, "Flow run started");
        self.emit(FlowEvent::RunStarted {
            flow_id: flow.id.clone(),
            entry_node: entry.id.clone(),
        });

        let mut steps = Vec::new();
        let mut failures = Vec::new();
        if let Err(e) = self
            .traverse(&mut ctx, &entry.id, &mut steps, &mut failures)
            .await
        {
            error!(flow_id = %flow.id, error = %e, "Flow run failed");
            self.emit(FlowEvent::RunFailed {
                flow_id: flow.id.clone(),
                error: e.to_string(),
            });
            return Err(e);
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            flow_id = %flow.id,
            steps = steps.len(),
            failures = failures.len(),
            elapsed_ms = total_elapsed_ms,
            "Flow run complete"
        );
        self.emit(FlowEvent::RunCompleted {
            flow_id: flow.id.clone(),
            steps: steps.len(),
            elapsed_ms: total_elapsed_ms,
        });

        Ok(ExecutionResult {
            output: ctx.output,
            variables: ctx.variables,
            steps,
            outbound: ctx.outbound,
            failures,
            total_elapsed_ms,
        })
    }

    fn find_entry<'f>(&self, flow: &'f Flow) -> Result<&'f Node> {
        let prefix = &self.services.config.engine.trigger_prefix;
        let mut triggers = flow.nodes.iter().filter(|n| n.is_trigger(prefix));
        let first = triggers.next().ok_or(FlowError::NoTriggerFound)?;
        let others = triggers.count();
        if others > 0 {
            warn!(
                flow_id = %flow.id,
                entry_node = %first.id,
                ignored = others,
                "Flow has several triggers, using the first"
            );
        }
        Ok(first)
    }

    /// Depth-first over an explicit stack. Each node runs at most once.
    async fn traverse(
        &self,
        ctx: &mut ExecutionContext<'_>,
        entry: &str,
        steps: &mut Vec<StepRecord>,
        failures: &mut Vec<NodeFailure>,
    ) -> Result<()> {
        let flow = ctx.flow;
        let mut stack = vec![entry.to_string()];
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id.clone()) {
                continue;
            }
            if ctx.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }

            let node = flow
                .node(&node_id)
                .ok_or_else(|| FlowError::NodeNotFound(node_id.clone()))?;
            ctx.current_node = Some(node.id.clone());

            debug!(node_id = %node.id, node_type = %node.node_type, "Dispatching node");
            self.emit(FlowEvent::NodeStarted {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });

            let node_start = Instant::now();
            let result = nodes::dispatch(node, ctx, &self.services).await;
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    let e = e.in_node(&node.id, node.display_name());
                    error!(node_id = %node.id, node_type = %node.node_type, elapsed_ms, error = %e, "Node failed");
                    self.emit(FlowEvent::NodeFailed {
                        node_id: node.id.clone(),
                        error: e.to_string(),
                    });
                    match self.services.config.engine.fan_out {
                        FanOutPolicy::AbortAll => return Err(e),
                        FanOutPolicy::ContinueSiblings => {
                            failures.push(NodeFailure {
                                node_id: node.id.clone(),
                                label: node.display_name().to_string(),
                                error: e.to_string(),
                            });
                            continue;
                        }
                    }
                }
            };

            ctx.absorb(output);
            steps.push(StepRecord {
                node_id: node.id.clone(),
                label: node.display_name().to_string(),
                node_type: node.node_type.clone(),
                elapsed_ms,
            });
            self.emit(FlowEvent::NodeCompleted {
                node_id: node.id.clone(),
                elapsed_ms,
            });

            let handle = ctx.handle();
            let next: Vec<&str> = flow
                .outgoing(&node.id)
                .filter(|edge| match &handle {
                    Some(h) => edge.source_handle.as_deref() == Some(h.as_str()),
                    None => true,
                })
                .map(|edge| edge.target.as_str())
                .collect();

            if next.is_empty() {
                debug!(node_id = %node.id, handle = ?handle, "No edges to follow");
            }
            // Reversed so the first edge is popped first.
            stack.extend(next.into_iter().rev().map(String::from));
        }

        Ok(())
    }

    fn emit(&self, event: FlowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::flow::{Edge, NODE_SET_VARIABLE};
    use flowrun_core::ErrorKind;
    use flowrun_test_utils::{credential_store, linear_flow, vars, MockLlmClient, MockSqlConnector};
    use serde_json::json;

    fn engine() -> FlowEngine {
        FlowEngine::new(
            AppConfig::default(),
            credential_store(vec![]),
            Arc::new(MockLlmClient::new()),
            Arc::new(MockSqlConnector::new()),
        )
    }

    fn set(id: &str, name: &str, value: serde_json::Value) -> Node {
        Node::new(id, NODE_SET_VARIABLE)
            .with("name", json!(name))
            .with("value", value)
    }

    #[tokio::test]
    async fn test_steps_and_output() {
        let flow = linear_flow(vec![set("a", "x", json!(1)), set("b", "y", json!("{{x}}!"))]);
        let result = engine().execute(&flow, vars(json!({"text": "hi"}))).await.unwrap();

        let order: Vec<_> = result.steps.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(order, vec!["trigger", "a", "b"]);
        assert_eq!(result.output, vars(json!({"y": "1!"})));
        assert_eq!(result.variables["text"], json!("hi"));
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_entry_node() {
        let flow = linear_flow(vec![set("a", "x", json!(1)), set("b", "y", json!(2))]);
        let result = engine()
            .execute_with(&flow, Variables::new(), RunOptions::default().entry("b"))
            .await
            .unwrap();
        assert_eq!(result.steps.len(), 1);
        assert!(!result.variables.contains_key("x"));

        let err = engine()
            .execute_with(&flow, Variables::new(), RunOptions::default().entry("zzz"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let engine = engine().with_event_bus(bus);
        let flow = linear_flow(vec![set("a", "x", json!(1))]);
        engine.execute(&flow, Variables::new()).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(match event {
                FlowEvent::RunStarted { .. } => "run_started",
                FlowEvent::NodeStarted { .. } => "node_started",
                FlowEvent::NodeCompleted { .. } => "node_completed",
                FlowEvent::NodeFailed { .. } => "node_failed",
                FlowEvent::RunCompleted { .. } => "run_completed",
                FlowEvent::RunFailed { .. } => "run_failed",
            });
        }
        assert_eq!(
            seen,
            vec![
                "run_started",
                "node_started",
                "node_completed",
                "node_started",
                "node_completed",
                "run_completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_engine_token_cancels_runs() {
        let engine = engine();
        engine.cancel_token().cancel();
        let flow = linear_flow(vec![]);
        let err = engine.execute(&flow, Variables::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancellation);
    }

    #[tokio::test]
    async fn test_dangling_edge_is_not_found() {
        let flow = linear_flow(vec![]).with_edge(Edge::new("trigger", "ghost"));
        let err = engine().execute(&flow, Variables::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
