use serde_json::Value;
use tokio_util::sync::CancellationToken;

use flowrun_core::flow::{Flow, HANDLE_KEY};
use flowrun_core::types::{OutboundMessage, Variables};

use crate::interpolate;

/// Per-run state. Created by `FlowEngine::execute` and dropped when it returns.
pub struct ExecutionContext<'f> {
    /// The flow being run.
    pub flow: &'f Flow,
    /// Variable scope: flow variables, overlaid by the run input, then by
    /// each node's output as it completes.
    pub variables: Variables,
    /// The run's original input.
    pub input: Variables,
    /// Output of the most recently completed node.
    pub output: Variables,
    pub current_node: Option<String>,
    /// Messages prepared by SendMessage nodes, in execution order.
    pub outbound: Vec<OutboundMessage>,
    pub cancel: CancellationToken,
}

impl<'f> ExecutionContext<'f> {
    pub fn new(flow: &'f Flow, input: Variables, cancel: CancellationToken) -> Self {
        let mut variables: Variables = flow
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect();
        for (k, v) in &input {
            variables.insert(k.clone(), v.clone());
        }

        Self {
            flow,
            variables,
            input,
            output: Variables::new(),
            current_node: None,
            outbound: Vec::new(),
            cancel,
        }
    }

    /// Fold a node's output into the scope and make it the current output.
    /// The branch handle is not copied into the scope.
    pub fn absorb(&mut self, output: Variables) {
        for (k, v) in &output {
            if k != HANDLE_KEY {
                self.variables.insert(k.clone(), v.clone());
            }
        }
        self.output = output;
    }

    /// The branch handle the current output selects, if any.
    pub fn handle(&self) -> Option<String> {
        self.output.get(HANDLE_KEY).map(interpolate::value_to_text)
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        interpolate::lookup_path(&self.variables, path)
    }

    pub fn interpolate(&self, text: &str) -> String {
        interpolate::interpolate(text, &self.variables)
    }

    pub fn interpolate_value(&self, value: &Value) -> Value {
        interpolate::interpolate_value(value, &self.variables)
    }

    /// A string variable, treating empty strings as absent.
    pub fn text_var(&self, name: &str) -> Option<&str> {
        self.variables
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}
