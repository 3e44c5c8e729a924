//! Save-time flow validation.

use std::collections::{HashMap, HashSet};

use crate::error::{FlowError, Result};
use crate::flow::Flow;
use crate::node_config::NodeConfig;

/// One finding, optionally tied to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub node_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn flow(message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            message: message.into(),
        }
    }

    fn node(node_id: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.to_string()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "[{}] {}", id, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold all errors into one `FlowError::Validation`.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let joined = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(FlowError::Validation(joined))
    }
}

/// Check a flow's structure and every node's configuration.
pub fn validate_flow(flow: &Flow, trigger_prefix: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut seen = HashSet::new();
    for node in &flow.nodes {
        if !seen.insert(node.id.as_str()) {
            report
                .errors
                .push(ValidationIssue::node(&node.id, "duplicate node id"));
        }
    }

    for edge in &flow.edges {
        for end in [&edge.source, &edge.target] {
            if !seen.contains(end.as_str()) {
                report.errors.push(ValidationIssue::flow(format!(
                    "edge {} -> {} references unknown node '{}'",
                    edge.source, edge.target, end
                )));
            }
        }
    }

    let triggers: Vec<&str> = flow
        .nodes
        .iter()
        .filter(|n| n.is_trigger(trigger_prefix))
        .map(|n| n.id.as_str())
        .collect();
    match triggers.as_slice() {
        [] => report
            .errors
            .push(ValidationIssue::flow("flow has no trigger node")),
        [_] => {}
        [first, ..] => report.warnings.push(ValidationIssue::flow(format!(
            "flow has {} trigger nodes; '{}' is the entry point",
            triggers.len(),
            first
        ))),
    }

    for node in &flow.nodes {
        match NodeConfig::parse(node, trigger_prefix) {
            Ok(NodeConfig::Unknown(kind)) => report.warnings.push(ValidationIssue::node(
                &node.id,
                format!("unknown node type '{}' will pass variables through", kind),
            )),
            Ok(_) => {}
            Err(e) => report
                .errors
                .push(ValidationIssue::node(&node.id, e.to_string())),
        }
    }

    if let Some(at) = find_cycle(flow, flow.nodes.iter().map(|n| n.id.as_str())) {
        report
            .errors
            .push(ValidationIssue::node(&at, "cycle detected"));
    }

    report
}

/// Depth-first search from each root; returns a node on the first cycle found.
pub fn find_cycle<'a>(flow: &'a Flow, roots: impl IntoIterator<Item = &'a str>) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &flow.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for root in roots {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::Active);
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

        while let Some(&(node, idx)) = stack.last() {
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&child) = children.get(idx) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks.get(child) {
                    Some(Mark::Active) => return Some(child.to_string()),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::Active);
                        stack.push((child, 0));
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
                stack.pop();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::*;
    use serde_json::json;

    fn linear() -> Flow {
        Flow::new("ok")
            .with_node(Node::new("t", NODE_TRIGGER_WEBHOOK))
            .with_node(Node::new("s", NODE_SET_VARIABLE).with("name", json!("x")))
            .with_edge(Edge::new("t", "s"))
    }

    #[test]
    fn test_valid_flow() {
        let report = validate_flow(&linear(), TRIGGER_PREFIX);
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_no_trigger() {
        let flow = Flow::new("empty");
        let report = validate_flow(&flow, TRIGGER_PREFIX);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("no trigger"));
    }

    #[test]
    fn test_duplicate_and_dangling() {
        let flow = linear()
            .with_node(Node::new("s", NODE_DELAY))
            .with_edge(Edge::new("s", "ghost"));
        let report = validate_flow(&flow, TRIGGER_PREFIX);
        let messages: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate node id")));
        assert!(messages.iter().any(|m| m.contains("unknown node 'ghost'")));
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let flow = linear()
            .with_node(Node::new("t2", NODE_TRIGGER_TELEGRAM))
            .with_node(Node::new("g", "google_sheets"));
        let report = validate_flow(&flow, TRIGGER_PREFIX);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_bad_node_config_is_error() {
        let flow = linear().with_node(Node::new("h", NODE_HTTP_REQUEST));
        let err = validate_flow(&flow, TRIGGER_PREFIX).into_result().unwrap_err();
        assert!(err.to_string().contains("[h]"));
        assert!(err.to_string().contains("URL is required"));
    }

    #[test]
    fn test_cycle_found() {
        let flow = Flow::new("loop")
            .with_node(Node::new("t", NODE_TRIGGER_WEBHOOK))
            .with_node(Node::new("a", NODE_DELAY))
            .with_node(Node::new("b", NODE_DELAY))
            .with_edge(Edge::new("t", "a"))
            .with_edge(Edge::new("a", "b"))
            .with_edge(Edge::new("b", "a"));
        assert_eq!(find_cycle(&flow, ["t"]).as_deref(), Some("a"));
        assert!(!validate_flow(&flow, TRIGGER_PREFIX).is_valid());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let flow = Flow::new("diamond")
            .with_node(Node::new("t", NODE_TRIGGER_WEBHOOK))
            .with_node(Node::new("a", NODE_DELAY))
            .with_node(Node::new("b", NODE_DELAY))
            .with_node(Node::new("c", NODE_DELAY))
            .with_edge(Edge::new("t", "a"))
            .with_edge(Edge::new("t", "b"))
            .with_edge(Edge::new("a", "c"))
            .with_edge(Edge::new("b", "c"));
        assert!(find_cycle(&flow, ["t"]).is_none());
    }

    #[test]
    fn test_self_loop() {
        let flow = Flow::new("self")
            .with_node(Node::new("t", NODE_TRIGGER_WEBHOOK))
            .with_edge(Edge::new("t", "t"));
        assert_eq!(find_cycle(&flow, ["t"]).as_deref(), Some("t"));
    }
}
