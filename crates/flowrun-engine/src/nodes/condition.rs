use serde_json::Value;
use tracing::debug;

use flowrun_core::flow::HANDLE_KEY;
use flowrun_core::node_config::{Combinator, ConditionConfig, ConditionOperator, ConditionRule};
use flowrun_core::types::Variables;

use crate::context::ExecutionContext;
use crate::interpolate::value_to_text;

/// Evaluate every rule against the scope and pick the `true`/`false` branch.
/// With no rules, `and` holds and `or` does not.
pub fn run(cfg: &ConditionConfig, ctx: &ExecutionContext<'_>) -> Variables {
    let mut results = cfg.conditions.iter().map(|rule| evaluate(rule, ctx));
    let result = match cfg.combine_with {
        Combinator::And => results.all(|r| r),
        Combinator::Or => results.any(|r| r),
    };
    debug!(
        rules = cfg.conditions.len(),
        combine_with = ?cfg.combine_with,
        result,
        "Condition evaluated"
    );

    [
        ("result".to_string(), Value::Bool(result)),
        (HANDLE_KEY.to_string(), Value::String(result.to_string())),
    ]
    .into_iter()
    .collect()
}

fn evaluate(rule: &ConditionRule, ctx: &ExecutionContext<'_>) -> bool {
    let actual = ctx.lookup(&rule.field).unwrap_or(&Value::Null);
    compare(actual, rule.operator, &rule.value)
}

/// Apply one operator. Text operators compare rendered values; ordering
/// operators compare numbers.
pub fn compare(actual: &Value, op: ConditionOperator, expected: &Value) -> bool {
    use ConditionOperator::*;

    let text = || value_to_text(actual);
    let want = || value_to_text(expected);
    match op {
        Eq => text() == want(),
        Ne => text() != want(),
        Contains => text().contains(&want()),
        StartsWith => text().starts_with(&want()),
        EndsWith => text().ends_with(&want()),
        Gt => to_number(actual) > to_number(expected),
        Lt => to_number(actual) < to_number(expected),
        Gte => to_number(actual) >= to_number(expected),
        Lte => to_number(actual) <= to_number(expected),
        Empty => text().is_empty(),
        NotEmpty => !text().is_empty(),
        Unsupported => false,
    }
}

/// Numbers as-is; strings by their longest numeric prefix; anything else 0.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => parse_prefix(s.trim()),
        _ => 0.0,
    }
}

fn parse_prefix(s: &str) -> f64 {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut best = 0;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {
                seen_digit = true;
                end += 1;
                best = end;
            }
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                end += 1;
            }
            b'e' | b'E' if seen_digit && !seen_exp => {
                seen_exp = true;
                end += 1;
                if matches!(bytes.get(end), Some(b'+' | b'-')) {
                    end += 1;
                }
            }
            _ => break,
        }
    }
    s[..best].parse().unwrap_or(0.0)
}
