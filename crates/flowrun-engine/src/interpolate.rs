//! `{{ path }}` variable interpolation.
//!
//! A path is split on `.` and walked through nested objects in the variable
//! scope. Arrays are not indexable. An unresolved path, or one that resolves
//! to `null`, leaves the token as written. There is no escape syntax.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use flowrun_core::types::Variables;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("interpolation pattern is valid"))
}

/// Substitute every resolvable token in `text`.
pub fn interpolate(text: &str, vars: &Variables) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    token_regex()
        .replace_all(text, |caps: &Captures<'_>| match resolve(vars, &caps[1]) {
            Some(value) => value_to_text(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Interpolate every string inside a JSON value, recursing into arrays and
/// objects. Keys are left alone.
pub fn interpolate_value(value: &Value, vars: &Variables) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Replace each token with a positional placeholder (`?1`, `?2`, ...) and
/// collect the values to bind. Unresolved tokens bind `NULL`.
pub fn bind_template(text: &str, vars: &Variables) -> (String, Vec<Value>) {
    let mut params = Vec::new();
    let sql = token_regex()
        .replace_all(text, |caps: &Captures<'_>| {
            params.push(resolve(vars, &caps[1]).cloned().unwrap_or(Value::Null));
            format!("?{}", params.len())
        })
        .into_owned();
    (sql, params)
}

fn resolve<'a>(vars: &'a Variables, raw_path: &str) -> Option<&'a Value> {
    lookup_path(vars, raw_path.trim()).filter(|v| !v.is_null())
}

/// Walk a dot-path through nested objects.
pub fn lookup_path<'a>(vars: &'a Variables, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Render a value as text: strings raw, integral numbers without a fraction,
/// containers as compact JSON, `null` as empty.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or_default();
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Variables {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_simple_substitution() {
        let v = vars(json!({"name": "Ann"}));
        assert_eq!(interpolate("Hello {{name}}!", &v), "Hello Ann!");
        assert_eq!(interpolate("Hello {{ name }}!", &v), "Hello Ann!");
    }

    #[test]
    fn test_missing_and_null_stay_literal() {
        let v = vars(json!({"gone": null}));
        assert_eq!(interpolate("{{missing}}", &v), "{{missing}}");
        assert_eq!(interpolate("x={{gone}}", &v), "x={{gone}}");
    }

    #[test]
    fn test_nested_paths() {
        let v = vars(json!({"user": {"profile": {"city": "Oslo"}}, "list": [1, 2]}));
        assert_eq!(interpolate("{{user.profile.city}}", &v), "Oslo");
        assert_eq!(interpolate("{{list.0}}", &v), "{{list.0}}");
        assert_eq!(interpolate("{{user.nope}}", &v), "{{user.nope}}");
    }

    #[test]
    fn test_rendering() {
        let v = vars(json!({"n": 5, "f": 2.5, "whole": 3.0, "b": false, "o": {"a": 1}}));
        assert_eq!(interpolate("{{n}} {{f}} {{whole}} {{b}}", &v), "5 2.5 3 false");
        assert_eq!(interpolate("{{o}}", &v), "{\"a\":1}");
    }

    #[test]
    fn test_no_escape_for_braces() {
        let v = vars(json!({"a": "x"}));
        assert_eq!(interpolate("{{{a}}}", &v), "{{{a}}}");
        assert_eq!(interpolate("{{}}", &v), "{{}}");
    }

    #[test]
    fn test_interpolate_value_recurses() {
        let v = vars(json!({"id": 7}));
        let body = json!({"user": "{{id}}", "tags": ["{{id}}", 1]});
        assert_eq!(
            interpolate_value(&body, &v),
            json!({"user": "7", "tags": ["7", 1]})
        );
    }

    #[test]
    fn test_bind_template() {
        let v = vars(json!({"email": "a@b.c", "user": {"age": 30}}));
        let (sql, params) = bind_template(
            "SELECT * FROM users WHERE email = {{email}} AND age > {{ user.age }} AND x = {{nope}}",
            &v,
        );
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE email = ?1 AND age > ?2 AND x = ?3"
        );
        assert_eq!(params, vec![json!("a@b.c"), json!(30), Value::Null]);
    }
}
