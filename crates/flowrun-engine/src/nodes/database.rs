use serde_json::{Map, Value};
use tracing::debug;

use flowrun_core::credential::DatabaseCredential;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::node_config::{is_valid_identifier, DatabaseConfig, DatabaseOperation, WherePredicate};
use flowrun_core::types::{SqlOutcome, SqlStatement, Variables};

use super::NodeServices;
use crate::context::ExecutionContext;
use crate::interpolate::{bind_template, interpolate, lookup_path};

/// Run one SQL operation against the credential's database.
pub async fn run(
    cfg: &DatabaseConfig,
    ctx: &ExecutionContext<'_>,
    services: &NodeServices,
) -> Result<Variables> {
    let credential_id = cfg
        .credential_id()
        .ok_or_else(|| FlowError::Configuration("database credential is required".into()))?;
    let target: DatabaseCredential = services.credentials.resolve(credential_id).await?;

    let statement = build_statement(cfg, &ctx.variables)?;
    debug!(
        operation = ?cfg.operation,
        sql = %statement.sql,
        params = statement.params.len(),
        "Running database operation"
    );
    let outcome = services.sql.run(&target, statement).await?;

    let mut out = Variables::new();
    match (cfg.operation, outcome) {
        (DatabaseOperation::Insert, SqlOutcome::Rows(mut rows)) => {
            let inserted = if rows.is_empty() {
                Value::Bool(true)
            } else {
                Value::Object(rows.swap_remove(0))
            };
            out.insert("inserted".into(), inserted);
        }
        (DatabaseOperation::Insert, SqlOutcome::Affected(_)) => {
            out.insert("inserted".into(), Value::Bool(true));
        }
        (_, SqlOutcome::Rows(rows)) => {
            out.insert("count".into(), Value::from(rows.len()));
            out.insert(
                "rows".into(),
                Value::Array(rows.into_iter().map(Value::Object).collect()),
            );
        }
        (_, SqlOutcome::Affected(n)) => {
            out.insert("rows_affected".into(), Value::from(n));
        }
    }
    Ok(out)
}

/// Build a parameterised statement. Identifiers are validated and quoted;
/// every value is bound.
pub fn build_statement(cfg: &DatabaseConfig, vars: &Variables) -> Result<SqlStatement> {
    let mut params = Vec::new();

    match cfg.operation {
        DatabaseOperation::Raw => {
            let query = cfg
                .query
                .as_deref()
                .filter(|q| !q.trim().is_empty())
                .ok_or_else(|| FlowError::Configuration("query required for raw operation".into()))?;
            let (sql, params) = bind_template(query, vars);
            Ok(SqlStatement::query(sql, params))
        }
        DatabaseOperation::Select => {
            let columns = if cfg.columns.is_empty() {
                "*".to_string()
            } else {
                cfg.columns
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ")
            };
            let mut sql = format!("SELECT {} FROM {}", columns, table_name(cfg)?);
            sql.push_str(&where_clause(&cfg.where_clause, vars, &mut params)?);
            if let Some(limit) = cfg.limit.filter(|l| *l > 0) {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            Ok(SqlStatement::query(sql, params))
        }
        DatabaseOperation::Insert => {
            let values = require_values(&cfg.values, "insert")?;
            let mut cols = Vec::new();
            let mut placeholders = Vec::new();
            for (col, val) in values {
                cols.push(quote_identifier(col)?);
                params.push(bind_value(val, vars));
                placeholders.push(format!("?{}", params.len()));
            }
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                table_name(cfg)?,
                cols.join(", "),
                placeholders.join(", ")
            );
            Ok(SqlStatement::query(sql, params))
        }
        DatabaseOperation::Update => {
            let values = require_values(&cfg.values, "update")?;
            require_where(&cfg.where_clause, "update")?;
            let mut sets = Vec::new();
            for (col, val) in values {
                params.push(bind_value(val, vars));
                sets.push(format!("{} = ?{}", quote_identifier(col)?, params.len()));
            }
            let mut sql = format!("UPDATE {} SET {}", table_name(cfg)?, sets.join(", "));
            sql.push_str(&where_clause(&cfg.where_clause, vars, &mut params)?);
            Ok(SqlStatement::execute(sql, params))
        }
        DatabaseOperation::Delete => {
            require_where(&cfg.where_clause, "delete")?;
            let mut sql = format!("DELETE FROM {}", table_name(cfg)?);
            sql.push_str(&where_clause(&cfg.where_clause, vars, &mut params)?);
            Ok(SqlStatement::execute(sql, params))
        }
    }
}

fn table_name(cfg: &DatabaseConfig) -> Result<String> {
    let table = cfg
        .table()
        .ok_or_else(|| FlowError::Configuration("table required".into()))?;
    quote_identifier(table)
}

fn require_values<'a>(values: &'a Map<String, Value>, op: &str) -> Result<&'a Map<String, Value>> {
    if values.is_empty() {
        Err(FlowError::Configuration(format!("values required for {}", op)))
    } else {
        Ok(values)
    }
}

fn require_where(predicates: &[WherePredicate], op: &str) -> Result<()> {
    if predicates.is_empty() {
        Err(FlowError::Configuration(format!("where clause required for {}", op)))
    } else {
        Ok(())
    }
}

fn where_clause(
    predicates: &[WherePredicate],
    vars: &Variables,
    params: &mut Vec<Value>,
) -> Result<String> {
    if predicates.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(predicates.len());
    for pred in predicates {
        let column = quote_identifier(&pred.column)?;
        if pred.operator.takes_value() {
            params.push(bind_value(&pred.value, vars));
            parts.push(format!("{} {} ?{}", column, pred.operator.as_sql(), params.len()));
        } else {
            parts.push(format!("{} {}", column, pred.operator.as_sql()));
        }
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

/// `"name"` or `"schema"."name"`.
pub fn quote_identifier(ident: &str) -> Result<String> {
    if !is_valid_identifier(ident) {
        return Err(FlowError::Configuration(format!("invalid identifier '{}'", ident)));
    }
    Ok(ident
        .split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join("."))
}

/// A string that is exactly one `{{path}}` token binds the resolved value
/// with its JSON type; other strings are interpolated as text.
fn bind_value(value: &Value, vars: &Variables) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(path) = trimmed
                .strip_prefix("{{")
                .and_then(|rest| rest.strip_suffix("}}"))
                .filter(|p| !p.contains('{') && !p.contains('}'))
            {
                if let Some(found) = lookup_path(vars, path.trim()).filter(|v| !v.is_null()) {
                    return found.clone();
                }
            }
            Value::String(interpolate(s, vars))
        }
        other => other.clone(),
    }
}
