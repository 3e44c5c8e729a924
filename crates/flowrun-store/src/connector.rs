use std::time::Duration;

use futures::future::BoxFuture;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde_json::{Map, Value};
use tracing::debug;

use flowrun_core::credential::DatabaseCredential;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::SqlConnector;
use flowrun_core::types::{SqlOutcome, SqlStatement, StatementKind};

/// Runs statements against SQLite database files.
///
/// The credential's `database` field is the file path. Each call opens its
/// own connection on a blocking thread and drops it before returning. The
/// file must already exist.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for SqliteConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlConnector for SqliteConnector {
    fn run(
        &self,
        target: &DatabaseCredential,
        statement: SqlStatement,
    ) -> BoxFuture<'_, Result<SqlOutcome>> {
        let path = target.database.clone();
        let busy_timeout = self.busy_timeout;

        Box::pin(async move {
            if path.trim().is_empty() {
                return Err(FlowError::Configuration(
                    "database credential has no database path".into(),
                ));
            }
            tokio::task::spawn_blocking(move || run_blocking(&path, busy_timeout, statement))
                .await
                .map_err(|e| FlowError::Database(format!("connector task failed: {}", e)))?
        })
    }
}

fn db_err(e: rusqlite::Error) -> FlowError {
    FlowError::Database(e.to_string())
}

fn run_blocking(path: &str, busy_timeout: Duration, statement: SqlStatement) -> Result<SqlOutcome> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(db_err)?;
    conn.busy_timeout(busy_timeout).map_err(db_err)?;

    debug!(sql = %statement.sql, params = statement.params.len(), "Running SQL statement");
    let mut stmt = conn.prepare(&statement.sql).map_err(db_err)?;
    let params = params_from_iter(statement.params.iter().map(to_sql));

    match statement.kind {
        StatementKind::Execute => {
            let affected = stmt.execute(params).map_err(db_err)?;
            Ok(SqlOutcome::Affected(affected as u64))
        }
        StatementKind::Query => {
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params).map_err(db_err)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(db_err)? {
                let mut record = Map::new();
                for (i, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), from_sql(row.get_ref(i).map_err(db_err)?));
                }
                out.push(record);
            }
            Ok(SqlOutcome::Rows(out))
        }
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}
