use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use flowrun_core::credential::DatabaseCredential;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::SqlConnector;
use flowrun_core::types::{SqlOutcome, SqlStatement, StatementKind};

enum Scripted {
    Outcome(SqlOutcome),
    Fail(String),
}

/// Records statements and answers with scripted outcomes. Unscripted calls
/// return no rows or zero affected rows depending on the statement kind.
#[derive(Default)]
pub struct MockSqlConnector {
    script: Mutex<VecDeque<Scripted>>,
    statements: Mutex<Vec<(String, SqlStatement)>>,
}

impl MockSqlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a row set. Each value must be a JSON object.
    pub fn with_rows(self, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .map(|r| match r {
                Value::Object(map) => map,
                _ => Map::new(),
            })
            .collect();
        self.push(Scripted::Outcome(SqlOutcome::Rows(rows)))
    }

    pub fn with_affected(self, n: u64) -> Self {
        self.push(Scripted::Outcome(SqlOutcome::Affected(n)))
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()))
    }

    fn push(self, item: Scripted) -> Self {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(item);
        }
        self
    }

    /// Statements received so far, with the database each targeted.
    pub fn statements(&self) -> Vec<(String, SqlStatement)> {
        self.statements.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SqlConnector for MockSqlConnector {
    fn run(
        &self,
        target: &DatabaseCredential,
        statement: SqlStatement,
    ) -> BoxFuture<'_, Result<SqlOutcome>> {
        let kind = statement.kind;
        if let Ok(mut s) = self.statements.lock() {
            s.push((target.database.clone(), statement));
        }
        let next = self.script.lock().ok().and_then(|mut q| q.pop_front());

        Box::pin(async move {
            match next {
                Some(Scripted::Outcome(outcome)) => Ok(outcome),
                Some(Scripted::Fail(msg)) => Err(FlowError::Database(msg)),
                None => Ok(match kind {
                    StatementKind::Query => SqlOutcome::Rows(vec![]),
                    StatementKind::Execute => SqlOutcome::Affected(0),
                }),
            }
        })
    }
}
