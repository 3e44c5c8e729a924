use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use flowrun_core::credential::{Credential, CredentialType};
use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::{Flow, TRIGGER_PREFIX};
use flowrun_core::traits::CredentialStore;
use flowrun_core::validate::validate_flow;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS flows (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    nodes TEXT NOT NULL,
    edges TEXT NOT NULL,
    variables TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_flows_agent ON flows(agent_id);

CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    config TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credentials_agent ON credentials(agent_id);
";

fn db_err(e: rusqlite::Error) -> FlowError {
    FlowError::Database(e.to_string())
}

/// SQLite-backed store for flows and credentials.
///
/// Flows are saved wholesale: nodes, edges and variables live in JSON
/// columns and are replaced on every save.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    trigger_prefix: String,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Flow store opened");
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            trigger_prefix: TRIGGER_PREFIX.to_string(),
        }
    }

    /// Prefix used when validating flows on save.
    pub fn with_trigger_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.trigger_prefix = prefix.into();
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FlowError::Database(e.to_string()))
    }

    /// Validate and save a flow, replacing any previous version.
    ///
    /// Assigns an id when the flow has none. Returns the stored flow.
    pub fn save_flow(&self, mut flow: Flow) -> Result<Flow> {
        validate_flow(&flow, &self.trigger_prefix).into_result()?;

        if flow.id.is_empty() {
            flow.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        flow.created_at.get_or_insert(now);
        flow.updated_at = Some(now);

        let nodes = serde_json::to_string(&flow.nodes)?;
        let edges = serde_json::to_string(&flow.edges)?;
        let variables = serde_json::to_string(&flow.variables)?;
        let created = flow.created_at.unwrap_or(now).to_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO flows
                (id, agent_id, name, description, is_active, nodes, edges, variables, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                name = excluded.name,
                description = excluded.description,
                is_active = excluded.is_active,
                nodes = excluded.nodes,
                edges = excluded.edges,
                variables = excluded.variables,
                updated_at = excluded.updated_at",
            params![
                flow.id,
                flow.agent_id,
                flow.name,
                flow.description,
                flow.is_active,
                nodes,
                edges,
                variables,
                created,
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        debug!(flow_id = %flow.id, nodes = flow.nodes.len(), "Flow saved");
        Ok(flow)
    }

    pub fn get_flow(&self, id: &str) -> Result<Flow> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, agent_id, name, description, is_active, nodes, edges, variables, created_at, updated_at
             FROM flows WHERE id = ?1",
            params![id],
            flow_columns,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| FlowError::FlowNotFound(id.to_string()))?
        .into_flow()
    }

    /// All flows owned by an agent, oldest first.
    pub fn flows_for_agent(&self, agent_id: &str) -> Result<Vec<Flow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, name, description, is_active, nodes, edges, variables, created_at, updated_at
                 FROM flows WHERE agent_id = ?1 ORDER BY created_at ASC, id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![agent_id], flow_columns)
            .map_err(db_err)?;

        let mut flows = Vec::new();
        for row in rows {
            flows.push(row.map_err(db_err)?.into_flow()?);
        }
        Ok(flows)
    }

    /// Insert or replace a credential. Assigns an id when it has none.
    pub fn save_credential(&self, mut credential: Credential) -> Result<Credential> {
        if credential.id.is_empty() {
            credential.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        credential.created_at.get_or_insert(now);
        credential.updated_at = Some(now);
        let created = credential.created_at.unwrap_or(now).to_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO credentials (id, agent_id, name, type, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                name = excluded.name,
                type = excluded.type,
                config = excluded.config,
                updated_at = excluded.updated_at",
            params![
                credential.id,
                credential.agent_id,
                credential.name,
                credential.credential_type.as_str(),
                credential.config,
                created,
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(credential)
    }

    /// Synchronous lookup behind `CredentialStore::get_credential`.
    pub fn load_credential(&self, id: &str) -> Result<Credential> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, agent_id, name, type, config, created_at, updated_at
             FROM credentials WHERE id = ?1",
            params![id],
            credential_columns,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| FlowError::CredentialNotFound(id.to_string()))?
        .into_credential()
    }

    pub fn credentials_for_agent(&self, agent_id: &str) -> Result<Vec<Credential>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, name, type, config, created_at, updated_at
                 FROM credentials WHERE agent_id = ?1 ORDER BY name ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![agent_id], credential_columns)
            .map_err(db_err)?;

        let mut creds = Vec::new();
        for row in rows {
            creds.push(row.map_err(db_err)?.into_credential()?);
        }
        Ok(creds)
    }
}

impl CredentialStore for SqliteStore {
    fn get_credential(&self, id: &str) -> BoxFuture<'_, Result<Credential>> {
        let id = id.to_string();
        Box::pin(async move { self.load_credential(&id) })
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Raw `flows` row, decoded outside the rusqlite closure so JSON errors
/// surface as `FlowError::Json`.
struct FlowRow {
    id: String,
    agent_id: String,
    name: String,
    description: String,
    is_active: bool,
    nodes: String,
    edges: String,
    variables: String,
    created_at: String,
    updated_at: String,
}

fn flow_columns(row: &Row<'_>) -> rusqlite::Result<FlowRow> {
    Ok(FlowRow {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        nodes: row.get(5)?,
        edges: row.get(6)?,
        variables: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl FlowRow {
    fn into_flow(self) -> Result<Flow> {
        Ok(Flow {
            id: self.id,
            agent_id: self.agent_id,
            name: self.name,
            description: self.description,
            is_active: self.is_active,
            nodes: serde_json::from_str(&self.nodes)?,
            edges: serde_json::from_str(&self.edges)?,
            variables: serde_json::from_str(&self.variables)?,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
        })
    }
}

struct CredentialRow {
    id: String,
    agent_id: String,
    name: String,
    credential_type: String,
    config: String,
    created_at: String,
    updated_at: String,
}

fn credential_columns(row: &Row<'_>) -> rusqlite::Result<CredentialRow> {
    Ok(CredentialRow {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        name: row.get(2)?,
        credential_type: row.get(3)?,
        config: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl CredentialRow {
    fn into_credential(self) -> Result<Credential> {
        let credential_type: CredentialType =
            serde_json::from_value(serde_json::Value::String(self.credential_type))?;
        Ok(Credential {
            id: self.id,
            agent_id: self.agent_id,
            name: self.name,
            credential_type,
            config: self.config,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
        })
    }
}
