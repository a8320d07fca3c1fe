//! SQLite persistence for workflows and the local keychain
//!
//! One database file holds the workflow records (with their ordered steps and
//! attached credential sets) and the keychain the controller consults when the
//! agent asks to fill a login form.
//!
//! # Database Schema
//!
//! 1. **workflows** - id, name, timestamps
//! 2. **workflow_steps** - ordered steps, `position` is execution order
//! 3. **workflow_keychain_items** - credential sets attached at composition time
//! 4. **keychain** - service -> credential field map (JSON)
//! 5. **schema_version** - database schema version for migrations
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use cuse_quickstart::database::Database;
//! use cuse_quickstart_sdk::{NewWorkflow, WorkflowRepository};
//!
//! # fn main() -> anyhow::Result<()> {
//! let db = Database::open("/tmp/quickstart.db")?;
//! let workflow = db.create(NewWorkflow::new("Create contact").step("Open Hubspot"))?;
//! assert!(db.get(&workflow.id)?.is_some());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use cuse_quickstart_sdk::{
    async_trait, CredentialFields, CredentialStore, KeychainItem, NewWorkflow, QuickstartError,
    QuickstartResult, Workflow, WorkflowPatch, WorkflowRepository, WorkflowStep,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Database wrapper for workflow and keychain persistence
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> QuickstartResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(QuickstartError::persistence)?;
        }

        let conn = Connection::open(path).map_err(QuickstartError::persistence)?;

        // Enable WAL mode for better concurrent access
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(QuickstartError::persistence)?;

        let db = Self::from_connection(conn)?;
        debug!("Opened database at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> QuickstartResult<Self> {
        let conn = Connection::open_in_memory().map_err(QuickstartError::persistence)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> QuickstartResult<Self> {
        // Steps and attached credential sets are removed with their workflow
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(QuickstartError::persistence)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn conn(&self) -> QuickstartResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QuickstartError::persistence("database lock poisoned"))
    }

    /// Initialize database schema with all tables and indexes
    pub fn initialize_schema(&self) -> QuickstartResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_workflows_created_at ON workflows(created_at);

            CREATE TABLE IF NOT EXISTS workflow_steps (
                workflow_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                step_id TEXT NOT NULL,
                description TEXT NOT NULL,

                PRIMARY KEY(workflow_id, position),
                FOREIGN KEY(workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS workflow_keychain_items (
                workflow_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                service TEXT NOT NULL,
                username TEXT,
                password TEXT,
                token TEXT,
                email TEXT,
                phone TEXT,

                PRIMARY KEY(workflow_id, position),
                FOREIGN KEY(workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS keychain (
                service TEXT PRIMARY KEY,
                fields TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .map_err(QuickstartError::persistence)?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(QuickstartError::persistence)?;

        Ok(())
    }

    /// Get current schema version
    pub fn get_schema_version(&self) -> QuickstartResult<i32> {
        let conn = self.conn()?;
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .map_err(QuickstartError::persistence)
    }

    /// Services known to the keychain, alphabetically
    pub fn keychain_services(&self) -> QuickstartResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT service FROM keychain ORDER BY service ASC")
            .map_err(QuickstartError::persistence)?;
        let services = stmt
            .query_map([], |row| row.get(0))
            .and_then(|rows| rows.collect::<Result<Vec<String>, _>>())
            .map_err(QuickstartError::persistence)?;
        Ok(services)
    }
}

impl WorkflowRepository for Database {
    fn create(&self, draft: NewWorkflow) -> QuickstartResult<Workflow> {
        let workflow = Workflow::from_draft(draft, Utc::now());

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(QuickstartError::persistence)?;
        tx.execute(
            r#"
            INSERT INTO workflows (id, name, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                workflow.id.to_string(),
                workflow.name,
                workflow.created_at.to_rfc3339(),
                workflow.updated_at.to_rfc3339(),
            ],
        )
        .map_err(QuickstartError::persistence)?;
        insert_steps(&tx, &workflow.id, &workflow.steps).map_err(QuickstartError::persistence)?;
        insert_keychain_items(&tx, &workflow.id, &workflow.keychain_items)
            .map_err(QuickstartError::persistence)?;
        tx.commit().map_err(QuickstartError::persistence)?;

        debug!("Created workflow {} ({})", workflow.id, workflow.name);
        Ok(workflow)
    }

    fn get(&self, id: &Uuid) -> QuickstartResult<Option<Workflow>> {
        let conn = self.conn()?;
        load_workflow(&conn, id).map_err(QuickstartError::persistence)
    }

    fn list(&self) -> QuickstartResult<Vec<Workflow>> {
        let conn = self.conn()?;
        let ids = {
            let mut stmt = conn
                .prepare("SELECT id FROM workflows ORDER BY created_at ASC, rowid ASC")
                .map_err(QuickstartError::persistence)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
                .map_err(QuickstartError::persistence)?;
            ids
        };

        let mut workflows = Vec::with_capacity(ids.len());
        for id in ids {
            let id = Uuid::parse_str(&id).map_err(QuickstartError::persistence)?;
            if let Some(workflow) =
                load_workflow(&conn, &id).map_err(QuickstartError::persistence)?
            {
                workflows.push(workflow);
            }
        }
        Ok(workflows)
    }

    fn update(&self, id: &Uuid, patch: WorkflowPatch) -> QuickstartResult<Option<Workflow>> {
        let mut conn = self.conn()?;
        let Some(mut workflow) = load_workflow(&conn, id).map_err(QuickstartError::persistence)?
        else {
            return Ok(None);
        };

        let replace_steps = patch.steps.is_some();
        let replace_items = patch.keychain_items.is_some();
        workflow.apply(patch, Utc::now());

        let tx = conn.transaction().map_err(QuickstartError::persistence)?;
        tx.execute(
            "UPDATE workflows SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![workflow.name, workflow.updated_at.to_rfc3339(), id.to_string()],
        )
        .map_err(QuickstartError::persistence)?;

        if replace_steps {
            tx.execute(
                "DELETE FROM workflow_steps WHERE workflow_id = ?1",
                params![id.to_string()],
            )
            .map_err(QuickstartError::persistence)?;
            insert_steps(&tx, id, &workflow.steps).map_err(QuickstartError::persistence)?;
        }

        if replace_items {
            tx.execute(
                "DELETE FROM workflow_keychain_items WHERE workflow_id = ?1",
                params![id.to_string()],
            )
            .map_err(QuickstartError::persistence)?;
            insert_keychain_items(&tx, id, &workflow.keychain_items)
                .map_err(QuickstartError::persistence)?;
        }

        tx.commit().map_err(QuickstartError::persistence)?;
        Ok(Some(workflow))
    }

    fn delete(&self, id: &Uuid) -> QuickstartResult<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM workflows WHERE id = ?1", params![id.to_string()])
            .map_err(QuickstartError::persistence)?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn has(&self, service: &str) -> QuickstartResult<bool> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM keychain WHERE service = ?1)",
            params![service],
            |row| row.get(0),
        )
        .map_err(QuickstartError::persistence)
    }

    async fn get(&self, service: &str) -> QuickstartResult<Option<CredentialFields>> {
        let raw: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT fields FROM keychain WHERE service = ?1",
                params![service],
                |row| row.get(0),
            )
            .optional()
            .map_err(QuickstartError::persistence)?
        };

        raw.map(|json| serde_json::from_str(&json).map_err(QuickstartError::from))
            .transpose()
    }

    async fn set(&self, service: &str, fields: CredentialFields) -> QuickstartResult<()> {
        let json = serde_json::to_string(&fields)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO keychain (service, fields, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(service) DO UPDATE SET fields = excluded.fields, updated_at = excluded.updated_at
            "#,
            params![service, json, Utc::now().to_rfc3339()],
        )
        .map_err(QuickstartError::persistence)?;
        debug!("Stored {} credential field(s) for {}", fields.len(), service);
        Ok(())
    }
}

// Helper functions for mapping between database and Rust types

fn insert_steps(tx: &Transaction<'_>, id: &Uuid, steps: &[WorkflowStep]) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO workflow_steps (workflow_id, position, step_id, description)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )?;
    for (position, step) in steps.iter().enumerate() {
        stmt.execute(params![id.to_string(), position as i64, step.id, step.description])?;
    }
    Ok(())
}

fn insert_keychain_items(
    tx: &Transaction<'_>,
    id: &Uuid,
    items: &[KeychainItem],
) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO workflow_keychain_items
            (workflow_id, position, service, username, password, token, email, phone)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )?;
    for (position, item) in items.iter().enumerate() {
        stmt.execute(params![
            id.to_string(),
            position as i64,
            item.service,
            item.username,
            item.password,
            item.token,
            item.email,
            item.phone,
        ])?;
    }
    Ok(())
}

fn load_workflow(conn: &Connection, id: &Uuid) -> rusqlite::Result<Option<Workflow>> {
    let header = conn
        .query_row(
            "SELECT name, created_at, updated_at FROM workflows WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    parse_timestamp(row, 1)?,
                    parse_timestamp(row, 2)?,
                ))
            },
        )
        .optional()?;

    let Some((name, created_at, updated_at)) = header else {
        return Ok(None);
    };

    let steps = {
        let mut stmt = conn.prepare(
            r#"
            SELECT step_id, description FROM workflow_steps
            WHERE workflow_id = ?1
            ORDER BY position ASC
            "#,
        )?;
        let steps = stmt
            .query_map(params![id.to_string()], |row| {
                Ok(WorkflowStep {
                    id: row.get(0)?,
                    description: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        steps
    };

    let keychain_items = {
        let mut stmt = conn.prepare(
            r#"
            SELECT service, username, password, token, email, phone
            FROM workflow_keychain_items
            WHERE workflow_id = ?1
            ORDER BY position ASC
            "#,
        )?;
        let items = stmt
            .query_map(params![id.to_string()], |row| {
                Ok(KeychainItem {
                    service: row.get(0)?,
                    username: row.get(1)?,
                    password: row.get(2)?,
                    token: row.get(3)?,
                    email: row.get(4)?,
                    phone: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        items
    };

    Ok(Some(Workflow {
        id: *id,
        name,
        steps,
        keychain_items,
        created_at,
        updated_at,
    }))
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
