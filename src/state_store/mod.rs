//! Per-worker SQLite store: static config (`job_meta`), run-scoped values
//! (`job_state_kv`) and the append-only audit tables.

pub mod error;
pub mod migrations;
pub mod paths;
pub mod query;
pub mod records;

pub use error::StateStoreError;
pub use migrations::{migrate, MigrationReport, SCHEMA_CHANGES};
pub use paths::{db_file_name, find_worker_db, list_worker_dbs, worker_db_path};
pub use query::{query_select, QueryResult, QuerySummary, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
pub use records::{CrashRecord, RunPhase, RunRow, RunSpan, StepRecord, StepRow, StepStatus};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Keys the runner and the gateway share through `job_state_kv`.
pub mod kv_keys {
    pub const PID: &str = "pid";
    pub const PHASE: &str = "phase";
    pub const WORKER_NAME: &str = "worker_name";
    pub const RUN_ID: &str = "run_id";
    pub const CURRENT_NODE: &str = "current_node";
    pub const CANCEL_REQUESTED: &str = "cancel_requested";
    pub const UPDATED_AT: &str = "updated_at";
}

const BASE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS job_meta (
        skey TEXT PRIMARY KEY,
        svalue TEXT
    );

    CREATE TABLE IF NOT EXISTS job_state_kv (
        skey TEXT PRIMARY KEY,
        svalue TEXT
    );

    CREATE TABLE IF NOT EXISTS job_steps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        worker TEXT,
        run_id TEXT,
        node TEXT NOT NULL,
        status TEXT NOT NULL,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        details_json TEXT,
        started_at TEXT
    );

    CREATE TABLE IF NOT EXISTS run_audit (
        run_id TEXT NOT NULL,
        worker TEXT,
        pid INTEGER,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        phase TEXT,
        config_fingerprint TEXT,
        error TEXT
    );

    CREATE TABLE IF NOT EXISTS crash_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        worker TEXT,
        ts TEXT,
        cycle_id TEXT,
        node TEXT,
        message TEXT
    );
";

const STEP_COLUMNS: &str =
    "id, worker, run_id, node, status, duration_ms, details_json, started_at";
const RUN_COLUMNS: &str =
    "run_id, worker, pid, started_at, ended_at, phase, config_fingerprint, error";

#[derive(Debug, Clone)]
pub struct StateStore {
    db_path: PathBuf,
}

impl StateStore {
    /// Opens (creating if needed) the database, ensures the base schema and
    /// runs the migrations. Migration failures are logged, never returned.
    pub fn open(db_path: &Path) -> Result<Self, StateStoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StateStoreError::CreateParent {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let connection = store.connect()?;
        connection.execute_batch(BASE_SCHEMA)?;
        migrate(&connection);
        Ok(store)
    }

    /// Opens an existing database without touching its schema.
    pub fn open_existing(db_path: &Path) -> Result<Self, StateStoreError> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let _ = store.connect()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn migrate(&self) -> Result<MigrationReport, StateStoreError> {
        let connection = self.connect()?;
        connection.execute_batch(BASE_SCHEMA)?;
        Ok(migrate(&connection))
    }

    pub fn connect(&self) -> Result<Connection, StateStoreError> {
        let connection =
            Connection::open(&self.db_path).map_err(|source| StateStoreError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(connection)
    }

    pub fn connect_read_only(&self) -> Result<Connection, StateStoreError> {
        let connection = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StateStoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        Ok(connection)
    }

    fn kv_get(&self, table: &str, key: &str) -> Result<Option<String>, StateStoreError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                &format!("SELECT svalue FROM {table} WHERE skey = ?1"),
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn kv_set(&self, table: &str, key: &str, value: &str) -> Result<(), StateStoreError> {
        let connection = self.connect()?;
        connection.execute(
            &format!(
                "INSERT INTO {table} (skey, svalue) VALUES (?1, ?2)
                 ON CONFLICT(skey) DO UPDATE SET svalue = excluded.svalue"
            ),
            params![key, value],
        )?;
        Ok(())
    }

    fn kv_all(&self, table: &str) -> Result<BTreeMap<String, String>, StateStoreError> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare(&format!("SELECT skey, svalue FROM {table} ORDER BY skey"))?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            out.insert(key, value);
        }
        Ok(out)
    }

    pub fn meta_get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        self.kv_get("job_meta", key)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<(), StateStoreError> {
        self.kv_set("job_meta", key, value)
    }

    pub fn meta_all(&self) -> Result<BTreeMap<String, String>, StateStoreError> {
        self.kv_all("job_meta")
    }

    pub fn state_get(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        self.kv_get("job_state_kv", key)
    }

    pub fn state_set(&self, key: &str, value: &str) -> Result<(), StateStoreError> {
        self.kv_set("job_state_kv", key, value)
    }

    pub fn state_delete(&self, key: &str) -> Result<(), StateStoreError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM job_state_kv WHERE skey = ?1", params![key])?;
        Ok(())
    }

    pub fn state_all(&self) -> Result<BTreeMap<String, String>, StateStoreError> {
        self.kv_all("job_state_kv")
    }

    pub fn cancel_requested(&self) -> Result<bool, StateStoreError> {
        Ok(self
            .state_get(kv_keys::CANCEL_REQUESTED)?
            .is_some_and(|value| matches!(value.trim(), "1" | "true")))
    }

    pub fn request_cancel(&self) -> Result<(), StateStoreError> {
        self.state_set(kv_keys::CANCEL_REQUESTED, "1")
    }

    pub fn clear_cancel(&self) -> Result<(), StateStoreError> {
        self.state_delete(kv_keys::CANCEL_REQUESTED)
    }

    pub fn insert_step(&self, record: &StepRecord) -> Result<i64, StateStoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO job_steps (worker, run_id, node, status, duration_ms, details_json, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.worker,
                record.run_id,
                record.node,
                record.status.as_str(),
                record.duration_ms as i64,
                record.details.to_string(),
                record.started_at,
            ],
        )?;
        Ok(connection.last_insert_rowid())
    }

    pub fn begin_run(&self, span: &RunSpan) -> Result<(), StateStoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO run_audit (run_id, worker, pid, started_at, phase, config_fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                span.run_id,
                span.worker,
                span.pid,
                span.started_at,
                RunPhase::Running.as_str(),
                span.config_fingerprint,
            ],
        )?;
        Ok(())
    }

    pub fn end_run(
        &self,
        run_id: &str,
        ended_at: &str,
        phase: RunPhase,
        error: Option<&str>,
    ) -> Result<(), StateStoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE run_audit SET ended_at = ?2, phase = ?3, error = ?4 WHERE run_id = ?1",
            params![run_id, ended_at, phase.as_str(), error],
        )?;
        Ok(())
    }

    pub fn insert_crash(&self, record: &CrashRecord) -> Result<(), StateStoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO crash_logs (worker, ts, cycle_id, node, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.worker,
                record.ts,
                record.cycle_id,
                record.node,
                record.message
            ],
        )?;
        Ok(())
    }

    pub fn crash_count(&self) -> Result<i64, StateStoreError> {
        let connection = self.connect()?;
        Ok(connection.query_row("SELECT COUNT(*) FROM crash_logs", [], |row| row.get(0))?)
    }

    /// Last `limit` steps, newest first.
    pub fn recent_steps(&self, limit: usize) -> Result<Vec<StepRow>, StateStoreError> {
        self.select_steps(
            &format!("SELECT {STEP_COLUMNS} FROM job_steps ORDER BY id DESC LIMIT ?1"),
            params![limit as i64],
        )
    }

    /// Steps started at or after `started_at`, oldest first.
    pub fn steps_since(&self, started_at: &str) -> Result<Vec<StepRow>, StateStoreError> {
        self.select_steps(
            &format!("SELECT {STEP_COLUMNS} FROM job_steps WHERE started_at >= ?1 ORDER BY id"),
            params![started_at],
        )
    }

    pub fn steps_for_run(&self, run_id: &str) -> Result<Vec<StepRow>, StateStoreError> {
        self.select_steps(
            &format!("SELECT {STEP_COLUMNS} FROM job_steps WHERE run_id = ?1 ORDER BY id"),
            params![run_id],
        )
    }

    fn select_steps(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StepRow>, StateStoreError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(sql)?;
        let rows = statement.query_map(params, step_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn latest_run(&self) -> Result<Option<RunRow>, StateStoreError> {
        let connection = self.connect()?;
        Ok(connection
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM run_audit ORDER BY started_at DESC, rowid DESC LIMIT 1"
                ),
                [],
                run_from_row,
            )
            .optional()?)
    }

    pub fn run(&self, run_id: &str) -> Result<Option<RunRow>, StateStoreError> {
        let connection = self.connect()?;
        Ok(connection
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM run_audit WHERE run_id = ?1"),
                params![run_id],
                run_from_row,
            )
            .optional()?)
    }
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<StepRow> {
    let details = row
        .get::<_, Option<String>>(6)?
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        .unwrap_or(Value::Null);
    Ok(StepRow {
        id: row.get(0)?,
        worker: row.get(1)?,
        run_id: row.get(2)?,
        node: row.get(3)?,
        status: row.get(4)?,
        duration_ms: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
        details,
        started_at: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        worker: row.get(1)?,
        pid: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        phase: row.get(5)?,
        config_fingerprint: row.get(6)?,
        error: row.get(7)?,
    })
}
