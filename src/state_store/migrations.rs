use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;

/// Columns older databases may lack: `(table, column, declaration)`.
pub const SCHEMA_CHANGES: &[(&str, &str, &str)] = &[
    ("job_steps", "worker", "TEXT"),
    ("job_steps", "run_id", "TEXT"),
    ("job_steps", "details_json", "TEXT"),
    ("run_audit", "worker", "TEXT"),
    ("run_audit", "pid", "INTEGER"),
    ("run_audit", "phase", "TEXT"),
    ("run_audit", "config_fingerprint", "TEXT"),
    ("run_audit", "error", "TEXT"),
    ("crash_logs", "cycle_id", "TEXT"),
];

const INDICES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_job_steps_run_id ON job_steps(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_job_steps_started_at ON job_steps(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_run_audit_started_at ON run_audit(started_at)",
];

/// Fills `job_steps.run_id` from `job_state_kv` when an insert leaves it
/// NULL. SQLite cannot assign to `NEW` in a BEFORE trigger, so the row is
/// patched right after the insert inside the same statement.
const RUN_ID_TRIGGER: &str = "
    CREATE TRIGGER IF NOT EXISTS job_steps_fill_run_id
    AFTER INSERT ON job_steps
    FOR EACH ROW WHEN NEW.run_id IS NULL
    BEGIN
        UPDATE job_steps
        SET run_id = (SELECT svalue FROM job_state_kv WHERE skey = 'run_id')
        WHERE id = NEW.id;
    END;
";

const RUN_WINDOW: &str = "
    FROM run_audit ra
    WHERE ra.started_at <= job_steps.started_at
      AND (ra.ended_at IS NULL OR ra.ended_at >= job_steps.started_at)
      AND (ra.worker IS NULL OR job_steps.worker IS NULL OR ra.worker = job_steps.worker)
";

/// Steps outside every run window keep a NULL `run_id`.
fn backfill_sql() -> String {
    format!(
        "UPDATE job_steps
         SET run_id = (SELECT ra.run_id {RUN_WINDOW} ORDER BY ra.started_at DESC LIMIT 1)
         WHERE run_id IS NULL AND started_at IS NOT NULL
           AND EXISTS (SELECT 1 {RUN_WINDOW})"
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub added_columns: Vec<String>,
    pub trigger_installed: bool,
    pub backfilled_rows: usize,
    pub failures: Vec<String>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn existing_columns(connection: &Connection, table: &str) -> rusqlite::Result<BTreeSet<String>> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = statement.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect()
}

/// Idempotent schema upgrade. Every failure is logged and recorded in the
/// report; nothing here stops a worker from booting.
pub fn migrate(connection: &Connection) -> MigrationReport {
    let mut report = MigrationReport::default();

    for (table, column, declaration) in SCHEMA_CHANGES {
        let columns = match existing_columns(connection, table) {
            Ok(columns) => columns,
            Err(err) => {
                report.failures.push(format!("inspect {table}: {err}"));
                continue;
            }
        };
        if columns.contains(*column) {
            continue;
        }
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {declaration}");
        match connection.execute(&sql, []) {
            Ok(_) => report.added_columns.push(format!("{table}.{column}")),
            Err(err) => report.failures.push(format!("add {table}.{column}: {err}")),
        }
    }

    for sql in INDICES {
        if let Err(err) = connection.execute(sql, []) {
            report.failures.push(format!("index: {err}"));
        }
    }

    match connection.execute_batch(RUN_ID_TRIGGER) {
        Ok(()) => report.trigger_installed = true,
        Err(err) => report.failures.push(format!("run_id trigger: {err}")),
    }

    match connection.execute(&backfill_sql(), []) {
        Ok(rows) => report.backfilled_rows = rows,
        Err(err) => report.failures.push(format!("backfill: {err}")),
    }

    for failure in &report.failures {
        tracing::warn!(%failure, "state store migration step failed");
    }
    if !report.added_columns.is_empty() || report.backfilled_rows > 0 {
        tracing::info!(
            added = ?report.added_columns,
            backfilled = report.backfilled_rows,
            "state store migrated"
        );
    }
    report
}
