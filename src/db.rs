use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::path::Path;

/// Errors produced by job store operations.
#[derive(Debug)]
pub enum StoreError {
    /// A required field was missing or invalid.
    Validation(String),
    /// The job id does not exist.
    NotFound(i64),
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Validation(msg) => write!(f, "validation error: {msg}"),
            StoreError::NotFound(id) => write!(f, "no job with id {id}"),
            StoreError::Sqlite(e) => write!(f, "database error: {e}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Job lifecycle states. The store does not enforce a transition graph;
/// callers sequence these, the store only derives timestamps from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cached,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cached => "cached",
        }
    }

    /// Terminal states trigger automatic `completed_at` stamping.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cached
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current UTC time in the second-precision ISO-8601 form stored in the db.
pub fn utc_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Opens (or creates) the job queue SQLite database at the given path.
///
/// Creates parent directories as needed, enables WAL with a bounded busy
/// timeout (the db is shared by many concurrent task invocations with no
/// external lock), and ensures the schema exists. Safe to call from several
/// processes at once: schema DDL is IF NOT EXISTS and contention is absorbed
/// by the busy timeout.
pub fn open_or_create(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA busy_timeout=5000;",
    )?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Idempotent schema creation. Every column except id/task/status/created_at
/// is nullable; absence means the external collaborator has not produced the
/// corresponding artifact yet.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            task         TEXT NOT NULL,
            status       TEXT NOT NULL,
            repo         TEXT,
            run_id       TEXT,
            session_id   TEXT,
            mode         TEXT,
            tier         TEXT,
            cache_status TEXT,
            created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            started_at   TEXT,
            completed_at TEXT,
            result_path  TEXT,
            log_path     TEXT,
            meta_path    TEXT,
            summary_path TEXT,
            error        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_recency ON jobs(created_at DESC, id DESC);
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);",
    )?;
    Ok(())
}

/// A row from the jobs table, as served over the API.
///
/// `status` stays a plain string on the way out: the store does not reject
/// rows written by older or newer writers with statuses it does not know.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub task: String,
    pub status: String,
    pub repo: Option<String>,
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub mode: Option<String>,
    pub tier: Option<String>,
    pub cache_status: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result_path: Option<String>,
    pub log_path: Option<String>,
    pub meta_path: Option<String>,
    pub summary_path: Option<String>,
    pub error: Option<String>,
    /// Derived, never stored: whole seconds between started_at and
    /// completed_at when both are present and parseable.
    pub elapsed_seconds: Option<i64>,
}

/// Compute elapsed whole seconds between two stored timestamps.
/// Absent or unparseable input yields None, never a default of zero.
pub fn elapsed_seconds(started_at: Option<&str>, completed_at: Option<&str>) -> Option<i64> {
    let start = DateTime::parse_from_rfc3339(started_at?).ok()?;
    let end = DateTime::parse_from_rfc3339(completed_at?).ok()?;
    Some((end - start).num_seconds())
}

impl Job {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let started_at: Option<String> = row.get(10)?;
        let completed_at: Option<String> = row.get(11)?;
        let elapsed = elapsed_seconds(started_at.as_deref(), completed_at.as_deref());
        Ok(Job {
            id: row.get(0)?,
            task: row.get(1)?,
            status: row.get(2)?,
            repo: row.get(3)?,
            run_id: row.get(4)?,
            session_id: row.get(5)?,
            mode: row.get(6)?,
            tier: row.get(7)?,
            cache_status: row.get(8)?,
            created_at: row.get(9)?,
            started_at,
            completed_at,
            result_path: row.get(12)?,
            log_path: row.get(13)?,
            meta_path: row.get(14)?,
            summary_path: row.get(15)?,
            error: row.get(16)?,
            elapsed_seconds: elapsed,
        })
    }
}

/// Fields accepted when inserting a new job. Everything except task and
/// status is optional.
#[derive(Debug, Default)]
pub struct NewJob {
    pub task: String,
    pub status: JobStatus,
    pub repo: Option<String>,
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub mode: Option<String>,
    pub tier: Option<String>,
    pub cache_status: Option<String>,
    pub result_path: Option<String>,
    pub log_path: Option<String>,
    pub meta_path: Option<String>,
    pub summary_path: Option<String>,
    pub started_at: Option<String>,
}

/// Insert a new job row. Returns the assigned id.
///
/// `created_at` is stamped now. `started_at` stays NULL while the initial
/// status is pending; otherwise it defaults to now when not supplied.
pub fn enqueue(conn: &Connection, job: &NewJob) -> Result<i64, StoreError> {
    if job.task.trim().is_empty() {
        return Err(StoreError::Validation("task must not be empty".into()));
    }

    let now = utc_now();
    let started_at = if job.status == JobStatus::Pending {
        None
    } else {
        Some(job.started_at.clone().unwrap_or_else(|| now.clone()))
    };

    conn.execute(
        "INSERT INTO jobs (
            task, status, repo, run_id, session_id, mode, tier, cache_status,
            created_at, started_at, result_path, log_path, meta_path, summary_path
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            job.task,
            job.status.as_str(),
            job.repo,
            job.run_id,
            job.session_id,
            job.mode,
            job.tier,
            job.cache_status,
            now,
            started_at,
            job.result_path,
            job.log_path,
            job.meta_path,
            job.summary_path,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Partial update of an existing job. A `None` field means "not supplied,
/// leave the stored value alone" -- updates never write NULL over data.
#[derive(Debug, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub exit_code: Option<i32>,
    pub session_id: Option<String>,
    pub completed_at: Option<String>,
    pub result_path: Option<String>,
    pub log_path: Option<String>,
    pub meta_path: Option<String>,
    pub summary_path: Option<String>,
    pub cache_status: Option<String>,
    pub error: Option<String>,
}

/// Apply the supplied fields to one job in a single UPDATE statement.
///
/// A transition into a terminal status without an explicit `completed_at`
/// stamps now. An exit code without an explicit `error` derives one (empty
/// string for exit 0). An update with no supplied fields is an Ok no-op.
/// An unknown id is `StoreError::NotFound` rather than a silent no-op, so
/// callers notice broken id plumbing.
pub fn update_job(conn: &Connection, id: i64, update: &JobUpdate) -> Result<(), StoreError> {
    let mut sets: Vec<&str> = Vec::new();
    let mut values = Vec::<SqlValue>::new();

    if let Some(status) = update.status {
        sets.push("status=?");
        values.push(SqlValue::Text(status.as_str().to_string()));
        // Leaving pending means the run has started; stamp started_at if it
        // was never set. COALESCE keeps an existing value immutable.
        if status != JobStatus::Pending {
            sets.push("started_at=COALESCE(started_at, ?)");
            values.push(SqlValue::Text(utc_now()));
        }
    }
    if let Some(session_id) = &update.session_id {
        sets.push("session_id=?");
        values.push(SqlValue::Text(session_id.clone()));
    }

    let completed_at = match (&update.completed_at, update.status) {
        (Some(explicit), _) => Some(explicit.clone()),
        (None, Some(status)) if status.is_terminal() => Some(utc_now()),
        _ => None,
    };
    if let Some(completed_at) = completed_at {
        sets.push("completed_at=?");
        values.push(SqlValue::Text(completed_at));
    }

    for (column, value) in [
        ("result_path=?", &update.result_path),
        ("log_path=?", &update.log_path),
        ("meta_path=?", &update.meta_path),
        ("summary_path=?", &update.summary_path),
        ("cache_status=?", &update.cache_status),
    ] {
        if let Some(value) = value {
            sets.push(column);
            values.push(SqlValue::Text(value.clone()));
        }
    }

    let error = match (&update.error, update.exit_code) {
        (Some(explicit), _) => Some(explicit.clone()),
        (None, Some(0)) => Some(String::new()),
        (None, Some(code)) => Some(format!("agent exited with {code}")),
        (None, None) => None,
    };
    if let Some(error) = error {
        sets.push("error=?");
        values.push(SqlValue::Text(error));
    }

    if sets.is_empty() {
        return Ok(());
    }

    values.push(SqlValue::Integer(id));
    let sql = format!("UPDATE jobs SET {} WHERE id=?", sets.join(", "));
    let affected = conn.execute(&sql, params_from_iter(values))?;
    if affected == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

/// Fetch the most recent jobs, newest first.
///
/// Ordering is fully deterministic: the later of started_at/created_at
/// descending, then id descending as the tie-break. `limit` is clamped to
/// at least 1. An empty store yields an empty vec.
pub fn fetch_jobs(conn: &Connection, limit: u32) -> Result<Vec<Job>, StoreError> {
    let limit = limit.max(1);
    let mut stmt = conn.prepare(
        "SELECT id, task, status, repo, run_id, session_id, mode, tier, cache_status,
                created_at, started_at, completed_at, result_path, log_path, meta_path,
                summary_path, error
         FROM jobs
         ORDER BY COALESCE(started_at, created_at) DESC, id DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], Job::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
