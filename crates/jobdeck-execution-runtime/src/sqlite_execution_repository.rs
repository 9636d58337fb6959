//! SQLite-backed execution repository.
//!
//! A fresh database gets the current schema. An older file keeps whatever
//! columns it has; the repository probes them once at open and only reads or
//! writes the optional columns that exist.

#![cfg(feature = "sqlite-persistence")]

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use jobdeck_kernel::identity::ExecutionId;
use jobdeck_kernel::DeckError;

use crate::capabilities::{Capability, ColumnCatalog, SchemaCapabilities, SchemaCapabilityProbe};
use crate::models::{ErrorEvent, ExecutionRecord, JobSummary};
use crate::repository::ExecutionRepository;

pub const JOBS_TABLE: &str = "jobdeck_jobs";
pub const EXECUTIONS_TABLE: &str = "jobdeck_executions";

const BASE_EXECUTION_COLUMNS: &str =
    "id, active_job_id, created_at, scheduled_at, finished_at, serialized_params, error";

/// End-of-attempt facts written exactly once per execution row.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionOutcome {
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    pub error_backtrace: Option<Vec<String>>,
    pub error_event: Option<ErrorEvent>,
    pub duration: Option<Duration>,
}

impl ExecutionOutcome {
    pub fn succeeded(finished_at: DateTime<Utc>) -> Self {
        Self {
            finished_at,
            error: None,
            error_backtrace: None,
            error_event: None,
            duration: None,
        }
    }

    pub fn failed(finished_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::succeeded(finished_at)
        }
    }

    pub fn with_backtrace(mut self, frames: Vec<String>) -> Self {
        self.error_backtrace = Some(frames);
        self
    }

    pub fn with_error_event(mut self, event: ErrorEvent) -> Self {
        self.error_event = Some(event);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

#[derive(Clone)]
struct SqliteColumnCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl ColumnCatalog for SqliteColumnCatalog {
    fn column_names(&self, table: &str) -> Result<Vec<String>, DeckError> {
        let conn = lock(&self.conn)?;
        table_columns(&conn, table)
    }
}

#[derive(Clone)]
pub struct SqliteExecutionRepository {
    conn: Arc<Mutex<Connection>>,
    capabilities: SchemaCapabilities,
}

impl SqliteExecutionRepository {
    /// Open (creating if needed) the database and probe its executions table.
    pub fn new(db_path: &str) -> Result<Self, DeckError> {
        let conn = open_connection(db_path)?;
        let probe = SchemaCapabilityProbe::new(
            SqliteColumnCatalog { conn: conn.clone() },
            EXECUTIONS_TABLE,
        );
        let capabilities = probe.capabilities();
        log::debug!(
            "opened sqlite execution repo at {} with capabilities {:?}",
            db_path,
            capabilities
        );
        Ok(Self { conn, capabilities })
    }

    /// Open with pinned capabilities. The probe and its migration warnings
    /// are skipped, but every pinned column must exist in the executions
    /// table; otherwise this fails with [DeckError::Config].
    pub fn open_pinned(
        db_path: &str,
        capabilities: SchemaCapabilities,
    ) -> Result<Self, DeckError> {
        let conn = open_connection(db_path)?;
        let columns = {
            let guard = lock(&conn)?;
            table_columns(&guard, EXECUTIONS_TABLE)?
        };
        let missing: Vec<&'static str> = Capability::ALL
            .into_iter()
            .filter(|capability| capabilities.supports(*capability))
            .map(|capability| capability.column())
            .filter(|column| !columns.iter().any(|name| name == column))
            .collect();
        if !missing.is_empty() {
            return Err(DeckError::Config(format!(
                "pinned schema needs {} column(s) {} that are missing; \
                 apply pending migrations or let the schema be probed",
                EXECUTIONS_TABLE,
                missing.join(", ")
            )));
        }
        log::debug!(
            "opened sqlite execution repo at {} with pinned capabilities {:?}",
            db_path,
            capabilities
        );
        Ok(Self { conn, capabilities })
    }

    /// Add any optional executions column that is missing. Returns the added
    /// column names. Capabilities of this handle are unchanged; reopen to use
    /// the new columns.
    pub fn apply_pending_migrations(&self) -> Result<Vec<&'static str>, DeckError> {
        let conn = lock(&self.conn)?;
        let mut added = Vec::new();
        for capability in Capability::ALL {
            let column = capability.column();
            let column_def = match capability {
                Capability::ErrorBacktrace => "TEXT NULL",
                Capability::ErrorEvent | Capability::MonotonicDuration => "INTEGER NULL",
            };
            if add_column_if_missing(&conn, EXECUTIONS_TABLE, column, column_def)? {
                log::info!("added column {}.{}", EXECUTIONS_TABLE, column);
                added.push(column);
            }
        }
        Ok(added)
    }

    pub fn upsert_job(
        &self,
        active_job_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), DeckError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO jobdeck_jobs (active_job_id, created_at, finished_at)
             VALUES (?1, ?2, NULL)",
            params![active_job_id, dt_to_ms(created_at)],
        )
        .map_err(|e| DeckError::Store(format!("upsert job: {}", e)))?;
        Ok(())
    }

    /// Mark the job concluded. A job that already finished keeps its time.
    pub fn finish_job(
        &self,
        active_job_id: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DeckError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE jobdeck_jobs SET finished_at = ?2
             WHERE active_job_id = ?1 AND finished_at IS NULL",
            params![active_job_id, dt_to_ms(finished_at)],
        )
        .map_err(|e| DeckError::Store(format!("finish job: {}", e)))?;
        Ok(())
    }

    /// Append a row for a starting attempt.
    pub fn insert_execution(
        &self,
        active_job_id: &str,
        created_at: DateTime<Utc>,
        scheduled_at: Option<DateTime<Utc>>,
        serialized_params: &Map<String, Value>,
    ) -> Result<ExecutionId, DeckError> {
        let params_json = serde_json::to_string(serialized_params)
            .map_err(|e| DeckError::Decode(format!("encode serialized_params: {}", e)))?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO jobdeck_executions
               (active_job_id, created_at, scheduled_at, finished_at, serialized_params, error)
             VALUES (?1, ?2, ?3, NULL, ?4, NULL)",
            params![
                active_job_id,
                dt_to_ms(created_at),
                scheduled_at.map(dt_to_ms),
                params_json
            ],
        )
        .map_err(|e| DeckError::Store(format!("insert execution: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    /// Record the end of an attempt. Only succeeds while the row is still
    /// unfinished; optional fields are dropped when the schema lacks them.
    pub fn finish_execution(
        &self,
        id: ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> Result<(), DeckError> {
        let mut assignments = vec!["finished_at = ?", "error = ?"];
        let mut values = vec![
            SqlValue::Integer(dt_to_ms(outcome.finished_at)),
            outcome
                .error
                .clone()
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
        ];
        if self.capabilities.error_backtrace {
            assignments.push("error_backtrace = ?");
            values.push(match &outcome.error_backtrace {
                Some(frames) => SqlValue::Text(
                    serde_json::to_string(frames)
                        .map_err(|e| DeckError::Decode(format!("encode backtrace: {}", e)))?,
                ),
                None => SqlValue::Null,
            });
        }
        if self.capabilities.error_event {
            assignments.push("error_event = ?");
            values.push(
                outcome
                    .error_event
                    .map(|event| SqlValue::Integer(event.code()))
                    .unwrap_or(SqlValue::Null),
            );
        }
        if self.capabilities.monotonic_duration {
            assignments.push("duration = ?");
            values.push(
                outcome
                    .duration
                    .map(|d| SqlValue::Integer(d.num_milliseconds()))
                    .unwrap_or(SqlValue::Null),
            );
        }
        values.push(SqlValue::Integer(id));

        let sql = format!(
            "UPDATE jobdeck_executions SET {} WHERE id = ? AND finished_at IS NULL",
            assignments.join(", ")
        );
        let conn = lock(&self.conn)?;
        let changed = conn
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| DeckError::Store(format!("finish execution: {}", e)))?;
        if changed == 0 {
            return Err(DeckError::Store(format!(
                "execution {} is missing or already finished",
                id
            )));
        }
        Ok(())
    }

    fn select_columns(&self) -> String {
        let mut columns = BASE_EXECUTION_COLUMNS.to_string();
        for capability in Capability::ALL {
            if self.capabilities.supports(capability) {
                columns.push_str(", ");
                columns.push_str(capability.column());
            }
        }
        columns
    }

    fn query_executions(
        &self,
        active_job_id: &str,
        finished_only: bool,
    ) -> Result<Vec<ExecutionRecord>, DeckError> {
        let sql = format!(
            "SELECT {} FROM jobdeck_executions
             WHERE active_job_id = ?1{}
             ORDER BY created_at ASC, id ASC",
            self.select_columns(),
            if finished_only {
                " AND finished_at IS NOT NULL"
            } else {
                ""
            }
        );
        let capabilities = self.capabilities;
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DeckError::Store(format!("prepare executions for job: {}", e)))?;
        let rows = stmt
            .query_map(params![active_job_id], |row| read_row(row, capabilities))
            .map_err(|e| DeckError::Store(format!("query executions for job: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(map_rusqlite_err)?.into_record()?);
        }
        Ok(records)
    }
}

impl ExecutionRepository for SqliteExecutionRepository {
    fn schema_capabilities(&self) -> SchemaCapabilities {
        self.capabilities
    }

    fn job_summary(&self, active_job_id: &str) -> Result<Option<JobSummary>, DeckError> {
        let conn = lock(&self.conn)?;
        let row = conn
            .query_row(
                "SELECT active_job_id, finished_at FROM jobdeck_jobs WHERE active_job_id = ?1",
                params![active_job_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()
            .map_err(|e| DeckError::Store(format!("query job summary: {}", e)))?;
        row.map(|(active_job_id, finished_at)| {
            Ok(JobSummary {
                active_job_id,
                finished_at: finished_at.map(ms_to_dt).transpose()?,
            })
        })
        .transpose()
    }

    fn executions_for_job(&self, active_job_id: &str) -> Result<Vec<ExecutionRecord>, DeckError> {
        self.query_executions(active_job_id, false)
    }

    fn finished_executions(&self, active_job_id: &str) -> Result<Vec<ExecutionRecord>, DeckError> {
        self.query_executions(active_job_id, true)
    }
}

struct RawExecutionRow {
    id: i64,
    active_job_id: String,
    created_at_ms: i64,
    scheduled_at_ms: Option<i64>,
    finished_at_ms: Option<i64>,
    serialized_params: String,
    error: Option<String>,
    error_backtrace: Option<String>,
    error_event: Option<i64>,
    duration_ms: Option<i64>,
}

fn read_row(row: &Row<'_>, capabilities: SchemaCapabilities) -> rusqlite::Result<RawExecutionRow> {
    Ok(RawExecutionRow {
        id: row.get("id")?,
        active_job_id: row.get("active_job_id")?,
        created_at_ms: row.get("created_at")?,
        scheduled_at_ms: row.get("scheduled_at")?,
        finished_at_ms: row.get("finished_at")?,
        serialized_params: row.get("serialized_params")?,
        error: row.get("error")?,
        error_backtrace: if capabilities.error_backtrace {
            row.get("error_backtrace")?
        } else {
            None
        },
        error_event: if capabilities.error_event {
            row.get("error_event")?
        } else {
            None
        },
        duration_ms: if capabilities.monotonic_duration {
            row.get("duration")?
        } else {
            None
        },
    })
}

impl RawExecutionRow {
    fn into_record(self) -> Result<ExecutionRecord, DeckError> {
        let serialized_params = match serde_json::from_str::<Value>(&self.serialized_params) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(DeckError::Decode(format!(
                    "execution {} serialized_params is not an object: {}",
                    self.id, other
                )))
            }
            Err(e) => {
                return Err(DeckError::Decode(format!(
                    "execution {} serialized_params: {}",
                    self.id, e
                )))
            }
        };
        let error_backtrace = self
            .error_backtrace
            .map(|raw| {
                serde_json::from_str::<Vec<String>>(&raw).map_err(|e| {
                    DeckError::Decode(format!("execution {} error_backtrace: {}", self.id, e))
                })
            })
            .transpose()?;
        let error_event = self.error_event.and_then(|code| {
            let event = ErrorEvent::from_code(code);
            if event.is_none() {
                log::debug!("execution {} has unknown error_event {}", self.id, code);
            }
            event
        });

        Ok(ExecutionRecord {
            id: self.id,
            active_job_id: self.active_job_id,
            created_at: ms_to_dt(self.created_at_ms)?,
            scheduled_at: self.scheduled_at_ms.map(ms_to_dt).transpose()?,
            finished_at: self.finished_at_ms.map(ms_to_dt).transpose()?,
            serialized_params,
            error: self.error,
            error_backtrace,
            error_event,
            duration: self.duration_ms.map(Duration::milliseconds),
        })
    }
}

fn open_connection(db_path: &str) -> Result<Arc<Mutex<Connection>>, DeckError> {
    let conn = Connection::open(db_path)
        .map_err(|e| DeckError::Store(format!("open sqlite execution repo: {}", e)))?;
    let conn = Arc::new(Mutex::new(conn));
    ensure_schema(&conn)?;
    Ok(conn)
}

fn ensure_schema(conn: &Arc<Mutex<Connection>>) -> Result<(), DeckError> {
    let conn = lock(conn)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS jobdeck_jobs (
          active_job_id TEXT PRIMARY KEY,
          created_at INTEGER NOT NULL,
          finished_at INTEGER NULL
        );
        CREATE TABLE IF NOT EXISTS jobdeck_executions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          active_job_id TEXT NOT NULL,
          created_at INTEGER NOT NULL,
          scheduled_at INTEGER NULL,
          finished_at INTEGER NULL,
          serialized_params TEXT NOT NULL,
          error TEXT NULL,
          error_backtrace TEXT NULL,
          error_event INTEGER NULL,
          duration INTEGER NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobdeck_executions_job_created
          ON jobdeck_executions(active_job_id, created_at);
        "#,
    )
    .map_err(|e| DeckError::Store(format!("init sqlite execution schema: {}", e)))?;
    Ok(())
}

fn lock(conn: &Arc<Mutex<Connection>>) -> Result<MutexGuard<'_, Connection>, DeckError> {
    conn.lock()
        .map_err(|_| DeckError::Store("sqlite execution repo lock poisoned".to_string()))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, DeckError> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn
        .prepare(&pragma)
        .map_err(|e| DeckError::Store(format!("prepare table_info {}: {}", table, e)))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| DeckError::Store(format!("query table_info {}: {}", table, e)))?;
    let mut names = Vec::new();
    for col in cols {
        names.push(col.map_err(map_rusqlite_err)?);
    }
    Ok(names)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    column_def: &str,
) -> Result<bool, DeckError> {
    if table_columns(conn, table)?.iter().any(|name| name == column) {
        return Ok(false);
    }
    let alter = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def);
    conn.execute(&alter, [])
        .map_err(|e| DeckError::Store(format!("alter table {} add {}: {}", table, column, e)))?;
    Ok(true)
}

fn map_rusqlite_err(err: rusqlite::Error) -> DeckError {
    DeckError::Store(format!("sqlite execution repo: {}", err))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> Result<DateTime<Utc>, DeckError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| DeckError::Decode(format!("timestamp out of range: {}", ms)))
}
