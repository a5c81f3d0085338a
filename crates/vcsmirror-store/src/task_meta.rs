//! Task-meta rows: the persistent queue and result backend.
//!
//! A row is inserted `PENDING`, claimed `STARTED` by exactly one worker
//! and finished with one of the ready states. `chain_next` carries the
//! signatures still to run after this one succeeds.

use crate::db::{opt_sql_ts, opt_ts_col, to_sql_ts, ts_col};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::str::FromStr;
use uuid::Uuid;
use vcsmirror_core::{TaskOptions, TaskSignature, TaskStatus};

const COLUMNS: &str = "task_id, name, args, kwargs, options, queue, priority, status, result, \
     traceback, error_code, parent_id, chain_next, created_at, eta, expires, claimed_at, attempts, \
     date_done";

const READY_STATES: &str = "('SUCCESS', 'FAILURE', 'IGNORED', 'REVOKED')";

/// One task invocation and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    /// Record id handed out as the task handle.
    pub task_id: Uuid,
    /// Name, arguments and delivery options.
    pub signature: TaskSignature,
    /// Queue the row waits in.
    pub queue: String,
    /// Current state.
    pub status: TaskStatus,
    /// JSON result of a successful run.
    pub result: Option<String>,
    /// Failure details.
    pub traceback: Option<String>,
    /// Error code of a failed run.
    pub error_code: Option<String>,
    /// Task this one was chained after.
    pub parent_id: Option<Uuid>,
    /// Links still to run after this one.
    pub chain_next: Vec<TaskSignature>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Not claimable before this time.
    pub eta: Option<DateTime<Utc>>,
    /// Discarded when claimed after this time.
    pub expires: Option<DateTime<Utc>>,
    /// When the current attempt started, refreshed while its handler runs.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Number of claims so far.
    pub attempts: u32,
    /// When the row reached a ready state.
    pub date_done: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Whether the task has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        Uuid::parse_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let task_id = uuid_col(row, 0)?.ok_or(rusqlite::Error::InvalidColumnType(
        0,
        "task_id".into(),
        Type::Null,
    ))?;
    let status: String = row.get(7)?;
    let status = TaskStatus::from_str(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(StoreError::decode("status", e)))
    })?;
    let options: TaskOptions = json_col(row, 4)?;
    let attempts: i64 = row.get(17)?;
    Ok(TaskRecord {
        task_id,
        signature: TaskSignature::new(row.get::<_, String>(1)?)
            .with_args(json_col(row, 2)?)
            .with_kwargs(json_col(row, 3)?)
            .with_options(options),
        queue: row.get(5)?,
        status,
        result: row.get(8)?,
        traceback: row.get(9)?,
        error_code: row.get(10)?,
        parent_id: uuid_col(row, 11)?,
        chain_next: json_col(row, 12)?,
        created_at: ts_col(row, 13)?,
        eta: opt_ts_col(row, 14)?,
        expires: opt_ts_col(row, 15)?,
        claimed_at: opt_ts_col(row, 16)?,
        attempts: attempts.max(0) as u32,
        date_done: opt_ts_col(row, 18)?,
    })
}

/// Values for a new pending row.
#[derive(Debug, Clone)]
pub struct NewTaskRecord<'a> {
    /// Record id.
    pub task_id: Uuid,
    /// What to run.
    pub signature: &'a TaskSignature,
    /// Queue to wait in.
    pub queue: &'a str,
    /// Task this one is chained after.
    pub parent_id: Option<Uuid>,
    /// Links to run after this one succeeds.
    pub chain_next: &'a [TaskSignature],
    /// Not claimable before this time.
    pub eta: Option<DateTime<Utc>>,
}

/// Task-meta rows.
#[derive(Debug, Clone, Copy)]
pub struct TaskMetaRepo<'c> {
    conn: &'c Connection,
}

impl<'c> TaskMetaRepo<'c> {
    /// View over a connection or transaction.
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert a pending row.
    ///
    /// # Errors
    /// Returns error if the id is taken or the payload cannot be encoded.
    pub fn insert_pending(&self, new: &NewTaskRecord<'_>) -> Result<()> {
        let sig = new.signature;
        self.conn.execute(
            "INSERT INTO task_meta
                (task_id, name, args, kwargs, options, queue, priority, status, parent_id,
                 chain_next, created_at, eta, expires)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PENDING', ?8, ?9, ?10, ?11, ?12)",
            params![
                new.task_id.to_string(),
                sig.name,
                serde_json::to_string(&sig.args)?,
                serde_json::to_string(&sig.kwargs)?,
                serde_json::to_string(&sig.options)?,
                new.queue,
                sig.options.priority.unwrap_or(0),
                new.parent_id.map(|id| id.to_string()),
                serde_json::to_string(new.chain_next)?,
                to_sql_ts(Utc::now()),
                opt_sql_ts(new.eta),
                opt_sql_ts(sig.options.expires),
            ],
        )?;
        Ok(())
    }

    /// Claim the next runnable row of `queue`: highest priority, then oldest.
    ///
    /// Run inside [`Store::write`](crate::Store::write) so that two workers
    /// never claim the same row.
    ///
    /// # Errors
    /// Returns error on driver failure or an undecodable row.
    pub fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<TaskRecord>> {
        let now_ts = to_sql_ts(now);
        let task_id: Option<String> = self
            .conn
            .query_row(
                "SELECT task_id FROM task_meta
                 WHERE status = 'PENDING' AND queue = ?1 AND (eta IS NULL OR eta <= ?2)
                 ORDER BY priority DESC, id
                 LIMIT 1",
                params![queue, now_ts],
                |row| row.get(0),
            )
            .optional()?;
        let Some(task_id) = task_id else {
            return Ok(None);
        };

        let claimed = self.conn.execute(
            "UPDATE task_meta SET status = 'STARTED', claimed_at = ?2, attempts = attempts + 1
             WHERE task_id = ?1 AND status = 'PENDING'",
            params![task_id, now_ts],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        self.select(&task_id)
    }

    /// Record the outcome of a run.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the row is gone.
    pub fn mark_finished(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        result: Option<&str>,
        traceback: Option<&str>,
        error_code: Option<&str>,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE task_meta SET status = ?2, result = ?3, traceback = ?4, error_code = ?5,
                date_done = ?6
             WHERE task_id = ?1",
            params![
                task_id.to_string(),
                status.as_str(),
                result,
                traceback,
                error_code,
                to_sql_ts(Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("task", task_id));
        }
        Ok(())
    }

    /// Revoke a row that has not started. Returns `false` otherwise.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn revoke(&self, task_id: Uuid, reason: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE task_meta SET status = 'REVOKED', traceback = ?2, date_done = ?3
             WHERE task_id = ?1 AND status = 'PENDING'",
            params![task_id.to_string(), reason, to_sql_ts(Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Fetch a row.
    ///
    /// # Errors
    /// Returns error on driver failure or an undecodable row.
    pub fn get(&self, task_id: Uuid) -> Result<Option<TaskRecord>> {
        self.select(&task_id.to_string())
    }

    fn select(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM task_meta WHERE task_id = ?1"),
                params![task_id],
                record_from_row,
            )
            .optional()?)
    }

    /// Mark a `STARTED` row as still running at `now`.
    ///
    /// Returns `false` once the row has left `STARTED`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn heartbeat(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE task_meta SET claimed_at = ?2 WHERE task_id = ?1 AND status = 'STARTED'",
            params![task_id.to_string(), to_sql_ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Return rows claimed (or last heartbeat) before `claimed_before` and
    /// never finished to `PENDING`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE task_meta SET status = 'PENDING', claimed_at = NULL
             WHERE status = 'STARTED' AND claimed_at < ?1",
            params![to_sql_ts(claimed_before)],
        )?)
    }

    /// Delete ready rows finished before `done_before`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn purge_finished(&self, done_before: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            &format!(
                "DELETE FROM task_meta WHERE status IN {READY_STATES} AND date_done < ?1"
            ),
            params![to_sql_ts(done_before)],
        )?)
    }

    /// Row counts per state.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn count_by_status(&self) -> Result<Vec<(TaskStatus, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM task_meta GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(status, count)| {
                TaskStatus::from_str(&status)
                    .map(|status| (status, count))
                    .map_err(|e| StoreError::decode("status", e))
            })
            .collect()
    }

    /// Most recent rows, newest first.
    ///
    /// # Errors
    /// Returns error on driver failure or an undecodable row.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM task_meta ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
