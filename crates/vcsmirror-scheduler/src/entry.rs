//! In-memory scheduler entries built from periodic task rows.

use crate::error::{Result, SchedulerError};
use crate::schedule::{DEFAULT_MAX_INTERVAL, DueState, Schedule};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use vcsmirror_core::{TaskOptions, TaskSignature};
use vcsmirror_store::PeriodicTaskRow;

/// Delivery options of an entry, one field per stored column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Routing queue.
    pub queue: Option<String>,
    /// Routing exchange.
    pub exchange: Option<String>,
    /// Routing key.
    pub routing_key: Option<String>,
    /// Dispatch priority.
    pub priority: Option<i32>,
    /// Message headers.
    pub headers: Map<String, Value>,
    /// Absolute expiry; wins over `expire_seconds`.
    pub expires: Option<DateTime<Utc>>,
    /// Expiry relative to dispatch.
    pub expire_seconds: Option<i64>,
    /// Name of the periodic task.
    pub periodic_task_name: String,
}

impl EntryOptions {
    /// Map a row's routing columns.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidEntry`] if the headers are not a JSON
    /// object.
    pub fn from_row(row: &PeriodicTaskRow) -> Result<Self> {
        let headers = decode_object(&row.name, "headers", &row.headers)?;
        Ok(Self {
            queue: row.queue.clone().filter(|q| !q.is_empty()),
            exchange: row.exchange.clone().filter(|e| !e.is_empty()),
            routing_key: row.routing_key.clone().filter(|k| !k.is_empty()),
            priority: row.priority,
            headers,
            expires: row.expires,
            expire_seconds: row.expire_seconds,
            periodic_task_name: row.name.clone(),
        })
    }

    /// Options for a task dispatched at `now`.
    #[must_use]
    pub fn task_options(&self, now: DateTime<Utc>) -> TaskOptions {
        let expires = self
            .expires
            .or_else(|| {
                self.expire_seconds
                    .and_then(Duration::try_seconds)
                    .and_then(|after| now.checked_add_signed(after))
            });
        TaskOptions {
            queue: self.queue.clone(),
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            priority: self.priority,
            headers: self.headers.clone(),
            expires,
            periodic_task_name: Some(self.periodic_task_name.clone()),
        }
    }
}

fn decode_object(name: &str, column: &str, raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SchedulerError::invalid_entry(
            name,
            format!("{column} must be an object, got {other}"),
        )),
        Err(e) => Err(SchedulerError::invalid_entry(name, format!("{column}: {e}"))),
    }
}

fn decode_array(name: &str, column: &str, raw: &str) -> Result<Vec<Value>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(SchedulerError::invalid_entry(
            name,
            format!("{column} must be an array, got {other}"),
        )),
        Err(e) => Err(SchedulerError::invalid_entry(name, format!("{column}: {e}"))),
    }
}

/// Outcome of checking an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCheck {
    /// Evaluated against its schedule.
    Scheduled(DueState),
    /// A one-off entry that already ran; disable it.
    Retire,
}

/// One periodic task as the scheduler tracks it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    /// Periodic task row id.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Registered task to dispatch.
    pub task: String,
    /// When it fires.
    pub schedule: Schedule,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
    /// Delivery options.
    pub options: EntryOptions,
    /// Run once, then disable.
    pub one_off: bool,
    /// Whether the entry may fire.
    pub enabled: bool,
    /// Not due before this time.
    pub start_time: Option<DateTime<Utc>>,
    /// Last dispatch; load time when the row never ran.
    pub last_run_at: DateTime<Utc>,
    /// Number of dispatches.
    pub total_run_count: i64,
}

impl ScheduleEntry {
    /// Build an entry from a row and its resolved schedule.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidEntry`] if the stored arguments or
    /// headers cannot be decoded.
    pub fn from_row(row: &PeriodicTaskRow, schedule: Schedule, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name.clone(),
            task: row.task.clone(),
            schedule,
            args: decode_array(&row.name, "args", &row.args)?,
            kwargs: decode_object(&row.name, "kwargs", &row.kwargs)?,
            options: EntryOptions::from_row(row)?,
            one_off: row.one_off,
            enabled: row.enabled,
            start_time: row.start_time,
            last_run_at: row.last_run_at.unwrap_or(now),
            total_run_count: row.total_run_count,
        })
    }

    /// Decide whether the entry runs at `now`.
    #[must_use]
    pub fn check(&self, now: DateTime<Utc>) -> EntryCheck {
        if !self.enabled {
            return EntryCheck::Scheduled(DueState::not_due(DEFAULT_MAX_INTERVAL));
        }
        if let Some(start) = self.start_time.filter(|start| *start > now) {
            return EntryCheck::Scheduled(DueState::not_due(start - now));
        }
        if self.one_off && self.total_run_count > 0 {
            return EntryCheck::Retire;
        }
        EntryCheck::Scheduled(self.schedule.is_due(self.last_run_at, now))
    }

    /// The entry after a dispatch at `now`.
    #[must_use]
    pub fn next(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_run_at: now,
            total_run_count: self.total_run_count + 1,
            ..self.clone()
        }
    }

    /// Task to enqueue for a dispatch at `now`.
    #[must_use]
    pub fn signature(&self, now: DateTime<Utc>) -> TaskSignature {
        TaskSignature::new(self.task.clone())
            .with_args(self.args.clone())
            .with_kwargs(self.kwargs.clone())
            .with_options(self.options.task_options(now))
    }
}
