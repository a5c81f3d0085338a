//! Periodic tasks, their schedule rows and the schedule version.
//!
//! Every mutation of the desired schedule advances `periodic_tasks.last_update`
//! so that running schedulers rebuild their entry map. Run-state saves
//! (`last_run_at`, `total_run_count`) do not.

use crate::db::{opt_sql_ts, opt_ts_col, parse_sql_ts, to_sql_ts};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Key of the single schedule-version row.
const VERSION_IDENT: i64 = 1;

/// Longest accepted interval: one hundred years.
pub const MAX_INTERVAL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Unit of an interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalPeriod {
    /// Days.
    Days,
    /// Hours.
    Hours,
    /// Minutes.
    Minutes,
    /// Seconds.
    Seconds,
    /// Microseconds.
    Microseconds,
}

impl IntervalPeriod {
    /// Stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Hours => "hours",
            Self::Minutes => "minutes",
            Self::Seconds => "seconds",
            Self::Microseconds => "microseconds",
        }
    }

    /// Length of `every` units, `None` when it overflows a [`Duration`].
    #[must_use]
    pub fn duration(self, every: i64) -> Option<Duration> {
        match self {
            Self::Days => Duration::try_days(every),
            Self::Hours => Duration::try_hours(every),
            Self::Minutes => Duration::try_minutes(every),
            Self::Seconds => Duration::try_seconds(every),
            Self::Microseconds => Some(Duration::microseconds(every)),
        }
    }

    /// Length of `every` units if it is positive and at most
    /// [`MAX_INTERVAL_SECS`].
    ///
    /// # Errors
    /// Returns [`StoreError::Constraint`] otherwise.
    pub fn checked_interval(self, every: i64) -> Result<Duration> {
        self.duration(every)
            .filter(|d| *d > Duration::zero() && d.num_seconds() <= MAX_INTERVAL_SECS)
            .ok_or_else(|| {
                StoreError::constraint(format!(
                    "interval of {every} {self} must be positive and at most 100 years"
                ))
            })
    }
}

impl fmt::Display for IntervalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalPeriod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "days" => Ok(Self::Days),
            "hours" => Ok(Self::Hours),
            "minutes" => Ok(Self::Minutes),
            "seconds" => Ok(Self::Seconds),
            "microseconds" => Ok(Self::Microseconds),
            other => Err(StoreError::decode("period", format!("unknown period {other}"))),
        }
    }
}

/// A fixed-period schedule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSchedule {
    /// Row id.
    pub id: i64,
    /// Number of periods.
    pub every: i64,
    /// Period unit.
    pub period: IntervalPeriod,
}

impl IntervalSchedule {
    /// Time between runs.
    ///
    /// # Errors
    /// Returns [`StoreError::Constraint`] for a row outside the accepted
    /// range, which only a direct table write can produce.
    pub fn run_every(&self) -> Result<Duration> {
        self.period.checked_interval(self.every)
    }
}

/// The five calendar fields of a crontab, unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrontabFields {
    /// Minute field.
    pub minute: String,
    /// Hour field.
    pub hour: String,
    /// Day-of-month field.
    pub day_of_month: String,
    /// Month field.
    pub month_of_year: String,
    /// Day-of-week field.
    pub day_of_week: String,
}

impl Default for CrontabFields {
    fn default() -> Self {
        Self {
            minute: "*".into(),
            hour: "*".into(),
            day_of_month: "*".into(),
            month_of_year: "*".into(),
            day_of_week: "*".into(),
        }
    }
}

impl fmt::Display for CrontabFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }
}

/// A calendar schedule row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrontabSchedule {
    /// Row id.
    pub id: i64,
    /// Field values.
    pub fields: CrontabFields,
}

/// A periodic task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicTaskRow {
    /// Row id.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Registered task to dispatch.
    pub task: String,
    /// Interval schedule, exclusive with `crontab_id`.
    pub interval_id: Option<i64>,
    /// Crontab schedule, exclusive with `interval_id`.
    pub crontab_id: Option<i64>,
    /// JSON positional arguments.
    pub args: String,
    /// JSON keyword arguments.
    pub kwargs: String,
    /// Routing queue.
    pub queue: Option<String>,
    /// Routing exchange.
    pub exchange: Option<String>,
    /// Routing key.
    pub routing_key: Option<String>,
    /// JSON message headers.
    pub headers: String,
    /// Dispatch priority.
    pub priority: Option<i32>,
    /// Absolute expiry of dispatched tasks.
    pub expires: Option<DateTime<Utc>>,
    /// Relative expiry of dispatched tasks.
    pub expire_seconds: Option<i64>,
    /// Run once, then disable.
    pub one_off: bool,
    /// Not due before this time.
    pub start_time: Option<DateTime<Utc>>,
    /// Whether the scheduler considers the row.
    pub enabled: bool,
    /// Last dispatch.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Number of dispatches.
    pub total_run_count: i64,
    /// Free-form description.
    pub description: String,
}

/// Values for a new periodic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPeriodicTask {
    /// Unique name.
    pub name: String,
    /// Registered task to dispatch.
    pub task: String,
    /// Interval schedule.
    pub interval_id: Option<i64>,
    /// Crontab schedule.
    pub crontab_id: Option<i64>,
    /// JSON positional arguments.
    pub args: String,
    /// JSON keyword arguments.
    pub kwargs: String,
    /// Routing queue.
    pub queue: Option<String>,
    /// Routing exchange.
    pub exchange: Option<String>,
    /// Routing key.
    pub routing_key: Option<String>,
    /// JSON message headers.
    pub headers: String,
    /// Dispatch priority.
    pub priority: Option<i32>,
    /// Absolute expiry of dispatched tasks.
    pub expires: Option<DateTime<Utc>>,
    /// Relative expiry of dispatched tasks.
    pub expire_seconds: Option<i64>,
    /// Run once, then disable.
    pub one_off: bool,
    /// Not due before this time.
    pub start_time: Option<DateTime<Utc>>,
    /// Whether the scheduler considers the row.
    pub enabled: bool,
    /// Free-form description.
    pub description: String,
}

impl NewPeriodicTask {
    /// A task with empty arguments and no schedule yet.
    #[must_use]
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            interval_id: None,
            crontab_id: None,
            args: "[]".into(),
            kwargs: "{}".into(),
            queue: None,
            exchange: None,
            routing_key: None,
            headers: "{}".into(),
            priority: None,
            expires: None,
            expire_seconds: None,
            one_off: false,
            start_time: None,
            enabled: true,
            description: String::new(),
        }
    }

    /// Attach a crontab schedule.
    #[must_use]
    pub const fn with_crontab(mut self, crontab_id: i64) -> Self {
        self.crontab_id = Some(crontab_id);
        self
    }

    /// Attach an interval schedule.
    #[must_use]
    pub const fn with_interval(mut self, interval_id: i64) -> Self {
        self.interval_id = Some(interval_id);
        self
    }

    /// Replace the JSON positional arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }
}

/// Reject anything but exactly one schedule kind.
///
/// # Errors
/// Returns [`StoreError::Constraint`] when both or neither are set.
pub fn check_schedule_kind(interval_id: Option<i64>, crontab_id: Option<i64>) -> Result<()> {
    match (interval_id, crontab_id) {
        (Some(_), Some(_)) => Err(StoreError::constraint(
            "only one of interval or crontab must be set",
        )),
        (None, None) => Err(StoreError::constraint(
            "one of interval or crontab must be set",
        )),
        _ => Ok(()),
    }
}

const TASK_COLUMNS: &str = "id, name, task, interval_id, crontab_id, args, kwargs, queue, \
     exchange, routing_key, headers, priority, expires, expire_seconds, one_off, start_time, \
     enabled, last_run_at, total_run_count, description";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<PeriodicTaskRow> {
    Ok(PeriodicTaskRow {
        id: row.get(0)?,
        name: row.get(1)?,
        task: row.get(2)?,
        interval_id: row.get(3)?,
        crontab_id: row.get(4)?,
        args: row.get(5)?,
        kwargs: row.get(6)?,
        queue: row.get(7)?,
        exchange: row.get(8)?,
        routing_key: row.get(9)?,
        headers: row.get(10)?,
        priority: row.get(11)?,
        expires: opt_ts_col(row, 12)?,
        expire_seconds: row.get(13)?,
        one_off: row.get(14)?,
        start_time: opt_ts_col(row, 15)?,
        enabled: row.get(16)?,
        last_run_at: opt_ts_col(row, 17)?,
        total_run_count: row.get(18)?,
        description: row.get(19)?,
    })
}

fn crontab_from_row(row: &Row<'_>) -> rusqlite::Result<CrontabSchedule> {
    Ok(CrontabSchedule {
        id: row.get(0)?,
        fields: CrontabFields {
            minute: row.get(1)?,
            hour: row.get(2)?,
            day_of_week: row.get(3)?,
            day_of_month: row.get(4)?,
            month_of_year: row.get(5)?,
        },
    })
}

fn interval_from_row(row: &Row<'_>) -> rusqlite::Result<IntervalSchedule> {
    let period: String = row.get(2)?;
    let period = IntervalPeriod::from_str(&period)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(IntervalSchedule {
        id: row.get(0)?,
        every: row.get(1)?,
        period,
    })
}

/// The periodic-task tables.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleStore<'c> {
    conn: &'c Connection,
    bump_each: bool,
}

impl<'c> ScheduleStore<'c> {
    /// View over a connection or transaction.
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            bump_each: true,
        }
    }

    /// View whose mutations leave the version alone; the caller bumps it
    /// once with [`bump_version`](Self::bump_version) after a batch.
    #[must_use]
    pub const fn batched(conn: &'c Connection) -> Self {
        Self {
            conn,
            bump_each: false,
        }
    }

    fn changed(&self) -> Result<()> {
        if self.bump_each {
            self.bump_version(Utc::now())?;
        }
        Ok(())
    }

    /// Insert a periodic task and bump the version.
    ///
    /// # Errors
    /// Returns [`StoreError::Constraint`] unless exactly one schedule kind is
    /// set, or if the name is taken.
    pub fn create_task(&self, new: &NewPeriodicTask) -> Result<PeriodicTaskRow> {
        check_schedule_kind(new.interval_id, new.crontab_id)?;
        self.conn.execute(
            "INSERT INTO periodic_task
                (name, task, interval_id, crontab_id, args, kwargs, queue, exchange, routing_key,
                 headers, priority, expires, expire_seconds, one_off, start_time, enabled,
                 description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                new.name,
                new.task,
                new.interval_id,
                new.crontab_id,
                new.args,
                new.kwargs,
                new.queue,
                new.exchange,
                new.routing_key,
                new.headers,
                new.priority,
                opt_sql_ts(new.expires),
                new.expire_seconds,
                new.one_off,
                opt_sql_ts(new.start_time),
                new.enabled,
                new.description,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.changed()?;
        debug!(id, name = %new.name, "periodic task created");
        self.require_task(id)
    }

    /// Move a task to another schedule and bump the version.
    ///
    /// # Errors
    /// Returns [`StoreError::Constraint`] unless exactly one schedule kind is
    /// set, [`StoreError::NotFound`] if the task is gone.
    pub fn set_schedule(&self, id: i64, interval_id: Option<i64>, crontab_id: Option<i64>) -> Result<()> {
        check_schedule_kind(interval_id, crontab_id)?;
        let changed = self.conn.execute(
            "UPDATE periodic_task SET interval_id = ?2, crontab_id = ?3 WHERE id = ?1",
            params![id, interval_id, crontab_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("periodic task", id));
        }
        self.changed()?;
        Ok(())
    }

    /// Delete a task and bump the version. Returns `false` if it was gone.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM periodic_task WHERE id = ?1", params![id])?;
        if changed > 0 {
            self.changed()?;
        }
        Ok(changed > 0)
    }

    /// Enable or disable a task, bumping the version only when asked.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the task is gone.
    pub fn set_enabled(&self, id: i64, enabled: bool, bump_version: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE periodic_task SET enabled = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("periodic task", id));
        }
        if bump_version {
            self.changed()?;
        }
        Ok(())
    }

    /// One-off tasks that ran are disabled with their counter reset.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the task is gone.
    pub fn retire_one_off(&self, id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE periodic_task SET enabled = 0, total_run_count = 0 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("periodic task", id));
        }
        self.changed()?;
        Ok(())
    }

    /// Persist dispatch bookkeeping for the task named `name`.
    ///
    /// Returns `false` if the row disappeared. Does not bump the version.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn save_run_state(
        &self,
        name: &str,
        last_run_at: DateTime<Utc>,
        total_run_count: i64,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE periodic_task SET last_run_at = ?2, total_run_count = ?3 WHERE name = ?1",
            params![name, to_sql_ts(last_run_at), total_run_count],
        )?;
        Ok(changed > 0)
    }

    /// All enabled tasks, by id.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn enabled_tasks(&self) -> Result<Vec<PeriodicTaskRow>> {
        self.query_tasks("WHERE enabled = 1 ORDER BY id", [])
    }

    /// All tasks, by id.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn list_tasks(&self) -> Result<Vec<PeriodicTaskRow>> {
        self.query_tasks("ORDER BY id", [])
    }

    fn query_tasks(&self, tail: &str, params: impl rusqlite::Params) -> Result<Vec<PeriodicTaskRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM periodic_task {tail}"))?;
        let rows = stmt
            .query_map(params, task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fetch a task.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn get_task(&self, id: i64) -> Result<Option<PeriodicTaskRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM periodic_task WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?)
    }

    fn require_task(&self, id: i64) -> Result<PeriodicTaskRow> {
        self.get_task(id)?
            .ok_or_else(|| StoreError::not_found("periodic task", id))
    }

    /// Fetch a task by its unique name.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn get_by_name(&self, name: &str) -> Result<Option<PeriodicTaskRow>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM periodic_task WHERE name = ?1"),
                params![name],
                task_from_row,
            )
            .optional()?)
    }

    /// The crontab row with exactly these field values, created if missing.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn find_or_create_crontab(&self, fields: &CrontabFields) -> Result<CrontabSchedule> {
        self.conn.execute(
            "INSERT OR IGNORE INTO crontab_schedule
                (minute, hour, day_of_week, day_of_month, month_of_year)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                fields.minute,
                fields.hour,
                fields.day_of_week,
                fields.day_of_month,
                fields.month_of_year,
            ],
        )?;
        Ok(self.conn.query_row(
            "SELECT id, minute, hour, day_of_week, day_of_month, month_of_year
             FROM crontab_schedule
             WHERE minute = ?1 AND hour = ?2 AND day_of_week = ?3 AND day_of_month = ?4
                AND month_of_year = ?5",
            params![
                fields.minute,
                fields.hour,
                fields.day_of_week,
                fields.day_of_month,
                fields.month_of_year,
            ],
            crontab_from_row,
        )?)
    }

    /// Fetch a crontab row.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn crontab(&self, id: i64) -> Result<Option<CrontabSchedule>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, minute, hour, day_of_week, day_of_month, month_of_year
                 FROM crontab_schedule WHERE id = ?1",
                params![id],
                crontab_from_row,
            )
            .optional()?)
    }

    /// Whether any periodic task references the crontab row.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn crontab_in_use(&self, id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM periodic_task WHERE crontab_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Delete the crontab row unless a task still references it.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn delete_crontab_if_unused(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM crontab_schedule
             WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM periodic_task WHERE crontab_id = ?1)",
            params![id],
        )?;
        Ok(changed > 0)
    }

    /// The interval row for `every` × `period`, created if missing.
    ///
    /// # Errors
    /// Returns [`StoreError::Constraint`] unless `every` is positive and the
    /// interval is at most [`MAX_INTERVAL_SECS`].
    pub fn find_or_create_interval(&self, every: i64, period: IntervalPeriod) -> Result<IntervalSchedule> {
        period.checked_interval(every)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO interval_schedule (every, period) VALUES (?1, ?2)",
            params![every, period.as_str()],
        )?;
        self.conn
            .query_row(
                "SELECT id, every, period FROM interval_schedule WHERE every = ?1 AND period = ?2",
                params![every, period.as_str()],
                interval_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::constraint(format!("invalid interval {every} {period}")))
    }

    /// Fetch an interval row.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn interval(&self, id: i64) -> Result<Option<IntervalSchedule>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, every, period FROM interval_schedule WHERE id = ?1",
                params![id],
                interval_from_row,
            )
            .optional()?)
    }

    /// Advance the schedule version to `now`, or one microsecond past the
    /// previous value if the clock has not moved.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn bump_version(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let now = now.trunc_subsecs(6);
        let next = match self.last_update()? {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        };
        self.conn.execute(
            "INSERT INTO periodic_tasks (ident, last_update) VALUES (?1, ?2)
             ON CONFLICT (ident) DO UPDATE SET last_update = excluded.last_update",
            params![VERSION_IDENT, to_sql_ts(next)],
        )?;
        Ok(next)
    }

    /// Current schedule version, `None` before the first change.
    ///
    /// # Errors
    /// Returns error on driver failure or a malformed value.
    pub fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT last_update FROM periodic_tasks WHERE ident = ?1",
                params![VERSION_IDENT],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| parse_sql_ts("last_update", &raw)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use pretty_assertions::assert_eq;

    fn daily() -> CrontabFields {
        CrontabFields {
            minute: "0".into(),
            hour: "4".into(),
            ..CrontabFields::default()
        }
    }

    #[test]
    fn crontab_rows_are_shared_by_value() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let schedules = ScheduleStore::new(tx);
                let a = schedules.find_or_create_crontab(&daily())?;
                let b = schedules.find_or_create_crontab(&daily())?;
                assert_eq!(a, b);
                assert_eq!(a.fields.to_string(), "0 4 * * *");
                let c = schedules.find_or_create_crontab(&CrontabFields::default())?;
                assert_ne!(a.id, c.id);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn version_is_strictly_monotonic() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let schedules = ScheduleStore::new(tx);
                assert_eq!(schedules.last_update()?, None);
                let now = Utc::now();
                let first = schedules.bump_version(now)?;
                let second = schedules.bump_version(now)?;
                let third = schedules.bump_version(now - Duration::hours(1))?;
                assert_eq!(first.timestamp_micros(), now.timestamp_micros());
                assert!(second > first);
                assert!(third > second);
                assert_eq!(schedules.last_update()?, Some(third));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn run_state_saves_leave_version_alone() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let schedules = ScheduleStore::new(tx);
                let crontab = schedules.find_or_create_crontab(&daily())?;
                let task = schedules
                    .create_task(&NewPeriodicTask::new("nightly", "backend_cleanup").with_crontab(crontab.id))?;
                let version = schedules.last_update()?;
                assert!(version.is_some());

                assert!(schedules.save_run_state("nightly", Utc::now(), 3)?);
                assert!(!schedules.save_run_state("gone", Utc::now(), 1)?);
                assert_eq!(schedules.last_update()?, version);
                assert_eq!(schedules.get_task(task.id)?.map(|t| t.total_run_count), Some(3));

                schedules.set_enabled(task.id, false, false)?;
                assert_eq!(schedules.last_update()?, version);
                assert!(schedules.enabled_tasks()?.is_empty());

                schedules.set_enabled(task.id, true, true)?;
                assert!(schedules.last_update()? > version);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn crontab_deleted_only_when_unreferenced() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let schedules = ScheduleStore::new(tx);
                let crontab = schedules.find_or_create_crontab(&daily())?;
                let a = schedules.create_task(&NewPeriodicTask::new("a", "t").with_crontab(crontab.id))?;
                let b = schedules.create_task(&NewPeriodicTask::new("b", "t").with_crontab(crontab.id))?;

                assert!(schedules.delete_task(a.id)?);
                assert!(!schedules.delete_crontab_if_unused(crontab.id)?);
                assert!(schedules.delete_task(b.id)?);
                assert!(!schedules.crontab_in_use(crontab.id)?);
                assert!(schedules.delete_crontab_if_unused(crontab.id)?);
                assert_eq!(schedules.crontab(crontab.id)?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn zero_negative_and_oversized_intervals_are_rejected() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let schedules = ScheduleStore::new(tx);
                for (every, period) in [
                    (0, IntervalPeriod::Seconds),
                    (-1, IntervalPeriod::Days),
                    (1_000_000_000_000, IntervalPeriod::Days),
                    (i64::MAX, IntervalPeriod::Microseconds),
                    (101 * 365, IntervalPeriod::Days),
                ] {
                    let err = schedules.find_or_create_interval(every, period).unwrap_err();
                    assert!(matches!(err, StoreError::Constraint { .. }), "{every} {period}: {err}");
                }
                assert!(schedules.find_or_create_interval(100 * 365, IntervalPeriod::Days).is_ok());
                Ok(())
            })
            .unwrap();

        let raw = store.write(|tx| {
            tx.execute("INSERT INTO interval_schedule (every, period) VALUES (0, 'seconds')", [])?;
            Ok(())
        });
        assert!(raw.is_err());
    }

    #[test]
    fn interval_rows() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let schedules = ScheduleStore::new(tx);
                let every = schedules.find_or_create_interval(10, IntervalPeriod::Minutes)?;
                assert_eq!(every.run_every()?, Duration::minutes(10));
                assert_eq!(schedules.interval(every.id)?, Some(every));
                Ok(())
            })
            .unwrap();
    }
}
