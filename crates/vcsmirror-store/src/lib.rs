//! SQLite store for vcsmirror.
//!
//! The store holds users, the local copy of hosting-service groups and
//! projects, pull and push mirrors, the periodic-task tables read by the
//! scheduler, and the task-meta rows that double as the worker queue.
//!
//! Access goes through short-lived repository views over a connection:
//!
//! ```no_run
//! use vcsmirror_core::MirrorKind;
//! use vcsmirror_store::{MirrorRepo, Store};
//!
//! # fn main() -> vcsmirror_store::Result<()> {
//! let store = Store::open("/var/lib/vcsmirror/vcsmirror.sqlite3")?;
//! let pending = store.read(|conn| MirrorRepo::new(conn).list_deleted(MirrorKind::Pull))?;
//! println!("{} mirrors waiting for cleanup", pending.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod error;
pub mod locks;
pub mod mirrors;
pub mod models;
pub mod schedules;
mod schema;
pub mod task_meta;
pub mod task_runs;
pub mod users;

pub use db::{Store, parse_sql_ts, to_sql_ts};
pub use error::{Result, StoreError};
pub use locks::LockRepo;
pub use mirrors::MirrorRepo;
pub use models::{
    Mirror, MirrorGroup, NewMirror, NewTaskRun, Project, PullMirror, PullSettings, TaskRun, User,
};
pub use schedules::{
    CrontabFields, CrontabSchedule, IntervalPeriod, IntervalSchedule, NewPeriodicTask,
    MAX_INTERVAL_SECS, PeriodicTaskRow, ScheduleStore, check_schedule_kind,
};
pub use schema::TABLES;
pub use task_meta::{NewTaskRecord, TaskMetaRepo, TaskRecord};
pub use task_runs::TaskRunRepo;
pub use users::{CatalogRepo, UserRepo};
