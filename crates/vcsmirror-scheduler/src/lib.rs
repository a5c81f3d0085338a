//! Database-backed periodic task scheduler.
//!
//! Periodic tasks live in the store next to the mirrors they drive. The
//! [`DatabaseScheduler`] picks up changes through the schedule version,
//! so editors never talk to the running scheduler directly:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use vcsmirror_core::{MirrorKind, TaskQueue};
//! use vcsmirror_scheduler::{DatabaseScheduler, set_periodic_expression};
//! use vcsmirror_store::Store;
//!
//! # fn run(queue: Arc<dyn TaskQueue>) -> vcsmirror_scheduler::Result<()> {
//! let store = Arc::new(Store::open("/var/lib/vcsmirror/vcsmirror.sqlite3")?);
//! set_periodic_expression(&store, MirrorKind::Pull, 3, Some("*/15 * * * *"))?;
//!
//! let stop = AtomicBool::new(false);
//! DatabaseScheduler::new(store, queue).run(&stop)?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod beat;
pub mod cron;
pub mod entry;
pub mod error;
pub mod expression;
pub mod schedule;

pub use beat::{BACKEND_CLEANUP, DatabaseScheduler};
pub use cron::{CronSchedule, parse_expression};
pub use entry::{EntryCheck, EntryOptions, ScheduleEntry};
pub use error::{Result, SchedulerError};
pub use expression::{cron_task_name, periodic_task_name, set_periodic_expression};
pub use schedule::{DEFAULT_MAX_INTERVAL, DueState, NEVER_CHECK_TIMEOUT, Schedule};
