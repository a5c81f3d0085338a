//! Tasks, the task queue and the worker pool for vcsmirror.
//!
//! - [`TaskRegistry`] maps task names to handlers; [`register_all`] fills it
//!   with the mirror, identity and maintenance tasks.
//! - [`SqliteTaskQueue`] persists invocations in the store; chains advance
//!   one link at a time.
//! - [`Worker`] drains a queue on a thread pool, running each task under a
//!   [`SingleInstanceGuard`].
//! - [`MirrorService`] is the API the web tier and CLI call to schedule work.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use vcsmirror_store::Store;
//! use vcsmirror_tasks::{
//!     SqliteTaskQueue, TaskContext, TaskRegistry, Worker, WorkerConfig, register_all,
//! };
//! use vcsmirror_vcs::SystemRunner;
//!
//! # fn main() -> vcsmirror_tasks::Result<()> {
//! let store = Arc::new(Store::open("/var/lib/vcsmirror/vcsmirror.sqlite3")?);
//! let queue = Arc::new(SqliteTaskQueue::new(store.clone()));
//! let ctx = TaskContext::new(store, queue, Arc::new(SystemRunner), "/srv/mirrors", "/home/mirror/.ssh");
//!
//! let mut registry = TaskRegistry::new();
//! register_all(&mut registry);
//!
//! let stop = AtomicBool::new(false);
//! Worker::new(ctx, Arc::new(registry), WorkerConfig::default()).run(&stop)?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod error;
pub mod handlers;
pub mod hosting;
pub mod lock;
pub mod queue;
pub mod registry;
pub mod service;
pub mod worker;

pub use context::{DEFAULT_RESULT_EXPIRES_SECS, TaskContext};
pub use error::{Result, TaskError};
pub use handlers::{
    CREATE_RSA_PAIR, CREATE_SSH_CONFIG, TRUST_HOST, delete_task_name, register_all, save_task_name,
    sync_task_name,
};
pub use hosting::{
    DeployKeySpec, HostedGroup, HostedProject, HostingClient, HostingError, MemoryHosting,
    ProjectSpec, UnconfiguredHosting,
};
pub use lock::{SingleInstanceGuard, claim_holder, lock_key};
pub use queue::{DEFAULT_QUEUE, SqliteTaskQueue};
pub use registry::{Handler, LockScope, TaskDefinition, TaskRegistry};
pub use service::MirrorService;
pub use worker::{Completed, Worker, WorkerConfig};
