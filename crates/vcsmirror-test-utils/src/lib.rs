//! Testing utilities for vcsmirror.
//!
//! # Modules
//!
//! - [`runner`]: a [`CommandRunner`](vcsmirror_vcs::CommandRunner) that records
//!   commands and fakes `git`/`ssh-keygen` side effects
//! - [`queue`]: a [`TaskQueue`](vcsmirror_core::TaskQueue) that records what
//!   was enqueued
//! - [`fixtures`]: temporary workspaces with a store, storage root and ssh dir
//! - [`proptest_strategies`]: strategies for locations and cron fields

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod fixtures;
pub mod proptest_strategies;
pub mod queue;
pub mod runner;

pub use fixtures::TempWorkspace;
pub use queue::{Enqueued, RecordingQueue};
pub use runner::RecordingRunner;
