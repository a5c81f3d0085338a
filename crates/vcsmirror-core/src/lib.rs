//! Core types for vcsmirror.
//!
//! This crate provides the pieces every other crate agrees on:
//! - Stable error codes
//! - Mirror, invocation and task-status enums
//! - The task queue contract used by the scheduler and the service API

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod queue;
mod types;

pub use error::{Error, ErrorCode, Result};
pub use queue::{
    ChainHandle, TASK_ID_HEADER, TaskHandle, TaskOptions, TaskQueue, TaskSignature,
};
pub use types::{InvokedBy, MirrorId, MirrorKind, TaskStatus, UserId};
