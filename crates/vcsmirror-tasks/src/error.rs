//! Task errors.

use crate::hosting::HostingError;
use thiserror::Error;
use vcsmirror_core::{ErrorCode, MirrorId, MirrorKind};
use vcsmirror_scheduler::SchedulerError;
use vcsmirror_store::StoreError;
use vcsmirror_vcs::VcsError;

/// Errors raised by task handlers, the worker and the service API.
#[derive(Error, Debug)]
pub enum TaskError {
    /// A VCS step failed.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A schedule could not be changed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The hosting service failed.
    #[error(transparent)]
    Hosting(#[from] HostingError),

    /// The queue refused a task.
    #[error(transparent)]
    Queue(#[from] vcsmirror_core::Error),

    /// Another worker runs a task with the same identity.
    #[error("task {name} is already running")]
    AlreadyRunning {
        /// Task name.
        name: String,
        /// Lock key.
        key: String,
    },

    /// The mirror lacks a source or target.
    #[error("{kind} mirror {id} has no {missing}")]
    MirrorIncomplete {
        /// Mirror direction.
        kind: MirrorKind,
        /// Mirror id.
        id: MirrorId,
        /// `source` or `target`.
        missing: &'static str,
    },

    /// No handler is registered under the name.
    #[error("no task registered as {0}")]
    UnknownTask(String),

    /// The task arguments do not fit the handler.
    #[error("invalid arguments for {task}: {reason}")]
    InvalidArguments {
        /// Task name.
        task: String,
        /// What is wrong.
        reason: String,
    },

    /// The caller sent a request that cannot be served.
    #[error("{0}")]
    InvalidRequest(String),

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// A required record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity name.
        entity: &'static str,
        /// Identifier.
        id: String,
    },
}

impl TaskError {
    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create an invalid-request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a "not found" error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Store(err) => err.is_not_found(),
            Self::Hosting(err) => err.is_not_found(),
            Self::Scheduler(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Whether retrying later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Vcs(err) => err.is_retryable(),
            Self::Store(err) => err.is_transient(),
            Self::Hosting(err) => err.is_transient(),
            Self::Scheduler(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Error code recorded with the task result.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Vcs(err) => err.code(),
            Self::Store(err) => err.code(),
            Self::Scheduler(err) => err.code(),
            Self::Hosting(err) => err.code(),
            Self::Queue(err) => err.code(),
            Self::AlreadyRunning { .. } => ErrorCode::E0501,
            Self::UnknownTask(_) => ErrorCode::E0502,
            Self::MirrorIncomplete { .. } => ErrorCode::E0503,
            Self::InvalidArguments { .. } => ErrorCode::E0504,
            Self::InvalidRequest(_) => ErrorCode::E0302,
            Self::NotFound { .. } => ErrorCode::E0303,
            Self::Pool(_) => ErrorCode::E0601,
        }
    }
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, TaskError>;
