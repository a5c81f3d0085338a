//! Scheduler errors.

use thiserror::Error;
use vcsmirror_core::ErrorCode;
use vcsmirror_store::StoreError;

/// Errors raised while parsing schedules or driving the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A cron expression could not be parsed.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron {
        /// The expression as given.
        expr: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A periodic task row could not be turned into an entry.
    #[error("invalid periodic task {name}: {reason}")]
    InvalidEntry {
        /// Periodic task name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The task queue refused a dispatch.
    #[error("dispatch failed: {0}")]
    Queue(#[from] vcsmirror_core::Error),
}

impl SchedulerError {
    /// Create an invalid-cron error.
    #[must_use]
    pub fn invalid_cron(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCron {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-entry error.
    #[must_use]
    pub fn invalid_entry(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Check if this is a "not found" error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        match self {
            Self::Store(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Error code for task results.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCron { .. } => ErrorCode::E0302,
            Self::InvalidEntry { .. } => ErrorCode::E0504,
            Self::Store(err) => err.code(),
            Self::Queue(err) => err.code(),
        }
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_classification() {
        let err = SchedulerError::from(StoreError::not_found("pull mirror", 3));
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.code(), ErrorCode::E0303);
    }

    #[test]
    fn cron_errors_are_input_errors() {
        let err = SchedulerError::invalid_cron("61 * * * *", "minute out of range");
        assert_eq!(err.code(), ErrorCode::E0302);
        assert_eq!(
            err.to_string(),
            "invalid cron expression '61 * * * *': minute out of range"
        );
    }
}
