//! Store errors.

use rusqlite::ErrorCode as SqliteCode;
use thiserror::Error;
use vcsmirror_core::ErrorCode;

/// Errors raised by the relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database is busy, locked or had an I/O hiccup; retrying may work.
    #[error("store temporarily unavailable: {message}")]
    Transient {
        /// Driver message.
        message: String,
    },

    /// A write was rejected before commit.
    #[error("constraint violated: {message}")]
    Constraint {
        /// What was violated.
        message: String,
    },

    /// A required row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity name.
        entity: &'static str,
        /// Row identifier.
        id: String,
    },

    /// A stored value could not be decoded.
    #[error("invalid stored value in {column}: {message}")]
    Decode {
        /// Column name.
        column: &'static str,
        /// Decoder message.
        message: String,
    },

    /// The database file or its directory could not be prepared.
    #[error("io error at {path}: {message}")]
    Io {
        /// Path involved.
        path: String,
        /// Error message.
        message: String,
    },

    /// Any other driver error.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl StoreError {
    /// Create a constraint error.
    #[must_use]
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a decode error.
    #[must_use]
    pub fn decode(column: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            column,
            message: message.into(),
        }
    }

    /// Whether the operation may succeed when retried later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Check if this is a "not found" error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Error code for task results.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transient { .. } | Self::Io { .. } => ErrorCode::E0301,
            Self::Constraint { .. } => ErrorCode::E0302,
            Self::NotFound { .. } => ErrorCode::E0303,
            Self::Decode { .. } | Self::Sqlite(_) => ErrorCode::E0301,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                SqliteCode::DatabaseBusy
                | SqliteCode::DatabaseLocked
                | SqliteCode::SystemIoFailure
                | SqliteCode::CannotOpen => Self::Transient {
                    message: err.to_string(),
                },
                SqliteCode::ConstraintViolation => Self::Constraint {
                    message: err.to_string(),
                },
                _ => Self::Sqlite(err),
            },
            _ => Self::Sqlite(err),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode("json", err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: std::ffi::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_locked_are_transient() {
        let busy = StoreError::from(failure(rusqlite::ffi::SQLITE_BUSY));
        let locked = StoreError::from(failure(rusqlite::ffi::SQLITE_LOCKED));
        assert!(busy.is_transient());
        assert!(locked.is_transient());
        assert_eq!(busy.code(), ErrorCode::E0301);
    }

    #[test]
    fn constraint_failures_are_classified() {
        let err = StoreError::from(failure(rusqlite::ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, StoreError::Constraint { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn other_errors_pass_through() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn not_found_message() {
        let err = StoreError::not_found("pull mirror", 12);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "pull mirror 12 not found");
    }
}
