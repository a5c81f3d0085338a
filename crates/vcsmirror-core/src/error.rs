//! Error codes shared by every vcsmirror crate.
//!
//! Failures recorded against a task carry one of these codes so that
//! operators can grep logs and task results for a stable identifier.

use std::fmt;
use thiserror::Error;

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Location errors (E01xx)
    /// Repository location could not be parsed
    E0101,
    /// Unsupported scheme or VCS kind
    E0102,

    // Hosting service errors (E02xx)
    /// Group, project or host missing at the hosting service
    E0201,
    /// Hosting service refused the request
    E0202,

    // Store errors (E03xx)
    /// Store temporarily unavailable
    E0301,
    /// Constraint violated
    E0302,
    /// Record not found
    E0303,

    // Subprocess errors (E04xx)
    /// VCS command exited unsuccessfully
    E0401,
    /// VCS tool not installed
    E0402,
    /// Mirror storage missing on disk
    E0403,

    // Task errors (E05xx)
    /// Task with the same identity is already running
    E0501,
    /// No handler registered for task
    E0502,
    /// Mirror has no source or no target
    E0503,
    /// Task payload could not be decoded
    E0504,
    /// Task expired before it ran
    E0505,

    // Configuration errors (E06xx)
    /// Invalid configuration
    E0601,

    // Identity errors (E07xx)
    /// Key generation failed
    E0701,
    /// Host key could not be trusted
    E0702,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::E0101 => "E0101",
            Self::E0102 => "E0102",
            Self::E0201 => "E0201",
            Self::E0202 => "E0202",
            Self::E0301 => "E0301",
            Self::E0302 => "E0302",
            Self::E0303 => "E0303",
            Self::E0401 => "E0401",
            Self::E0402 => "E0402",
            Self::E0403 => "E0403",
            Self::E0501 => "E0501",
            Self::E0502 => "E0502",
            Self::E0503 => "E0503",
            Self::E0504 => "E0504",
            Self::E0505 => "E0505",
            Self::E0601 => "E0601",
            Self::E0701 => "E0701",
            Self::E0702 => "E0702",
        }
    }

    /// Get a brief title for this error code.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::E0101 => "Invalid repository location",
            Self::E0102 => "Unsupported scheme",
            Self::E0201 => "Remote not found",
            Self::E0202 => "Hosting service refused request",
            Self::E0301 => "Store unavailable",
            Self::E0302 => "Constraint violation",
            Self::E0303 => "Record not found",
            Self::E0401 => "Command failed",
            Self::E0402 => "Tool not available",
            Self::E0403 => "Mirror storage missing",
            Self::E0501 => "Task already running",
            Self::E0502 => "Unknown task",
            Self::E0503 => "Mirror incomplete",
            Self::E0504 => "Invalid task payload",
            Self::E0505 => "Task expired",
            Self::E0601 => "Invalid configuration",
            Self::E0701 => "Key generation failed",
            Self::E0702 => "Host key untrusted",
        }
    }

    /// Whether a failure with this code is worth retrying without user action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::E0301)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error raised at the task queue boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Failure carrying an explicit code.
    #[error("[{code}] {message}")]
    Coded {
        /// Error code.
        code: ErrorCode,
        /// Error message.
        message: String,
    },

    /// Task arguments could not be (de)serialized.
    #[error("[E0504] invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Error {
    /// Create an error with a code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Coded {
            code,
            message: message.into(),
        }
    }

    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Coded { code, .. } => *code,
            Self::Payload(_) => ErrorCode::E0504,
        }
    }
}

/// Result type alias using vcsmirror's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ErrorCode::E0101, "E0101")]
    #[test_case(ErrorCode::E0302, "E0302")]
    #[test_case(ErrorCode::E0702, "E0702")]
    fn code_renders_as_identifier(code: ErrorCode, expected: &str) {
        assert_eq!(code.to_string(), expected);
    }

    #[test]
    fn coded_error_message_includes_code() {
        let err = Error::new(ErrorCode::E0503, "pull mirror 4 has no target");
        assert_eq!(err.to_string(), "[E0503] pull mirror 4 has no target");
        assert_eq!(err.code(), ErrorCode::E0503);
    }

    #[test]
    fn only_store_outages_are_transient() {
        assert!(ErrorCode::E0301.is_transient());
        assert!(!ErrorCode::E0401.is_transient());
        assert!(!ErrorCode::E0302.is_transient());
    }
}
