//! Error types for configuration loading.

// thiserror expansions trip this lint on struct variants
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// A problem with the settings layers.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// Settings file missing.
    #[error("settings file not found: {path}")]
    #[diagnostic(code(config::not_found), help("create the file or check the --config path"))]
    NotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// Invalid JSON syntax or shape.
    #[error("{path} is not a valid settings file: {message}")]
    #[diagnostic(
        code(config::invalid_json),
        help("see line {line}, column {column}; unknown keys are rejected")
    )]
    InvalidJson {
        /// File path.
        path: PathBuf,
        /// Parser message.
        message: String,
        /// Line number (1-indexed).
        line: usize,
        /// Column number (1-indexed).
        column: usize,
    },

    /// Invalid field value.
    #[error("setting '{field}' {message}")]
    #[diagnostic(code(config::invalid_value), help("{hint}"))]
    InvalidValue {
        /// Field name.
        field: String,
        /// What is wrong.
        message: String,
        /// How to fix it.
        hint: String,
    },

    /// Value out of range.
    #[error("setting '{field}' is {value}, expected {min} to {max}")]
    #[diagnostic(code(config::out_of_range), help("pick a value inside the range"))]
    OutOfRange {
        /// Field name.
        field: String,
        /// Provided value.
        value: String,
        /// Minimum value.
        min: String,
        /// Maximum value.
        max: String,
    },

    /// Invalid URL.
    #[error("setting '{field}' is not a usable URL: {url}")]
    #[diagnostic(
        code(config::invalid_url),
        help("push hooks call back over http:// or https://")
    )]
    InvalidUrl {
        /// Field name.
        field: String,
        /// Offending URL.
        url: String,
    },

    /// Unparsable `VCSMIRROR_*` variable.
    #[error("cannot use {var}: {message}")]
    #[diagnostic(code(config::env_error), help("unset the variable or fix its value"))]
    EnvError {
        /// Variable name.
        var: String,
        /// What is wrong.
        message: String,
    },

    /// IO error.
    #[error("cannot read {path}: {message}")]
    #[diagnostic(code(config::io_error))]
    Io {
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Permission denied.
    #[error("permission denied: {path}")]
    #[diagnostic(code(config::permission_denied), help("the settings file must be readable by the service user"))]
    PermissionDenied {
        /// File path.
        path: PathBuf,
    },

    /// Validation found one or more problems.
    #[error("settings validation failed with {count} problem(s)")]
    #[diagnostic(code(config::validation_failed))]
    ValidationFailed {
        /// Number of problems.
        count: usize,
        /// The individual problems.
        #[related]
        errors: Vec<ConfigError>,
    },
}

impl ConfigError {
    /// Classify a read failure of `path`.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io {
                path,
                message: err.to_string(),
            },
        }
    }

    /// Parse failure with the parser's position.
    #[must_use]
    pub fn json(path: impl Into<PathBuf>, err: &sonic_rs::Error) -> Self {
        Self::InvalidJson {
            path: path.into(),
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
        }
    }

    #[must_use]
    pub fn invalid_value(
        field: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }

    #[must_use]
    pub fn out_of_range<T: std::fmt::Display>(field: impl Into<String>, value: T, min: T, max: T) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Whether the file did not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result alias for settings loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Diagnostic;

    #[test]
    fn io_errors_classify_by_kind() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(ConfigError::io("/etc/vcsmirror.json", missing).is_not_found());

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            ConfigError::io("/etc/vcsmirror.json", denied),
            ConfigError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn validation_failure_lists_related_problems() {
        let err = ConfigError::ValidationFailed {
            count: 2,
            errors: vec![
                ConfigError::out_of_range("worker.concurrency", 0, 1, 1024),
                ConfigError::invalid_value("beat.max_interval_secs", "must be positive", "use 5"),
            ],
        };
        assert_eq!(err.related().map(Iterator::count), Some(2));
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("config::validation_failed")
        );
    }
}
