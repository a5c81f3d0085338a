//! VCS error types with rich context for debugging and recovery.

use std::path::PathBuf;
use thiserror::Error;
use vcsmirror_core::ErrorCode;

/// VCS-specific error types with detailed context.
#[derive(Error, Debug)]
pub enum VcsError {
    /// Location string could not be parsed.
    #[error("invalid vcs url: {url} ({reason})")]
    InvalidUrl {
        /// The invalid URL.
        url: String,
        /// Reason it's invalid.
        reason: String,
    },

    /// Clone operation failed.
    #[error("clone failed for {url}: {reason}")]
    CloneFailed {
        /// Repository URL.
        url: String,
        /// Failure reason.
        reason: String,
        /// Whether this error is retryable.
        retryable: bool,
    },

    /// Fetch operation failed.
    #[error("fetch failed for remote '{remote}': {reason}")]
    FetchFailed {
        /// Remote name.
        remote: String,
        /// Failure reason.
        reason: String,
        /// Whether this error is retryable.
        retryable: bool,
    },

    /// Push operation failed.
    #[error("push failed for remote '{remote}': {reason}")]
    PushFailed {
        /// Remote name.
        remote: String,
        /// Failure reason.
        reason: String,
        /// Whether this error is retryable.
        retryable: bool,
    },

    /// Authentication failed.
    #[error("authentication failed for {url}: {reason}")]
    AuthenticationFailed {
        /// Repository URL.
        url: String,
        /// Failure reason.
        reason: String,
    },

    /// Host key verification failed.
    #[error("host key verification failed for {host}")]
    HostKeyVerification {
        /// Host that failed verification.
        host: String,
    },

    /// Repository not found.
    #[error("repository not found: {url}")]
    RepositoryNotFound {
        /// Repository URL.
        url: String,
    },

    /// Local mirror storage is missing.
    #[error("mirror storage {path} not found, creation failed?")]
    StorageMissing {
        /// Expected directory.
        path: PathBuf,
    },

    /// SSH key error.
    #[error("ssh key error: {message}")]
    SshKey {
        /// Error message.
        message: String,
        /// Path to the key if available.
        key_path: Option<PathBuf>,
    },

    /// SSH client configuration error.
    #[error("ssh config error at {path}: {message}")]
    SshConfig {
        /// Config file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// IO error.
    #[error("io error at {path}: {message}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Command execution failed.
    #[error("command '{command}' failed: {message}")]
    Command {
        /// Command that failed.
        command: String,
        /// Error message.
        message: String,
        /// Exit code if available.
        exit_code: Option<i32>,
    },

    /// Tool not available.
    #[error("{tool} is not installed or not in PATH")]
    ToolNotAvailable {
        /// Program name (git, ssh-keygen, ssh-keyscan).
        tool: String,
    },
}

impl VcsError {
    /// Create an invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an SSH client configuration error.
    #[must_use]
    pub fn ssh_config(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::SshConfig {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create an IO error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a clone failed error.
    #[must_use]
    pub fn clone_failed(
        url: impl Into<String>,
        reason: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::CloneFailed {
            url: url.into(),
            reason: reason.into(),
            retryable,
        }
    }

    /// Create a command error.
    #[must_use]
    pub fn command(
        command: impl Into<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
            exit_code,
        }
    }

    /// Check if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CloneFailed { retryable, .. }
            | Self::FetchFailed { retryable, .. }
            | Self::PushFailed { retryable, .. } => *retryable,
            Self::Command { message, .. } => {
                message.contains("network")
                    || message.contains("timeout")
                    || message.contains("connection")
                    || message.contains("temporary")
            }
            _ => false,
        }
    }

    /// Check if this is a "not found" error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RepositoryNotFound { .. } | Self::StorageMissing { .. }
        )
    }

    /// Check if this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::SshKey { .. } | Self::HostKeyVerification { .. }
        )
    }

    /// Stable error code for task results.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::E0101,
            Self::StorageMissing { .. } => ErrorCode::E0403,
            Self::ToolNotAvailable { .. } => ErrorCode::E0402,
            Self::SshKey { .. } => ErrorCode::E0701,
            Self::HostKeyVerification { .. } => ErrorCode::E0702,
            _ => ErrorCode::E0401,
        }
    }
}

impl From<std::io::Error> for VcsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

/// Result type for VCS operations.
pub type Result<T> = std::result::Result<T, VcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(VcsError::clone_failed("ssh://h/r", "connection reset", true).is_retryable());
        assert!(
            VcsError::command("git fetch", "temporary failure in name resolution", Some(128))
                .is_retryable()
        );
        assert!(!VcsError::invalid_url("::", "no hostname").is_retryable());
    }

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(VcsError::invalid_url("x", "y").code(), ErrorCode::E0101);
        assert_eq!(
            VcsError::command("git push", "rejected", Some(1)).code(),
            ErrorCode::E0401
        );
        assert_eq!(
            VcsError::StorageMissing {
                path: PathBuf::from("/srv/repos/pull/1")
            }
            .code(),
            ErrorCode::E0403
        );
    }

    #[test]
    fn not_found_and_auth_predicates() {
        assert!(
            VcsError::RepositoryNotFound {
                url: "https://h/r".into()
            }
            .is_not_found()
        );
        assert!(
            VcsError::HostKeyVerification {
                host: "h".into()
            }
            .is_auth_error()
        );
    }
}
