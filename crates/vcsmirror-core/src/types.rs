//! Identifiers and enums shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row id of a pull or push mirror.
pub type MirrorId = i64;

/// Row id of a user owning mirrors and a deploy identity.
pub type UserId = i64;

/// Direction of a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorKind {
    /// External source mirrored into the hosting service.
    Pull,
    /// Hosting service project mirrored out to an external target.
    Push,
}

impl MirrorKind {
    /// Lowercase identifier used in task names and storage paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }

    /// Display name used in periodic task names.
    #[must_use]
    pub const fn model_name(self) -> &'static str {
        match self {
            Self::Pull => "PullMirror",
            Self::Push => "PushMirror",
        }
    }
}

impl fmt::Display for MirrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MirrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pull" => Ok(Self::Pull),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown mirror kind: {other}")),
        }
    }
}

/// Who asked for a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokedBy {
    /// A user from the UI or CLI.
    Manual,
    /// An external push hook.
    Hook,
    /// The periodic scheduler.
    Scheduler,
    /// Anything else.
    Unknown,
}

impl InvokedBy {
    /// Storage identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Hook => "hook",
            Self::Scheduler => "scheduler",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a storage identifier, mapping anything unrecognised to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => Self::Manual,
            "hook" => Self::Hook,
            "scheduler" => Self::Scheduler,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for InvokedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Pending,
    /// Claimed by a worker.
    Started,
    /// Handler returned successfully.
    Success,
    /// Handler failed.
    Failure,
    /// Skipped because an identical task was already running.
    Ignored,
    /// Dropped before running (expired or aborted chain).
    Revoked,
}

impl TaskStatus {
    /// Storage identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Ignored => "IGNORED",
            Self::Revoked => "REVOKED",
        }
    }

    /// Whether the task has reached a final state.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        !matches!(self, Self::Pending | Self::Started)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "STARTED" => Ok(Self::Started),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "IGNORED" => Ok(Self::Ignored),
            "REVOKED" => Ok(Self::Revoked),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}
