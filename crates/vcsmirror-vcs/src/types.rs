//! VCS kinds and transport protocols.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version control system behind a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    /// Git.
    Git,
    /// Subversion, mirrored through git-svn.
    Svn,
    /// Bazaar, mirrored through a git remote helper.
    Bazaar,
    /// Mercurial, mirrored through a git remote helper.
    Mercurial,
}

impl VcsKind {
    /// Storage identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Svn => "svn",
            Self::Bazaar => "bzr",
            Self::Mercurial => "hg",
        }
    }

    /// Whether the clone is produced by a remote helper and needs repacking.
    #[must_use]
    pub const fn needs_repack(&self) -> bool {
        matches!(self, Self::Bazaar | Self::Mercurial)
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git => write!(f, "Git"),
            Self::Svn => write!(f, "Subversion"),
            Self::Bazaar => write!(f, "Bazaar"),
            Self::Mercurial => write!(f, "Mercurial"),
        }
    }
}

impl FromStr for VcsKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "git" => Ok(Self::Git),
            "svn" | "subversion" => Ok(Self::Svn),
            "bzr" | "bazaar" => Ok(Self::Bazaar),
            "hg" | "mercurial" => Ok(Self::Mercurial),
            _ => Err(format!("unknown VCS kind: {s}")),
        }
    }
}

/// Transport used to reach a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// SSH, routed through a per-user identity.
    Ssh,
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// Storage identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
