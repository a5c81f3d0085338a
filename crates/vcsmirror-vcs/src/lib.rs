//! Repository locations, SSH identity routing and mirror execution.
//!
//! - [`VcsUri`] parses stored location strings (URLs, SCP-style and bare
//!   `host:path` forms) and renders them back.
//! - [`RemoteEndpoint`] adds per-side sync flags and derives the VCS kind and
//!   transport from the scheme.
//! - [`IdentityRouter`] gives every user a dedicated keypair and per-host SSH
//!   alias.
//! - [`MirrorExecutor`] clones, links and syncs mirrors through the `git`
//!   binary, using git-svn for Subversion sources.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vcsmirror_vcs::{MirrorExecutor, MirrorLayout, RemoteEndpoint, SystemRunner};
//!
//! # fn main() -> vcsmirror_vcs::Result<()> {
//! let executor = MirrorExecutor::new(Arc::new(SystemRunner));
//! let layout = MirrorLayout::new("/srv/mirrors/pull/1", "42");
//! let source = RemoteEndpoint::parse("https://github.com/rust-lang/log.git")?;
//! let target = RemoteEndpoint::parse("git@gitlab.example.com:mirrors/log.git")?
//!     .with_flags(true, true);
//!
//! let report = executor.create_or_update(&layout, &source, Some(&target))?;
//! println!("cloned: {}", report.cloned);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod executor;
pub mod git;
pub mod identity;
pub mod known_hosts;
pub mod process;
pub mod remote;
pub mod svn;
pub mod types;
pub mod uri;

pub use error::{Result, VcsError};
pub use executor::{ExecutionReport, MirrorExecutor, MirrorLayout, MirrorState};
pub use git::{GitCli, SOURCE_REMOTE, TARGET_REMOTE};
pub use identity::{Identity, IdentityRouter, SshConfig, host_alias};
pub use known_hosts::{KnownHosts, TrustOutcome, fingerprint_sha256, host_pattern};
pub use process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use remote::{RemoteEndpoint, protocol_for_scheme, vcs_kind_for_scheme};
pub use svn::{SvnBridge, fix_url};
pub use types::{Protocol, VcsKind};
pub use uri::VcsUri;
