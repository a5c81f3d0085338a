//! Subversion mirroring through the git-svn bridge.

use crate::error::{Result, VcsError};
use crate::git::{GitCli, command_error};
use std::path::Path;
use tracing::{debug, info};

/// Rewrite `svn+http(s)://` locations to the plain form git-svn accepts.
#[must_use]
pub fn fix_url(url: &str) -> String {
    if url.contains("svn+http://") {
        return url.replace("svn+http://", "http://");
    }
    if url.contains("svn+https://") {
        return url.replace("svn+https://", "https://");
    }
    url.to_string()
}

/// git-svn operations.
#[derive(Debug, Clone)]
pub struct SvnBridge {
    git: GitCli,
}

impl SvnBridge {
    /// Create a bridge on top of a git wrapper.
    #[must_use]
    pub const fn new(git: GitCli) -> Self {
        Self { git }
    }

    /// Clone an SVN repository into a git working copy.
    ///
    /// # Errors
    /// Returns error if git-svn fails.
    pub fn clone(&self, url: &str, dest: &Path) -> Result<()> {
        let url = fix_url(url);
        debug!(url = %url, dest = ?dest, "cloning svn repository");

        let spec = self.git.command().args(["svn", "clone", &url]).path_arg(dest);
        self.git
            .run(&spec, |out| GitCli::parse_git_error(&out.stderr, url.clone()))?;

        info!(url = %url, "svn clone complete");
        Ok(())
    }

    /// Fetch new SVN revisions.
    ///
    /// # Errors
    /// Returns error if git-svn fails.
    pub fn fetch(&self, repo: &Path) -> Result<()> {
        let spec = self.git.command_in(repo).args(["svn", "fetch"]);
        self.git.run(&spec, |out| VcsError::FetchFailed {
            remote: "svn".to_string(),
            reason: out.stderr.trim().to_string(),
            retryable: true,
        })?;
        Ok(())
    }

    /// Replay local history on top of the fetched SVN revisions.
    ///
    /// # Errors
    /// Returns error if git-svn fails.
    pub fn rebase(&self, repo: &Path) -> Result<()> {
        let spec = self.git.command_in(repo).args(["svn", "rebase"]);
        self.git.run(&spec, |out| command_error(&spec, out))?;
        Ok(())
    }

    /// Bring the working copy up to date: hard reset, fetch, rebase.
    ///
    /// # Errors
    /// Returns error if any step fails.
    pub fn update(&self, repo: &Path) -> Result<()> {
        self.git.reset_hard(repo)?;
        self.fetch(repo)?;
        self.rebase(repo)
    }
}
