//! Git CLI operations used to keep a mirror clone in step with its remotes.

use crate::error::{Result, VcsError};
use crate::process::{CommandOutput, CommandRunner, CommandSpec, run_checked};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Remote the mirror is cloned from.
pub const SOURCE_REMOTE: &str = "origin";

/// Remote the mirror is pushed to.
pub const TARGET_REMOTE: &str = "target";

/// Thin wrapper over the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
    ssh_command: Option<String>,
}

impl GitCli {
    /// Create a wrapper that runs git through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            ssh_command: None,
        }
    }

    /// Use a custom SSH command (`GIT_SSH_COMMAND`) for every invocation.
    #[must_use]
    pub fn with_ssh_command(mut self, ssh_command: impl Into<String>) -> Self {
        self.ssh_command = Some(ssh_command.into());
        self
    }

    /// The runner used for every invocation.
    #[must_use]
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    fn git(&self) -> CommandSpec {
        let spec = CommandSpec::new("git").env("GIT_TERMINAL_PROMPT", "0");
        match &self.ssh_command {
            Some(ssh) => spec.env("GIT_SSH_COMMAND", ssh.clone()),
            None => spec,
        }
    }

    fn git_in(&self, repo: &Path) -> CommandSpec {
        self.git().current_dir(repo)
    }

    /// Run a prepared git command, mapping failures through `on_failure`.
    pub(crate) fn run(
        &self,
        spec: &CommandSpec,
        on_failure: impl FnOnce(&CommandOutput) -> VcsError,
    ) -> Result<CommandOutput> {
        run_checked(self.runner.as_ref(), spec, on_failure)
    }

    /// Clone `url` as a bare mirror into `dest`.
    ///
    /// # Errors
    /// Returns error if the clone fails.
    pub fn clone_mirror(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(url = %url, dest = ?dest, "cloning mirror");

        let spec = self.git().args(["clone", "--mirror", url]).path_arg(dest);
        self.run(&spec, |out| Self::parse_git_error(&out.stderr, url.to_string()))?;

        info!(url = %url, "mirror clone complete");
        Ok(())
    }

    /// Register a new remote.
    ///
    /// # Errors
    /// Returns error if the remote cannot be added.
    pub fn add_remote(&self, repo: &Path, name: &str, url: &str) -> Result<()> {
        debug!(remote = name, url = %url, "adding remote");
        let spec = self.git_in(repo).args(["remote", "add", name, url]);
        self.run(&spec, |out| command_error(&spec, out))?;
        Ok(())
    }

    /// Point an existing remote at a new URL.
    ///
    /// # Errors
    /// Returns error if the remote does not exist.
    pub fn set_remote_url(&self, repo: &Path, name: &str, url: &str) -> Result<()> {
        debug!(remote = name, url = %url, "updating remote url");
        let spec = self.git_in(repo).args(["remote", "set-url", name, url]);
        self.run(&spec, |out| command_error(&spec, out))?;
        Ok(())
    }

    /// Get the URL of a remote, `None` if it is not configured.
    ///
    /// # Errors
    /// Returns error if git cannot be run.
    pub fn remote_url(&self, repo: &Path, name: &str) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&self.git_in(repo).args(["remote", "get-url", name]))?;

        if output.is_success() {
            Ok(Some(output.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Add the remote, or update its URL when it already exists.
    ///
    /// # Errors
    /// Returns error if git fails.
    pub fn upsert_remote(&self, repo: &Path, name: &str, url: &str) -> Result<()> {
        match self.remote_url(repo, name)? {
            Some(current) if current == url => Ok(()),
            Some(_) => self.set_remote_url(repo, name, url),
            None => self.add_remote(repo, name, url),
        }
    }

    /// Fetch from a remote.
    ///
    /// # Errors
    /// Returns error if fetch fails.
    pub fn fetch(&self, repo: &Path, remote: &str, force: bool, prune: bool) -> Result<()> {
        debug!(remote, force, prune, "fetching");

        let mut spec = self.git_in(repo).arg("fetch");
        if force {
            spec = spec.arg("--force");
        }
        if prune {
            spec = spec.arg("--prune");
        }
        spec = spec.arg(remote);

        self.run(&spec, |out| VcsError::FetchFailed {
            remote: remote.to_string(),
            reason: out.stderr.trim().to_string(),
            retryable: is_network_failure(&out.stderr),
        })?;

        info!(remote, "fetch complete");
        Ok(())
    }

    /// Push every ref to a remote (`push --mirror`).
    ///
    /// # Errors
    /// Returns error if push fails.
    pub fn push_mirror(&self, repo: &Path, remote: &str, force: bool, prune: bool) -> Result<()> {
        self.push(repo, remote, "--mirror", force, prune)
    }

    /// Push all branches to a remote (`push --all`).
    ///
    /// # Errors
    /// Returns error if push fails.
    pub fn push_all(&self, repo: &Path, remote: &str, force: bool, prune: bool) -> Result<()> {
        self.push(repo, remote, "--all", force, prune)
    }

    fn push(&self, repo: &Path, remote: &str, mode: &str, force: bool, prune: bool) -> Result<()> {
        debug!(remote, mode, force, prune, "pushing");

        let mut spec = self.git_in(repo).args(["push", mode]);
        if force {
            spec = spec.arg("--force");
        }
        if prune {
            spec = spec.arg("--prune");
        }
        spec = spec.arg(remote);

        self.run(&spec, |out| VcsError::PushFailed {
            remote: remote.to_string(),
            reason: out.stderr.trim().to_string(),
            retryable: is_network_failure(&out.stderr),
        })?;

        info!(remote, "push complete");
        Ok(())
    }

    /// Repack the object store aggressively.
    ///
    /// # Errors
    /// Returns error if gc fails.
    pub fn gc_aggressive(&self, repo: &Path) -> Result<()> {
        debug!(repo = ?repo, "repacking");
        let spec = self.git_in(repo).args(["gc", "--aggressive"]);
        self.run(&spec, |out| command_error(&spec, out))?;
        Ok(())
    }

    /// Discard local changes in a working tree.
    ///
    /// # Errors
    /// Returns error if reset fails.
    pub fn reset_hard(&self, repo: &Path) -> Result<()> {
        let spec = self.git_in(repo).args(["reset", "--hard"]);
        self.run(&spec, |out| command_error(&spec, out))?;
        Ok(())
    }

    /// Build a git invocation inside `repo` carrying the configured environment.
    pub(crate) fn command_in(&self, repo: &Path) -> CommandSpec {
        self.git_in(repo)
    }

    /// Build a git invocation carrying the configured environment.
    pub(crate) fn command(&self) -> CommandSpec {
        self.git()
    }

    /// Check if a path is a Git repository (bare or with a work tree).
    #[must_use]
    pub fn is_repository(path: &Path) -> bool {
        path.join(".git").exists() || (path.join("HEAD").exists() && path.join("objects").exists())
    }

    /// Classify git stderr into a structured error.
    pub(crate) fn parse_git_error(stderr: &str, url: String) -> VcsError {
        let stderr_lower = stderr.to_lowercase();

        if stderr_lower.contains("repository not found")
            || stderr_lower.contains("does not exist")
            || stderr_lower.contains("not found")
        {
            return VcsError::RepositoryNotFound { url };
        }

        if stderr_lower.contains("authentication failed")
            || stderr_lower.contains("permission denied")
            || stderr_lower.contains("access denied")
            || stderr_lower.contains("could not read username")
        {
            return VcsError::AuthenticationFailed {
                url,
                reason: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("host key verification failed") {
            let host = url
                .split("://")
                .nth(1)
                .and_then(|rest| rest.split(['/', ':']).next())
                .map(|host| host.rsplit('@').next().unwrap_or(host))
                .unwrap_or("unknown")
                .to_string();
            return VcsError::HostKeyVerification { host };
        }

        VcsError::clone_failed(url, stderr.trim(), is_network_failure(&stderr_lower))
    }
}

fn is_network_failure(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("network")
        || stderr.contains("connection")
        || stderr.contains("timed out")
        || stderr.contains("temporary")
        || stderr.contains("could not resolve host")
}

pub(crate) fn command_error(spec: &CommandSpec, out: &CommandOutput) -> VcsError {
    VcsError::command(spec.summary(), out.stderr.trim(), out.exit_code)
}
