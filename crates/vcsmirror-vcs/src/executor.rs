//! The mirror state machine.
//!
//! A mirror lives in `<namespace>/<name>` as a bare mirror clone (or a git-svn
//! working copy). [`MirrorExecutor::create_or_update`] clones it when absent,
//! links the target remote and then syncs; calling it again on an existing
//! clone only refreshes the remote URLs and syncs.

use crate::error::{Result, VcsError};
use crate::git::{GitCli, SOURCE_REMOTE, TARGET_REMOTE};
use crate::process::CommandRunner;
use crate::remote::RemoteEndpoint;
use crate::svn::SvnBridge;
use crate::types::VcsKind;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a mirror is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorState {
    /// No local clone.
    Absent,
    /// Clone in progress.
    Cloning,
    /// Clone exists with its remotes configured.
    Linked,
    /// Fetch and push in progress.
    Syncing,
    /// Sync finished.
    Done,
    /// A step failed.
    Failed,
}

impl MirrorState {
    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Cloning => "cloning",
            Self::Linked => "linked",
            Self::Syncing => "syncing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MirrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk location of one mirror clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorLayout {
    /// Directory shared by the owner's mirrors of one kind.
    pub namespace: PathBuf,
    /// Directory name of the clone inside the namespace.
    pub name: String,
}

impl MirrorLayout {
    /// Create a layout.
    #[must_use]
    pub fn new(namespace: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Path of the clone.
    #[must_use]
    pub fn project_path(&self) -> PathBuf {
        self.namespace.join(&self.name)
    }
}

/// States visited by one executor call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Visited states in order.
    pub transitions: Vec<MirrorState>,
    /// Whether a fresh clone was made.
    pub cloned: bool,
}

impl ExecutionReport {
    fn enter(&mut self, layout: &MirrorLayout, state: MirrorState) {
        debug!(mirror = %layout.name, state = %state, "mirror state");
        self.transitions.push(state);
    }

    /// Last state reached.
    #[must_use]
    pub fn final_state(&self) -> Option<MirrorState> {
        self.transitions.last().copied()
    }
}

/// Creates and synchronises mirror clones.
#[derive(Debug, Clone)]
pub struct MirrorExecutor {
    git: GitCli,
}

impl MirrorExecutor {
    /// Create an executor running VCS tools through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            git: GitCli::new(runner),
        }
    }

    /// Make every git invocation use `ssh_command` for SSH transports.
    #[must_use]
    pub fn with_ssh_command(mut self, ssh_command: impl Into<String>) -> Self {
        self.git = self.git.with_ssh_command(ssh_command);
        self
    }

    /// Underlying git wrapper.
    #[must_use]
    pub const fn git(&self) -> &GitCli {
        &self.git
    }

    /// Current state as seen on disk.
    #[must_use]
    pub fn state_of(&self, layout: &MirrorLayout) -> MirrorState {
        if layout.project_path().is_dir() {
            MirrorState::Linked
        } else {
            MirrorState::Absent
        }
    }

    /// Clone the mirror if needed, point its remotes at the endpoints, then sync.
    ///
    /// # Errors
    /// Returns error if any VCS step fails or the clone does not appear on disk.
    pub fn create_or_update(
        &self,
        layout: &MirrorLayout,
        source: &RemoteEndpoint,
        target: Option<&RemoteEndpoint>,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        let result = self.prepare(layout, source, target, &mut report);
        let result = result.and_then(|()| self.run_sync(layout, source, target, &mut report));
        Self::finish(layout, report, result)
    }

    /// Fetch from the source and push to the target of an existing clone.
    ///
    /// # Errors
    /// Returns [`VcsError::StorageMissing`] if the clone does not exist, or
    /// the error of the failing VCS step.
    pub fn sync(
        &self,
        layout: &MirrorLayout,
        source: &RemoteEndpoint,
        target: Option<&RemoteEndpoint>,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        let result = self.run_sync(layout, source, target, &mut report);
        Self::finish(layout, report, result)
    }

    /// Delete the clone. Returns `false` when there was nothing to delete.
    ///
    /// # Errors
    /// Returns error if the directory cannot be removed.
    pub fn remove(&self, layout: &MirrorLayout) -> Result<bool> {
        let path = layout.project_path();
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&path).map_err(|e| VcsError::io(&path, e))?;
        info!(path = ?path, "mirror clone removed");
        Ok(true)
    }

    fn finish(
        layout: &MirrorLayout,
        mut report: ExecutionReport,
        result: Result<()>,
    ) -> Result<ExecutionReport> {
        match result {
            Ok(()) => {
                report.enter(layout, MirrorState::Done);
                Ok(report)
            }
            Err(e) => {
                report.enter(layout, MirrorState::Failed);
                warn!(mirror = %layout.name, error = %e, "mirror execution failed");
                Err(e)
            }
        }
    }

    fn prepare(
        &self,
        layout: &MirrorLayout,
        source: &RemoteEndpoint,
        target: Option<&RemoteEndpoint>,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        fs::create_dir_all(&layout.namespace).map_err(|e| VcsError::io(&layout.namespace, e))?;
        let project = layout.project_path();
        let kind = source.vcs_kind();

        match self.state_of(layout) {
            MirrorState::Absent => {
                report.enter(layout, MirrorState::Absent);
                report.enter(layout, MirrorState::Cloning);
                info!(url = %source.url(), kind = %kind, "creating mirror");
                self.clone_source(source, &project)?;
                report.cloned = true;

                if !project.is_dir() {
                    return Err(VcsError::StorageMissing { path: project });
                }
                if let Some(target) = target {
                    self.git.add_remote(&project, TARGET_REMOTE, &target.url())?;
                }
            }
            _ => {
                debug!(path = ?project, "mirror exists, refreshing remotes");
                if kind != VcsKind::Svn {
                    self.git.upsert_remote(&project, SOURCE_REMOTE, &source.url())?;
                }
                if let Some(target) = target {
                    self.git.upsert_remote(&project, TARGET_REMOTE, &target.url())?;
                }
            }
        }

        report.enter(layout, MirrorState::Linked);
        Ok(())
    }

    fn clone_source(&self, source: &RemoteEndpoint, project: &Path) -> Result<()> {
        match source.vcs_kind() {
            VcsKind::Svn => SvnBridge::new(self.git.clone()).clone(&source.url(), project),
            kind => {
                self.git.clone_mirror(&source.url(), project)?;
                if kind.needs_repack() {
                    self.git.gc_aggressive(project)?;
                }
                Ok(())
            }
        }
    }

    fn run_sync(
        &self,
        layout: &MirrorLayout,
        source: &RemoteEndpoint,
        target: Option<&RemoteEndpoint>,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        if !layout.namespace.is_dir() {
            return Err(VcsError::StorageMissing {
                path: layout.namespace.clone(),
            });
        }
        let project = layout.project_path();
        if !project.is_dir() {
            return Err(VcsError::StorageMissing { path: project });
        }

        report.enter(layout, MirrorState::Syncing);

        if source.vcs_kind() == VcsKind::Svn {
            SvnBridge::new(self.git.clone()).update(&project)?;
            if let Some(target) = target {
                self.git.push_all(
                    &project,
                    TARGET_REMOTE,
                    target.is_force_update,
                    target.is_prune_mirrors,
                )?;
            }
        } else {
            self.git.fetch(
                &project,
                SOURCE_REMOTE,
                source.is_force_update,
                source.is_prune_mirrors,
            )?;
            match target {
                Some(target) => self.git.push_mirror(
                    &project,
                    TARGET_REMOTE,
                    target.is_force_update,
                    target.is_prune_mirrors,
                )?,
                None => debug!(mirror = %layout.name, "no target, skipping push"),
            }
        }

        info!(mirror = %layout.name, "mirror sync done");
        Ok(())
    }
}
