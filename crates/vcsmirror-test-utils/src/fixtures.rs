//! Temporary workspaces for integration tests.
//!
//! A [`TempWorkspace`] owns a temp directory laid out like a deployment:
//! a mirror storage root, an ssh directory and an on-disk store. Everything
//! is removed when the workspace is dropped.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vcsmirror_core::{MirrorKind, UserId};
use vcsmirror_store::{
    Mirror, MirrorRepo, NewMirror, PullMirror, PullSettings, Result, Store, UserRepo,
};

/// Temp directory with storage root, ssh dir and a migrated store.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
    store: Store,
}

impl TempWorkspace {
    /// Create the directories and open the store.
    ///
    /// # Panics
    /// Panics if the temp directory or store cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp workspace");
        std::fs::create_dir_all(dir.path().join("repositories")).expect("create storage root");
        std::fs::create_dir_all(dir.path().join("ssh")).expect("create ssh dir");
        let store = Store::open(dir.path().join("vcsmirror.sqlite3")).expect("open store");
        Self { dir, store }
    }

    /// Workspace root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Root of the per-mirror clones.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.dir.path().join("repositories")
    }

    /// Directory holding keys, known-hosts files and the ssh config.
    #[must_use]
    pub fn ssh_dir(&self) -> PathBuf {
        self.dir.path().join("ssh")
    }

    /// Database file.
    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.dir.path().join("vcsmirror.sqlite3")
    }

    /// The workspace store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Insert a user.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    pub fn seed_user(&self, name: &str) -> Result<UserId> {
        self.store
            .write(|tx| UserRepo::new(tx).insert(name, None).map(|u| u.id))
    }

    /// Insert a pull mirror owned by `user_id`.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    pub fn seed_pull_mirror(
        &self,
        user_id: UserId,
        source: &str,
        settings: PullSettings,
    ) -> Result<PullMirror> {
        let new = new_mirror(user_id, Some(source), None);
        self.store
            .write(|tx| MirrorRepo::new(tx).insert_pull(&new, &settings))
    }

    /// Insert a push mirror owned by `user_id`.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    pub fn seed_push_mirror(&self, user_id: UserId, target: &str) -> Result<Mirror> {
        let new = new_mirror(user_id, None, Some(target));
        self.store.write(|tx| MirrorRepo::new(tx).insert_push(&new))
    }

    /// Directory a mirror is cloned into.
    #[must_use]
    pub fn mirror_dir(&self, kind: MirrorKind, user_id: UserId, mirror_id: i64) -> PathBuf {
        self.storage_root()
            .join(kind.as_str())
            .join(user_id.to_string())
            .join(mirror_id.to_string())
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

fn new_mirror(user_id: UserId, source: Option<&str>, target: Option<&str>) -> NewMirror {
    NewMirror {
        user_id,
        source: source.map(str::to_string),
        target: target.map(str::to_string),
        hook_token: format!("hook-{}", uuid::Uuid::new_v4().simple()),
        is_prune_mirrors: true,
        ..NewMirror::default()
    }
}
