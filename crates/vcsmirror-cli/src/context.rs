//! Settings and shared handles for one CLI invocation.

use anyhow::Context as _;
use std::sync::Arc;
use vcsmirror_config::{Resolved, Settings};
use vcsmirror_store::Store;
use vcsmirror_tasks::{MirrorService, SqliteTaskQueue, TaskContext};
use vcsmirror_vcs::{IdentityRouter, SystemRunner};

/// Resolved settings plus the lazily opened store.
#[derive(Debug)]
pub struct Context {
    resolved: Resolved,
}

impl Context {
    pub const fn new(resolved: Resolved) -> Self {
        Self { resolved }
    }

    pub const fn resolved(&self) -> &Resolved {
        &self.resolved
    }

    pub const fn settings(&self) -> &Settings {
        &self.resolved.settings
    }

    /// Open (and migrate) the configured database.
    pub fn open_store(&self) -> anyhow::Result<Arc<Store>> {
        let path = &self.settings().database;
        let store = Store::open(path).with_context(|| format!("failed to open database {}", path.display()))?;
        Ok(Arc::new(store))
    }

    pub fn queue(&self, store: Arc<Store>) -> Arc<SqliteTaskQueue> {
        Arc::new(SqliteTaskQueue::new(store).with_default_queue(&self.settings().default_queue))
    }

    pub fn service(&self, store: Arc<Store>) -> MirrorService {
        let queue = self.queue(store.clone());
        MirrorService::new(store, queue)
    }

    /// Everything a worker needs, running real `git`/`ssh` binaries.
    pub fn task_context(&self, store: Arc<Store>) -> TaskContext {
        let settings = self.settings();
        let queue = self.queue(store.clone());
        let expires = chrono::Duration::from_std(settings.worker.result_expires())
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        TaskContext::new(
            store,
            queue,
            Arc::new(SystemRunner),
            &settings.storage_root,
            &settings.ssh_dir,
        )
        .with_hook_base_url(settings.hook_base_url.clone())
        .with_result_expires(expires)
    }

    pub fn identities(&self) -> IdentityRouter {
        IdentityRouter::new(&self.settings().ssh_dir, Arc::new(SystemRunner))
    }
}
