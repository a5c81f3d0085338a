//! Shared state handed to every task handler.

use crate::hosting::{HostingClient, UnconfiguredHosting};
use crate::service::MirrorService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vcsmirror_core::{MirrorId, MirrorKind, TaskQueue, UserId};
use vcsmirror_store::Store;
use vcsmirror_vcs::{CommandRunner, IdentityRouter, MirrorExecutor, MirrorLayout};

/// Default retention of finished task results, in seconds.
pub const DEFAULT_RESULT_EXPIRES_SECS: i64 = 600;

/// Everything a handler needs to do its work.
#[derive(Clone)]
pub struct TaskContext {
    store: Arc<Store>,
    queue: Arc<dyn TaskQueue>,
    executor: MirrorExecutor,
    identities: Arc<IdentityRouter>,
    hosting: Arc<dyn HostingClient>,
    storage_root: PathBuf,
    hook_base_url: Option<String>,
    result_expires: chrono::Duration,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("store", &self.store.path())
            .field("hosting", &self.hosting)
            .field("storage_root", &self.storage_root)
            .field("hook_base_url", &self.hook_base_url)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Create a context running VCS and SSH tools through `runner`.
    ///
    /// Clones live below `storage_root`; keys, known-hosts files and the
    /// shared ssh config below `ssh_dir`.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        queue: Arc<dyn TaskQueue>,
        runner: Arc<dyn CommandRunner>,
        storage_root: impl Into<PathBuf>,
        ssh_dir: impl Into<PathBuf>,
    ) -> Self {
        let identities = Arc::new(IdentityRouter::new(ssh_dir, runner.clone()));
        let executor = MirrorExecutor::new(runner).with_ssh_command(identities.ssh_command());
        Self {
            store,
            queue,
            executor,
            identities,
            hosting: Arc::new(UnconfiguredHosting),
            storage_root: storage_root.into(),
            hook_base_url: None,
            result_expires: chrono::Duration::seconds(DEFAULT_RESULT_EXPIRES_SECS),
        }
    }

    /// Use `hosting` for group, project, key and hook calls.
    #[must_use]
    pub fn with_hosting(mut self, hosting: Arc<dyn HostingClient>) -> Self {
        self.hosting = hosting;
        self
    }

    /// Register push hooks under `base_url`.
    #[must_use]
    pub fn with_hook_base_url(mut self, base_url: Option<String>) -> Self {
        self.hook_base_url = base_url.map(|url| url.trim_end_matches('/').to_string());
        self
    }

    /// Keep finished task results for `expires`.
    #[must_use]
    pub const fn with_result_expires(mut self, expires: chrono::Duration) -> Self {
        self.result_expires = expires;
        self
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The queue follow-up tasks are sent to.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// The mirror executor.
    #[must_use]
    pub const fn executor(&self) -> &MirrorExecutor {
        &self.executor
    }

    /// Per-user SSH identities.
    #[must_use]
    pub fn identities(&self) -> &IdentityRouter {
        &self.identities
    }

    /// The hosting-service client.
    #[must_use]
    pub fn hosting(&self) -> &dyn HostingClient {
        self.hosting.as_ref()
    }

    /// Root of the clones.
    #[must_use]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Base URL for push hooks, without trailing slash.
    #[must_use]
    pub fn hook_base_url(&self) -> Option<&str> {
        self.hook_base_url.as_deref()
    }

    /// Retention of finished task results.
    #[must_use]
    pub const fn result_expires(&self) -> chrono::Duration {
        self.result_expires
    }

    /// Clone location of a mirror: `<storage_root>/<kind>/<user>/<mirror>`.
    #[must_use]
    pub fn layout(&self, kind: MirrorKind, user_id: UserId, mirror_id: MirrorId) -> MirrorLayout {
        MirrorLayout::new(
            self.storage_root.join(kind.as_str()).join(user_id.to_string()),
            mirror_id.to_string(),
        )
    }

    /// Service API over this context's store and queue.
    #[must_use]
    pub fn service(&self) -> MirrorService {
        MirrorService::new(self.store.clone(), self.queue.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcsmirror_test_utils::{RecordingQueue, RecordingRunner};

    #[test]
    fn layout_nests_kind_user_and_mirror() {
        let ctx = TaskContext::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(RecordingQueue::new()),
            Arc::new(RecordingRunner::new()),
            "/srv/mirrors",
            "/home/mirror/.ssh",
        )
        .with_hook_base_url(Some("https://mirror.example.com/".into()));

        assert_eq!(
            ctx.layout(MirrorKind::Push, 4, 17).project_path(),
            PathBuf::from("/srv/mirrors/push/4/17")
        );
        assert_eq!(ctx.hook_base_url(), Some("https://mirror.example.com"));
        assert_eq!(ctx.result_expires(), chrono::Duration::minutes(10));
    }
}
