//! Service API: what the web tier and the CLI call.
//!
//! Every `schedule_*` call records [`TaskRun`] rows under pre-assigned task
//! ids, then enqueues the work and returns at once with those rows.

use crate::error::{Result, TaskError};
use crate::handlers::{
    CREATE_RSA_PAIR, CREATE_SSH_CONFIG, TRUST_HOST, delete_task_name, save_task_name,
    sync_task_name,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use vcsmirror_core::{InvokedBy, MirrorId, MirrorKind, TaskQueue, TaskSignature, UserId};
use vcsmirror_store::{MirrorRepo, NewTaskRun, Store, TaskRun, TaskRunRepo, User, UserRepo};
use vcsmirror_vcs::{Protocol, RemoteEndpoint, host_alias};

/// Enqueues mirror work and records who asked for it.
#[derive(Clone)]
pub struct MirrorService {
    store: Arc<Store>,
    queue: Arc<dyn TaskQueue>,
}

impl std::fmt::Debug for MirrorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorService")
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl MirrorService {
    /// Create a service over `store` and `queue`.
    #[must_use]
    pub fn new(store: Arc<Store>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Enqueue a fetch-and-push of an existing mirror.
    ///
    /// # Errors
    /// Returns [`TaskError::Store`] with a not-found error for unknown or
    /// deleted mirrors, or the queue error.
    pub fn schedule_sync(&self, kind: MirrorKind, mirror_id: MirrorId, invoked_by: InvokedBy) -> Result<TaskRun> {
        self.store.read(|c| MirrorRepo::new(c).require(kind, mirror_id))?;
        let signature = TaskSignature::new(sync_task_name(kind))
            .arg(mirror_id)
            .with_task_id(Uuid::new_v4());
        let run = self.record(Some((kind, mirror_id)), &signature, invoked_by)?;
        self.queue.enqueue(signature)?;
        info!(kind = %kind, mirror_id, invoked_by = %invoked_by, task_id = %run.task_id, "sync scheduled");
        Ok(run)
    }

    /// Enqueue the save of a new or edited mirror.
    ///
    /// SSH locations on the foreign side are rewritten to the owner's host
    /// alias first, and the chain provisions the keypair, alias and host
    /// trust before the save runs.
    ///
    /// # Errors
    /// Returns error if the mirror or its owner is missing, the foreign
    /// location is unset or malformed, or the queue refuses the chain.
    pub fn schedule_create_or_update(
        &self,
        kind: MirrorKind,
        mirror_id: MirrorId,
        invoked_by: InvokedBy,
    ) -> Result<Vec<TaskRun>> {
        let (mirror, user) = self.store.read(|c| {
            let mirror = MirrorRepo::new(c).require(kind, mirror_id)?;
            let user = UserRepo::new(c).require(mirror.user_id)?;
            Ok((mirror, user))
        })?;

        let (foreign, missing) = match kind {
            MirrorKind::Pull => (mirror.source, "source"),
            MirrorKind::Push => (mirror.target, "target"),
        };
        let foreign = foreign.ok_or(TaskError::MirrorIncomplete {
            kind,
            id: mirror_id,
            missing,
        })?;
        let endpoint = RemoteEndpoint::parse(&foreign)?;

        let (mut chain, alias) = identity_links(&user, &endpoint);
        if let Some(alias) = alias {
            let routed = endpoint.with_host_alias(&alias).url();
            self.store.write(|tx| {
                let mirrors = MirrorRepo::new(tx);
                match kind {
                    MirrorKind::Pull => mirrors.set_source(kind, mirror_id, Some(&routed)),
                    MirrorKind::Push => mirrors.set_target(kind, mirror_id, Some(&routed)),
                }
            })?;
        }
        chain.push(TaskSignature::new(save_task_name(kind)).arg(mirror_id));

        self.enqueue_chain(Some((kind, mirror_id)), chain, invoked_by)
    }

    /// Mark the mirror deleted and enqueue its cleanup.
    ///
    /// # Errors
    /// Returns a not-found error if the mirror is unknown or already marked.
    pub fn schedule_delete(&self, kind: MirrorKind, mirror_id: MirrorId, invoked_by: InvokedBy) -> Result<TaskRun> {
        let marked = self
            .store
            .write(|tx| MirrorRepo::new(tx).mark_deleted(kind, mirror_id))?;
        if !marked {
            return Err(TaskError::not_found(kind.model_name(), mirror_id));
        }
        let signature = TaskSignature::new(delete_task_name(kind))
            .arg(mirror_id)
            .with_task_id(Uuid::new_v4());
        let run = self.record(Some((kind, mirror_id)), &signature, invoked_by)?;
        self.queue.enqueue(signature)?;
        info!(kind = %kind, mirror_id, task_id = %run.task_id, "delete scheduled");
        Ok(run)
    }

    /// Enqueue keypair, host alias and host trust for `git_url`, optionally
    /// followed by the save of a mirror.
    ///
    /// Returns no runs when nothing needs provisioning and there is no
    /// follow-up.
    ///
    /// # Errors
    /// Returns error if the user is unknown, the URL is malformed or the
    /// queue refuses the chain.
    pub fn schedule_identity_provisioning(
        &self,
        user_id: UserId,
        git_url: &str,
        follow_up: Option<(MirrorKind, MirrorId)>,
        invoked_by: InvokedBy,
    ) -> Result<Vec<TaskRun>> {
        let user = self.store.read(|c| UserRepo::new(c).require(user_id))?;
        let endpoint = RemoteEndpoint::parse(git_url)?;
        let (mut chain, _) = identity_links(&user, &endpoint);
        if let Some((kind, mirror_id)) = follow_up {
            chain.push(TaskSignature::new(save_task_name(kind)).arg(mirror_id));
        }
        if chain.is_empty() {
            return Ok(Vec::new());
        }
        self.enqueue_chain(follow_up, chain, invoked_by)
    }

    /// Set or clear the cron schedule of a mirror.
    ///
    /// # Errors
    /// Returns error if the expression does not parse or the mirror is unknown.
    pub fn set_periodic_expression(
        &self,
        kind: MirrorKind,
        mirror_id: MirrorId,
        expression: Option<&str>,
    ) -> Result<bool> {
        Ok(vcsmirror_scheduler::set_periodic_expression(
            &self.store,
            kind,
            mirror_id,
            expression,
        )?)
    }

    /// Sync triggered by a hosting-service push hook.
    ///
    /// # Errors
    /// Returns [`TaskError::InvalidRequest`] for a missing or wrong token or
    /// a mirror without project, and [`TaskError::NotFound`] for an unknown
    /// mirror.
    pub fn sync_by_hook(&self, kind: MirrorKind, mirror_id: MirrorId, token: Option<&str>) -> Result<TaskRun> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TaskError::invalid_request("Token was not provided"))?;
        let mirror = self
            .store
            .read(|c| MirrorRepo::new(c).get(kind, mirror_id))?
            .ok_or_else(|| TaskError::not_found(kind.model_name(), mirror_id))?;
        if mirror.hook_token != token {
            return Err(TaskError::invalid_request("Invalid token"));
        }
        if mirror.project_id.is_none() {
            return Err(TaskError::invalid_request("Project mirror is not created"));
        }
        self.schedule_sync(kind, mirror_id, InvokedBy::Hook)
    }

    fn enqueue_chain(
        &self,
        mirror: Option<(MirrorKind, MirrorId)>,
        chain: Vec<TaskSignature>,
        invoked_by: InvokedBy,
    ) -> Result<Vec<TaskRun>> {
        let chain: Vec<TaskSignature> = chain
            .into_iter()
            .map(|sig| match sig.task_id() {
                Some(_) => sig,
                None => sig.with_task_id(Uuid::new_v4()),
            })
            .collect();
        let runs = self.store.write(|tx| {
            let repo = TaskRunRepo::new(tx);
            let mut parent = None;
            let mut runs = Vec::with_capacity(chain.len());
            for link in &chain {
                let run = repo.insert(&NewTaskRun {
                    mirror,
                    task_name: link.name.clone(),
                    invoked_by,
                    task_id: link.task_id().unwrap_or_default(),
                    parent_id: parent,
                })?;
                parent = Some(run.id);
                runs.push(run);
            }
            Ok(runs)
        })?;
        self.queue.enqueue_chain(chain)?;
        info!(
            tasks = ?runs.iter().map(|r| r.task_name.as_str()).collect::<Vec<_>>(),
            invoked_by = %invoked_by,
            "chain scheduled"
        );
        Ok(runs)
    }

    fn record(
        &self,
        mirror: Option<(MirrorKind, MirrorId)>,
        signature: &TaskSignature,
        invoked_by: InvokedBy,
    ) -> Result<TaskRun> {
        Ok(self.store.write(|tx| {
            TaskRunRepo::new(tx).insert(&NewTaskRun {
                mirror,
                task_name: signature.name.clone(),
                invoked_by,
                task_id: signature.task_id().unwrap_or_default(),
                parent_id: None,
            })
        })?)
    }
}

/// Links provisioning `user`'s identity for `endpoint`, plus the alias the
/// endpoint should be stored under when it was not aliased yet.
fn identity_links(user: &User, endpoint: &RemoteEndpoint) -> (Vec<TaskSignature>, Option<String>) {
    let mut links = Vec::new();
    if !user.is_rsa_pair_set {
        links.push(TaskSignature::new(CREATE_RSA_PAIR).arg(user.id));
    }
    if endpoint.protocol() != Protocol::Ssh {
        return (links, None);
    }
    let hostname = endpoint.hostname();
    if hostname.ends_with(&format!("_{}", user.id)) {
        return (links, None);
    }
    let alias = host_alias(hostname, user.id);
    links.push(
        TaskSignature::new(CREATE_SSH_CONFIG)
            .arg(user.id)
            .arg(alias.as_str())
            .arg(endpoint.url()),
    );
    links.push(
        TaskSignature::new(TRUST_HOST)
            .arg(user.id)
            .arg(hostname)
            .arg(endpoint.port()),
    );
    (links, Some(alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vcsmirror_store::PullSettings;
    use vcsmirror_test_utils::{RecordingQueue, TempWorkspace};

    struct Setup {
        ws: TempWorkspace,
        store: Arc<Store>,
        queue: Arc<RecordingQueue>,
        service: MirrorService,
    }

    fn setup() -> Setup {
        let ws = TempWorkspace::new();
        let store = Arc::new(Store::open(ws.database()).unwrap());
        let queue = Arc::new(RecordingQueue::new());
        let service = MirrorService::new(store.clone(), queue.clone());
        Setup {
            ws,
            store,
            queue,
            service,
        }
    }

    #[test]
    fn create_or_update_provisions_ssh_identity_first() {
        let s = setup();
        let user = s.ws.seed_user("ann").unwrap();
        let mirror = s
            .ws
            .seed_pull_mirror(user, "git@github.com:rust-lang/log.git", PullSettings::default())
            .unwrap()
            .mirror;

        let runs = s
            .service
            .schedule_create_or_update(MirrorKind::Pull, mirror.id, InvokedBy::Manual)
            .unwrap();

        assert_eq!(
            s.queue.names(),
            vec!["create_rsa_pair", "create_ssh_config", "trust_host", "save_pull_mirror"]
        );
        let ssh_config = &s.queue.signatures()[1];
        let alias = format!("github.com_{user}");
        assert_eq!(ssh_config.str_arg(1), Some(alias.as_str()));
        assert_eq!(ssh_config.str_arg(2), Some("ssh://git@github.com:22/rust-lang/log.git"));

        let stored = s
            .store
            .read(|c| MirrorRepo::new(c).require(MirrorKind::Pull, mirror.id))
            .unwrap();
        assert_eq!(stored.source, Some(format!("ssh://git@{alias}:22/rust-lang/log.git")));

        assert_eq!(runs.len(), 4);
        assert_eq!(runs[0].parent_id, None);
        for pair in runs.windows(2) {
            assert_eq!(pair[1].parent_id, Some(pair[0].id));
        }
        let ids: Vec<_> = s.queue.signatures().iter().filter_map(TaskSignature::task_id).collect();
        assert_eq!(ids, runs.iter().map(|r| r.task_id).collect::<Vec<_>>());
    }

    #[test]
    fn https_source_with_keypair_saves_directly() {
        let s = setup();
        let user = s.ws.seed_user("ann").unwrap();
        s.store
            .write(|tx| UserRepo::new(tx).set_rsa_pair(user, true))
            .unwrap();
        let mirror = s
            .ws
            .seed_pull_mirror(user, "https://github.com/rust-lang/log.git", PullSettings::default())
            .unwrap()
            .mirror;

        s.service
            .schedule_create_or_update(MirrorKind::Pull, mirror.id, InvokedBy::Manual)
            .unwrap();
        assert_eq!(s.queue.names(), vec!["save_pull_mirror"]);
    }

    #[test]
    fn sync_records_task_run() {
        let s = setup();
        let user = s.ws.seed_user("ann").unwrap();
        let mirror = s.ws.seed_push_mirror(user, "git@example.com:a/b.git").unwrap();

        let run = s
            .service
            .schedule_sync(MirrorKind::Push, mirror.id, InvokedBy::Scheduler)
            .unwrap();
        assert_eq!(run.task_name, "sync_push_mirror");
        assert_eq!(run.invoked_by, InvokedBy::Scheduler);
        assert_eq!(run.mirror, Some((MirrorKind::Push, mirror.id)));

        let listed = s
            .store
            .read(|c| TaskRunRepo::new(c).list_for_mirror(MirrorKind::Push, mirror.id, 10))
            .unwrap();
        assert_eq!(listed, vec![run]);
    }

    #[test]
    fn run_is_recorded_before_enqueue() {
        let s = setup();
        let user = s.ws.seed_user("ann").unwrap();
        let mirror = s.ws.seed_push_mirror(user, "git@example.com:a/b.git").unwrap();
        s.queue.set_unavailable(true);

        let err = s
            .service
            .schedule_sync(MirrorKind::Push, mirror.id, InvokedBy::Manual)
            .unwrap_err();
        assert_eq!(err.code(), vcsmirror_core::ErrorCode::E0301);
        assert!(s.queue.names().is_empty());

        let listed = s
            .store
            .read(|c| TaskRunRepo::new(c).list_for_mirror(MirrorKind::Push, mirror.id, 10))
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].task_name, "sync_push_mirror");

        s.queue.set_unavailable(false);
        let run = s
            .service
            .schedule_sync(MirrorKind::Push, mirror.id, InvokedBy::Manual)
            .unwrap();
        assert_eq!(s.queue.signatures()[0].task_id(), Some(run.task_id));
    }

    #[test]
    fn delete_marks_then_enqueues() {
        let s = setup();
        let user = s.ws.seed_user("ann").unwrap();
        let mirror = s.ws.seed_push_mirror(user, "git@example.com:a/b.git").unwrap();

        s.service
            .schedule_delete(MirrorKind::Push, mirror.id, InvokedBy::Manual)
            .unwrap();
        assert_eq!(s.queue.names(), vec!["delete_push_mirror"]);
        assert!(s
            .store
            .read(|c| MirrorRepo::new(c).get(MirrorKind::Push, mirror.id))
            .unwrap()
            .is_none());

        let again = s.service.schedule_delete(MirrorKind::Push, mirror.id, InvokedBy::Manual);
        assert!(again.unwrap_err().is_not_found());
    }

    #[test]
    fn hook_requires_token_and_project() {
        let s = setup();
        let user = s.ws.seed_user("ann").unwrap();
        let mirror = s.ws.seed_push_mirror(user, "git@example.com:a/b.git").unwrap();
        let push = MirrorKind::Push;

        let err = s.service.sync_by_hook(push, mirror.id, None).unwrap_err();
        assert_eq!(err.to_string(), "Token was not provided");
        let err = s.service.sync_by_hook(push, 999, Some("x")).unwrap_err();
        assert!(err.is_not_found());
        let err = s.service.sync_by_hook(push, mirror.id, Some("wrong")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid token");
        let err = s
            .service
            .sync_by_hook(push, mirror.id, Some(&mirror.hook_token))
            .unwrap_err();
        assert_eq!(err.to_string(), "Project mirror is not created");

        s.store
            .write(|tx| {
                let project = vcsmirror_store::CatalogRepo::new(tx).upsert_project(1, "b", "a / b", None)?;
                MirrorRepo::new(tx).set_project(push, mirror.id, Some(project.id))
            })
            .unwrap();
        let run = s
            .service
            .sync_by_hook(push, mirror.id, Some(&mirror.hook_token))
            .unwrap();
        assert_eq!(run.invoked_by, InvokedBy::Hook);
        assert_eq!(s.queue.names(), vec!["sync_push_mirror"]);
    }

    #[test]
    fn identity_provisioning_with_nothing_to_do_is_empty() {
        let s = setup();
        let user = s.ws.seed_user("ann").unwrap();
        s.store
            .write(|tx| UserRepo::new(tx).set_rsa_pair(user, true))
            .unwrap();

        let runs = s
            .service
            .schedule_identity_provisioning(user, "https://example.com/a.git", None, InvokedBy::Manual)
            .unwrap();
        assert!(runs.is_empty());

        let runs = s
            .service
            .schedule_identity_provisioning(user, "ssh://git@example.com:2222/a.git", None, InvokedBy::Manual)
            .unwrap();
        assert_eq!(runs.len(), 2);
        let trust = &s.queue.signatures()[1];
        assert_eq!(trust.int_arg(2), Some(2222));
    }
}
