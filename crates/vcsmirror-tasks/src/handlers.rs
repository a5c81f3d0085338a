//! Task bodies and their registration.

use crate::context::TaskContext;
use crate::error::{Result, TaskError};
use crate::hosting::{DeployKeySpec, HostedProject, ProjectSpec};
use crate::registry::{LockScope, TaskRegistry};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};
use vcsmirror_core::{InvokedBy, MirrorId, MirrorKind, TaskSignature, UserId};
use vcsmirror_scheduler::{BACKEND_CLEANUP, set_periodic_expression};
use vcsmirror_store::{
    CatalogRepo, LockRepo, Mirror, MirrorRepo, PullMirror, TaskMetaRepo, User, UserRepo,
};
use vcsmirror_vcs::{RemoteEndpoint, TrustOutcome};

/// Generate a user's deploy keypair.
pub const CREATE_RSA_PAIR: &str = "create_rsa_pair";
/// Add a per-user SSH host alias.
pub const CREATE_SSH_CONFIG: &str = "create_ssh_config";
/// Add a host's keys to a user's known-hosts file.
pub const TRUST_HOST: &str = "trust_host";

/// `save_{kind}_mirror`.
#[must_use]
pub const fn save_task_name(kind: MirrorKind) -> &'static str {
    match kind {
        MirrorKind::Pull => "save_pull_mirror",
        MirrorKind::Push => "save_push_mirror",
    }
}

/// `sync_{kind}_mirror`.
#[must_use]
pub const fn sync_task_name(kind: MirrorKind) -> &'static str {
    match kind {
        MirrorKind::Pull => "sync_pull_mirror",
        MirrorKind::Push => "sync_push_mirror",
    }
}

/// `delete_{kind}_mirror`.
#[must_use]
pub const fn delete_task_name(kind: MirrorKind) -> &'static str {
    match kind {
        MirrorKind::Pull => "delete_pull_mirror",
        MirrorKind::Push => "delete_push_mirror",
    }
}

/// Register every task the worker knows.
pub fn register_all(registry: &mut TaskRegistry) -> &mut TaskRegistry {
    for kind in [MirrorKind::Pull, MirrorKind::Push] {
        registry
            .register(save_task_name(kind), LockScope::NameAndArgs, move |ctx, sig| {
                let id = int_arg(sig, 0)?;
                match kind {
                    MirrorKind::Pull => save_pull_mirror(ctx, id),
                    MirrorKind::Push => save_push_mirror(ctx, id),
                }
            })
            .register(sync_task_name(kind), LockScope::NameAndArgs, move |ctx, sig| {
                sync_mirror(ctx, kind, int_arg(sig, 0)?)
            })
            .register(
                vcsmirror_scheduler::cron_task_name(kind),
                LockScope::NameAndArgs,
                move |ctx, sig| sync_mirror_cron(ctx, kind, int_arg(sig, 0)?),
            )
            .register(delete_task_name(kind), LockScope::NameAndArgs, move |ctx, sig| {
                delete_mirror(ctx, kind, int_arg(sig, 0)?)
            });
    }
    registry
        .register(CREATE_RSA_PAIR, LockScope::NameAndArgs, |ctx, sig| {
            create_rsa_pair(ctx, int_arg(sig, 0)?)
        })
        .register(CREATE_SSH_CONFIG, LockScope::NameOnly, |ctx, sig| {
            create_ssh_config(ctx, int_arg(sig, 0)?, str_arg(sig, 1)?, str_arg(sig, 2)?)
        })
        .register(TRUST_HOST, LockScope::NameAndArgs, |ctx, sig| {
            let port = u16::try_from(int_arg(sig, 2)?)
                .map_err(|_| TaskError::invalid_arguments(&sig.name, "port out of range"))?;
            trust_host(ctx, int_arg(sig, 0)?, str_arg(sig, 1)?, port)
        })
        .register(BACKEND_CLEANUP, LockScope::NameAndArgs, |ctx, _| backend_cleanup(ctx))
}

fn int_arg(sig: &TaskSignature, index: usize) -> Result<i64> {
    sig.int_arg(index)
        .ok_or_else(|| TaskError::invalid_arguments(&sig.name, format!("argument {index} must be an integer")))
}

fn str_arg(sig: &TaskSignature, index: usize) -> Result<&str> {
    sig.str_arg(index)
        .ok_or_else(|| TaskError::invalid_arguments(&sig.name, format!("argument {index} must be a string")))
}

fn endpoint(mirror: &Mirror, location: Option<&str>, missing: &'static str) -> Result<RemoteEndpoint> {
    let location = location.ok_or(TaskError::MirrorIncomplete {
        kind: mirror.kind,
        id: mirror.id,
        missing,
    })?;
    Ok(RemoteEndpoint::parse(location)?.with_flags(mirror.is_force_update, mirror.is_prune_mirrors))
}

/// Keypair present on disk and its public half enabled on `project_id`.
fn enable_deploy_key(ctx: &TaskContext, user: &User, project_id: i64, can_push: bool) -> Result<i64> {
    ctx.identities().ensure_keypair(user.id)?;
    let public_key = ctx.identities().public_key(user.id)?;
    let key_id = ctx.hosting().enable_deploy_key(
        project_id,
        &DeployKeySpec {
            existing_id: user.deploy_key_id,
            title: format!("vcsmirror {} ({})", user.name, user.id),
            public_key,
            can_push,
        },
    )?;
    debug!(user_id = user.id, project_id, key_id, can_push, "deploy key enabled");
    Ok(key_id)
}

/// Route the hosting-side clone URL through the owner's alias and trust the host.
fn hosted_endpoint(ctx: &TaskContext, user_id: UserId, project: &HostedProject) -> Result<RemoteEndpoint> {
    let hosted = RemoteEndpoint::parse(&project.ssh_url_to_repo)?;
    ctx.identities().trust_host(user_id, hosted.hostname(), hosted.port())?;
    Ok(ctx.identities().route(user_id, &hosted)?)
}

fn project_spec(pull: &PullMirror, namespace_id: i64) -> ProjectSpec {
    let settings = &pull.settings;
    ProjectSpec {
        name: settings.project_name.clone(),
        description: format!(
            "Mirror of {}",
            pull.mirror.source.as_deref().unwrap_or_default()
        ),
        namespace_id,
        visibility: settings.visibility.clone(),
        issues_enabled: settings.is_issues_enabled,
        wall_enabled: settings.is_wall_enabled,
        wiki_enabled: settings.is_wiki_enabled,
        snippets_enabled: settings.is_snippets_enabled,
        merge_requests_enabled: settings.is_merge_requests_enabled,
        force_create: settings.is_force_create,
    }
}

/// Create or update the hosted project of a pull mirror and return the
/// push target it should mirror into.
fn provision_pull_target(ctx: &TaskContext, pull: &PullMirror, user: &User) -> Result<RemoteEndpoint> {
    let mirror = &pull.mirror;
    let (group, existing) = ctx.store().read(|c| {
        let catalog = CatalogRepo::new(c);
        let group = match pull.settings.group_id {
            Some(id) => catalog.group(id)?,
            None => None,
        };
        let existing = match mirror.project_id {
            Some(id) => catalog.project(id)?.map(|p| p.hosted_id),
            None => None,
        };
        Ok((group, existing))
    })?;
    let group = group.ok_or_else(|| TaskError::invalid_request(format!("pull mirror {} has no group", mirror.id)))?;

    let hosted_group = ctx.hosting().get_group(group.hosted_id)?;
    let project = ctx
        .hosting()
        .get_or_create_project(existing, &project_spec(pull, hosted_group.id))?;
    let key_id = enable_deploy_key(ctx, user, project.id, true)?;
    let target = hosted_endpoint(ctx, user.id, &project)?
        .with_flags(mirror.is_force_update, mirror.is_prune_mirrors);

    let target_url = target.url();
    ctx.store().write(|tx| {
        let local = CatalogRepo::new(tx).upsert_project(
            project.id,
            &project.name,
            &project.name_with_namespace,
            Some(project.web_url.as_str()),
        )?;
        let mirrors = MirrorRepo::new(tx);
        mirrors.set_project(MirrorKind::Pull, mirror.id, Some(local.id))?;
        mirrors.set_target(MirrorKind::Pull, mirror.id, Some(&target_url))?;
        UserRepo::new(tx).set_deploy_key(user.id, Some(key_id))
    })?;
    info!(mirror_id = mirror.id, project = %project.name_with_namespace, "hosted project ready");
    Ok(target)
}

fn save_pull_mirror(ctx: &TaskContext, mirror_id: MirrorId) -> Result<Value> {
    let (pull, user) = ctx.store().read(|c| {
        let pull = MirrorRepo::new(c).get_pull(mirror_id)?;
        let user = match &pull {
            Some(pull) => Some(UserRepo::new(c).require(pull.mirror.user_id)?),
            None => None,
        };
        Ok(pull.zip(user))
    })?
    .ok_or_else(|| TaskError::not_found(MirrorKind::Pull.model_name(), mirror_id))?;
    let mirror = &pull.mirror;
    let source = endpoint(mirror, mirror.source.as_deref(), "source")?;

    let target = if pull.settings.is_no_remote {
        None
    } else if pull.settings.is_no_create {
        Some(endpoint(mirror, mirror.target.as_deref(), "target")?)
    } else {
        Some(provision_pull_target(ctx, &pull, &user)?)
    };

    let layout = ctx.layout(MirrorKind::Pull, mirror.user_id, mirror.id);
    let report = ctx.executor().create_or_update(&layout, &source, target.as_ref())?;
    ctx.store().write(|tx| {
        let mirrors = MirrorRepo::new(tx);
        mirrors.set_foreign_vcs_type(MirrorKind::Pull, mirror.id, source.vcs_kind().as_str())?;
        mirrors.set_last_sync(MirrorKind::Pull, mirror.id, Utc::now())
    })?;
    info!(mirror_id, cloned = report.cloned, "pull mirror saved");
    Ok(json!({
        "mirror_id": mirror_id,
        "cloned": report.cloned,
        "target": target.map(|t| t.url()),
    }))
}

fn save_push_mirror(ctx: &TaskContext, mirror_id: MirrorId) -> Result<Value> {
    let (mirror, user, project) = ctx.store().read(|c| {
        let mirror = MirrorRepo::new(c).require(MirrorKind::Push, mirror_id)?;
        let user = UserRepo::new(c).require(mirror.user_id)?;
        let project = match mirror.project_id {
            Some(id) => CatalogRepo::new(c).project(id)?,
            None => None,
        };
        Ok((mirror, user, project))
    })?;
    let target = endpoint(&mirror, mirror.target.as_deref(), "target")?;
    let project = project.ok_or(TaskError::MirrorIncomplete {
        kind: MirrorKind::Push,
        id: mirror_id,
        missing: "project",
    })?;

    let hosted = ctx.hosting().get_project(project.hosted_id)?;
    let key_id = enable_deploy_key(ctx, &user, hosted.id, false)?;
    let source = hosted_endpoint(ctx, user.id, &hosted)?
        .with_flags(mirror.is_force_update, mirror.is_prune_mirrors);
    if let Some(base) = ctx.hook_base_url() {
        let url = format!(
            "{base}/api/{}/sync/{mirror_id}?token={}",
            MirrorKind::Push,
            mirror.hook_token
        );
        ctx.hosting().create_hook(hosted.id, &url)?;
    }

    let source_url = source.url();
    ctx.store().write(|tx| {
        MirrorRepo::new(tx).set_source(MirrorKind::Push, mirror_id, Some(&source_url))?;
        UserRepo::new(tx).set_deploy_key(user.id, Some(key_id))
    })?;

    let layout = ctx.layout(MirrorKind::Push, mirror.user_id, mirror_id);
    let report = ctx.executor().create_or_update(&layout, &source, Some(&target))?;
    ctx.store().write(|tx| {
        let mirrors = MirrorRepo::new(tx);
        mirrors.set_foreign_vcs_type(MirrorKind::Push, mirror_id, target.vcs_kind().as_str())?;
        mirrors.set_last_sync(MirrorKind::Push, mirror_id, Utc::now())
    })?;
    info!(mirror_id, cloned = report.cloned, "push mirror saved");
    Ok(json!({
        "mirror_id": mirror_id,
        "cloned": report.cloned,
        "source": source_url,
    }))
}

fn sync_mirror(ctx: &TaskContext, kind: MirrorKind, mirror_id: MirrorId) -> Result<Value> {
    let (mirror, no_remote) = ctx.store().read(|c| {
        let repo = MirrorRepo::new(c);
        match kind {
            MirrorKind::Pull => Ok(repo
                .get_pull(mirror_id)?
                .map(|pull| (pull.mirror, pull.settings.is_no_remote))),
            MirrorKind::Push => Ok(repo.get(kind, mirror_id)?.map(|m| (m, false))),
        }
    })?
    .ok_or_else(|| TaskError::not_found(kind.model_name(), mirror_id))?;

    let source = endpoint(&mirror, mirror.source.as_deref(), "source")?;
    let target = if no_remote {
        None
    } else {
        Some(endpoint(&mirror, mirror.target.as_deref(), "target")?)
    };

    let layout = ctx.layout(kind, mirror.user_id, mirror_id);
    ctx.executor().sync(&layout, &source, target.as_ref())?;
    ctx.store()
        .write(|tx| MirrorRepo::new(tx).set_last_sync(kind, mirror_id, Utc::now()))?;
    info!(kind = %kind, mirror_id, "mirror synced");
    Ok(json!({ "mirror_id": mirror_id }))
}

fn sync_mirror_cron(ctx: &TaskContext, kind: MirrorKind, mirror_id: MirrorId) -> Result<Value> {
    let run = ctx.service().schedule_sync(kind, mirror_id, InvokedBy::Scheduler)?;
    Ok(json!({ "task_id": run.task_id.to_string(), "task_run": run.id }))
}

fn delete_mirror(ctx: &TaskContext, kind: MirrorKind, mirror_id: MirrorId) -> Result<Value> {
    let mirror = ctx
        .store()
        .read(|c| MirrorRepo::new(c).get_for_deletion(kind, mirror_id))?
        .ok_or_else(|| TaskError::not_found(kind.model_name(), mirror_id))?;

    set_periodic_expression(ctx.store(), kind, mirror_id, None)?;
    let removed = ctx
        .executor()
        .remove(&ctx.layout(kind, mirror.user_id, mirror_id))?;
    ctx.store().write(|tx| MirrorRepo::new(tx).delete(kind, mirror_id))?;
    info!(kind = %kind, mirror_id, removed, "mirror deleted");
    Ok(json!({ "mirror_id": mirror_id, "removed": removed }))
}

fn create_rsa_pair(ctx: &TaskContext, user_id: UserId) -> Result<Value> {
    ctx.store().read(|c| UserRepo::new(c).require(user_id))?;
    let generated = ctx.identities().ensure_keypair(user_id)?;
    ctx.store()
        .write(|tx| UserRepo::new(tx).set_rsa_pair(user_id, true))?;
    Ok(json!({ "user_id": user_id, "generated": generated }))
}

fn create_ssh_config(ctx: &TaskContext, user_id: UserId, alias: &str, git_url: &str) -> Result<Value> {
    let endpoint = RemoteEndpoint::parse(git_url)?;
    ctx.identities().ensure_keypair(user_id)?;
    let added = ctx
        .identities()
        .ensure_host_alias(user_id, alias, endpoint.hostname(), endpoint.port())?;
    Ok(json!({ "alias": alias, "added": added }))
}

fn trust_host(ctx: &TaskContext, user_id: UserId, hostname: &str, port: u16) -> Result<Value> {
    let fingerprints = match ctx.identities().trust_host(user_id, hostname, port)? {
        TrustOutcome::AlreadyKnown => Vec::new(),
        TrustOutcome::Added { fingerprints } => fingerprints,
    };
    Ok(json!({ "host": hostname, "port": port, "added": fingerprints }))
}

fn backend_cleanup(ctx: &TaskContext) -> Result<Value> {
    let now = Utc::now();
    let done_before = now - ctx.result_expires();
    let (results, locks) = ctx.store().write(|tx| {
        let results = TaskMetaRepo::new(tx).purge_finished(done_before)?;
        let locks = LockRepo::new(tx).purge_expired(now)?;
        Ok((results, locks))
    })?;
    info!(results, locks, "backend cleanup finished");
    Ok(json!({ "results": results, "locks": locks }))
}
