//! Row types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vcsmirror_core::{InvokedBy, MirrorId, MirrorKind, UserId};

/// A user owning mirrors and a deploy keypair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Row id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Id of the user at the hosting service.
    pub hosted_id: Option<i64>,
    /// Id of the user's deploy key at the hosting service.
    pub deploy_key_id: Option<i64>,
    /// Whether the user's keypair has been generated.
    pub is_rsa_pair_set: bool,
}

/// Local copy of a hosting-service group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorGroup {
    /// Row id.
    pub id: i64,
    /// Id at the hosting service.
    pub hosted_id: i64,
    /// Group name.
    pub name: String,
}

/// Local copy of a hosting-service project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Row id.
    pub id: i64,
    /// Id at the hosting service.
    pub hosted_id: i64,
    /// Project name.
    pub name: String,
    /// `group / name` path.
    pub name_with_namespace: String,
    /// Browser URL.
    pub web_url: Option<String>,
}

/// Fields shared by pull and push mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    /// Direction.
    pub kind: MirrorKind,
    /// Row id.
    pub id: MirrorId,
    /// Owner.
    pub user_id: UserId,
    /// Linked hosting-service project.
    pub project_id: Option<i64>,
    /// Periodic sync entry.
    pub periodic_task_id: Option<i64>,
    /// Location synced from.
    pub source: Option<String>,
    /// Location synced to.
    pub target: Option<String>,
    /// VCS kind of the foreign side, as detected when saved.
    pub foreign_vcs_type: Option<String>,
    /// Last successful sync.
    pub last_sync: Option<DateTime<Utc>>,
    /// Free-form note.
    pub note: String,
    /// Secret for hook-triggered syncs.
    pub hook_token: String,
    /// Force non-fast-forward updates.
    pub is_force_update: bool,
    /// Prune vanished refs.
    pub is_prune_mirrors: bool,
    /// Soft-deleted, waiting for the delete task.
    pub is_deleted: bool,
}

/// Settings only pull mirrors carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSettings {
    /// Local group the project is created in.
    pub group_id: Option<i64>,
    /// Name of the project to create.
    pub project_name: String,
    /// Path of the hosted project this mirror pushes into.
    pub project_mirror: Option<String>,
    /// Do not create the project at the hosting service.
    pub is_no_create: bool,
    /// Create the project even if one with the name exists.
    pub is_force_create: bool,
    /// Keep a local mirror only, no hosting-service target.
    pub is_no_remote: bool,
    /// Project feature: issues.
    pub is_issues_enabled: bool,
    /// Project feature: wall.
    pub is_wall_enabled: bool,
    /// Project feature: wiki.
    pub is_wiki_enabled: bool,
    /// Project feature: snippets.
    pub is_snippets_enabled: bool,
    /// Project feature: merge requests.
    pub is_merge_requests_enabled: bool,
    /// Project visibility (`private`, `internal`, `public`).
    pub visibility: String,
}

/// A pull mirror with its extra settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullMirror {
    /// Shared fields.
    pub mirror: Mirror,
    /// Pull-only settings.
    pub settings: PullSettings,
}

/// Values for a new mirror row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMirror {
    /// Owner.
    pub user_id: UserId,
    /// Linked project, if already known.
    pub project_id: Option<i64>,
    /// Source location.
    pub source: Option<String>,
    /// Target location.
    pub target: Option<String>,
    /// Foreign VCS kind.
    pub foreign_vcs_type: Option<String>,
    /// Free-form note.
    pub note: String,
    /// Secret for hook-triggered syncs.
    pub hook_token: String,
    /// Force non-fast-forward updates.
    pub is_force_update: bool,
    /// Prune vanished refs.
    pub is_prune_mirrors: bool,
}

/// Audit record of one enqueued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Row id.
    pub id: i64,
    /// Mirror the task acted on.
    pub mirror: Option<(MirrorKind, MirrorId)>,
    /// Registered task name.
    pub task_name: String,
    /// Who triggered it.
    pub invoked_by: InvokedBy,
    /// Task-meta record id.
    pub task_id: uuid::Uuid,
    /// Run this one was chained after.
    pub parent_id: Option<i64>,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// Values for a new task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskRun {
    /// Mirror the task acts on.
    pub mirror: Option<(MirrorKind, MirrorId)>,
    /// Registered task name.
    pub task_name: String,
    /// Who triggered it.
    pub invoked_by: InvokedBy,
    /// Task-meta record id.
    pub task_id: uuid::Uuid,
    /// Run this one is chained after.
    pub parent_id: Option<i64>,
}
