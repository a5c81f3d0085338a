//! Hosting-service client seam.
//!
//! The save tasks need a handful of calls against the hosting service
//! (groups, projects, deploy keys, hooks). [`HostingClient`] is that surface;
//! [`MemoryHosting`] implements it in memory and [`UnconfiguredHosting`]
//! refuses every call.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use vcsmirror_core::ErrorCode;

/// Errors returned by the hosting service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostingError {
    /// Group, project or key does not exist.
    #[error("{what} not found at the hosting service")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The service refused the request.
    #[error("hosting service rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP-like status.
        status: u16,
        /// Service message.
        message: String,
    },

    /// The service could not be reached.
    #[error("hosting service unavailable: {0}")]
    Unavailable(String),

    /// No client is configured.
    #[error("no hosting service configured")]
    NotConfigured,
}

impl HostingError {
    /// Create a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Check if this is a "not found" error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether retrying later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Error code for task results.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::E0201,
            _ => ErrorCode::E0202,
        }
    }
}

/// Result type for hosting calls.
pub type Result<T> = std::result::Result<T, HostingError>;

/// A group (namespace) at the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedGroup {
    /// Service-side id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Path used in repository URLs.
    pub full_path: String,
}

/// A project at the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedProject {
    /// Service-side id.
    pub id: i64,
    /// Project name.
    pub name: String,
    /// `group / name`.
    pub name_with_namespace: String,
    /// Browser URL.
    pub web_url: String,
    /// SSH clone URL.
    pub ssh_url_to_repo: String,
    /// Owning group id.
    pub namespace_id: i64,
}

/// Desired state of a project owned by a pull mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSpec {
    /// Project name.
    pub name: String,
    /// Project description.
    pub description: String,
    /// Owning group id.
    pub namespace_id: i64,
    /// `private`, `internal` or `public`.
    pub visibility: String,
    /// Issues feature.
    pub issues_enabled: bool,
    /// Wall feature.
    pub wall_enabled: bool,
    /// Wiki feature.
    pub wiki_enabled: bool,
    /// Snippets feature.
    pub snippets_enabled: bool,
    /// Merge requests feature.
    pub merge_requests_enabled: bool,
    /// Adopt an existing project with the same name instead of failing.
    pub force_create: bool,
}

/// A deploy key to make available on a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployKeySpec {
    /// Key id the user already has at the service.
    pub existing_id: Option<i64>,
    /// Title for a newly created key.
    pub title: String,
    /// OpenSSH public key.
    pub public_key: String,
    /// Grant write access.
    pub can_push: bool,
}

/// Calls the save tasks make against the hosting service.
pub trait HostingClient: Send + Sync + fmt::Debug {
    /// Look up a group.
    fn get_group(&self, group_id: i64) -> Result<HostedGroup>;

    /// Look up a project.
    fn get_project(&self, project_id: i64) -> Result<HostedProject>;

    /// Update `existing` to match `spec` if it still exists, otherwise
    /// create the project.
    fn get_or_create_project(&self, existing: Option<i64>, spec: &ProjectSpec) -> Result<HostedProject>;

    /// Enable the key on the project, creating it when the user has none
    /// yet. Returns the key id.
    fn enable_deploy_key(&self, project_id: i64, key: &DeployKeySpec) -> Result<i64>;

    /// Register a push hook.
    fn create_hook(&self, project_id: i64, url: &str) -> Result<()>;
}

/// Client used when no hosting service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredHosting;

impl HostingClient for UnconfiguredHosting {
    fn get_group(&self, _group_id: i64) -> Result<HostedGroup> {
        Err(HostingError::NotConfigured)
    }

    fn get_project(&self, _project_id: i64) -> Result<HostedProject> {
        Err(HostingError::NotConfigured)
    }

    fn get_or_create_project(&self, _existing: Option<i64>, _spec: &ProjectSpec) -> Result<HostedProject> {
        Err(HostingError::NotConfigured)
    }

    fn enable_deploy_key(&self, _project_id: i64, _key: &DeployKeySpec) -> Result<i64> {
        Err(HostingError::NotConfigured)
    }

    fn create_hook(&self, _project_id: i64, _url: &str) -> Result<()> {
        Err(HostingError::NotConfigured)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    groups: HashMap<i64, HostedGroup>,
    projects: BTreeMap<i64, HostedProject>,
    keys: HashMap<i64, String>,
    enabled: HashMap<(i64, i64), bool>,
    hooks: Vec<(i64, String)>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Hosting service kept in memory.
#[derive(Debug)]
pub struct MemoryHosting {
    ssh_host: String,
    state: Mutex<MemoryState>,
}

impl MemoryHosting {
    /// A service whose projects clone from `git@{ssh_host}:...`.
    #[must_use]
    pub fn new(ssh_host: impl Into<String>) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            state: Mutex::new(MemoryState {
                next_id: 1000,
                ..MemoryState::default()
            }),
        }
    }

    /// Add a group.
    pub fn add_group(&self, id: i64, name: &str) -> HostedGroup {
        let group = HostedGroup {
            id,
            name: name.to_string(),
            full_path: name.to_lowercase(),
        };
        self.state.lock().groups.insert(id, group.clone());
        group
    }

    /// Add a project to an existing group.
    pub fn add_project(&self, namespace_id: i64, name: &str) -> Option<HostedProject> {
        let mut state = self.state.lock();
        let group = state.groups.get(&namespace_id)?.clone();
        let id = state.next_id();
        let project = self.render_project(id, &group, name);
        state.projects.insert(id, project.clone());
        Some(project)
    }

    /// A project by id.
    #[must_use]
    pub fn project(&self, id: i64) -> Option<HostedProject> {
        self.state.lock().projects.get(&id).cloned()
    }

    /// Whether the key is enabled on the project, and with write access.
    #[must_use]
    pub fn key_access(&self, project_id: i64, key_id: i64) -> Option<bool> {
        self.state.lock().enabled.get(&(project_id, key_id)).copied()
    }

    /// Registered hooks as `(project, url)`.
    #[must_use]
    pub fn hooks(&self) -> Vec<(i64, String)> {
        self.state.lock().hooks.clone()
    }

    fn render_project(&self, id: i64, group: &HostedGroup, name: &str) -> HostedProject {
        let path = name.to_lowercase().replace(' ', "-");
        HostedProject {
            id,
            name: name.to_string(),
            name_with_namespace: format!("{} / {name}", group.name),
            web_url: format!("https://{}/{}/{path}", self.ssh_host, group.full_path),
            ssh_url_to_repo: format!("git@{}:{}/{path}.git", self.ssh_host, group.full_path),
            namespace_id: group.id,
        }
    }
}

impl HostingClient for MemoryHosting {
    fn get_group(&self, group_id: i64) -> Result<HostedGroup> {
        self.state
            .lock()
            .groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| HostingError::not_found(format!("group {group_id}")))
    }

    fn get_project(&self, project_id: i64) -> Result<HostedProject> {
        self.project(project_id)
            .ok_or_else(|| HostingError::not_found(format!("project {project_id}")))
    }

    fn get_or_create_project(&self, existing: Option<i64>, spec: &ProjectSpec) -> Result<HostedProject> {
        let mut state = self.state.lock();
        let group = state
            .groups
            .get(&spec.namespace_id)
            .cloned()
            .ok_or_else(|| HostingError::not_found(format!("group {}", spec.namespace_id)))?;

        if let Some(id) = existing.filter(|id| state.projects.contains_key(id)) {
            let project = self.render_project(id, &group, &spec.name);
            state.projects.insert(id, project.clone());
            return Ok(project);
        }

        let taken = state
            .projects
            .values()
            .find(|p| p.namespace_id == spec.namespace_id && p.name == spec.name)
            .cloned();
        match taken {
            Some(project) if spec.force_create => Ok(project),
            Some(_) => Err(HostingError::Rejected {
                status: 400,
                message: format!("project name {} has already been taken", spec.name),
            }),
            None => {
                let id = state.next_id();
                let project = self.render_project(id, &group, &spec.name);
                state.projects.insert(id, project.clone());
                Ok(project)
            }
        }
    }

    fn enable_deploy_key(&self, project_id: i64, key: &DeployKeySpec) -> Result<i64> {
        let mut state = self.state.lock();
        if !state.projects.contains_key(&project_id) {
            return Err(HostingError::not_found(format!("project {project_id}")));
        }
        let id = match key.existing_id.filter(|id| state.keys.contains_key(id)) {
            Some(id) => id,
            None => {
                let id = state.next_id();
                state.keys.insert(id, key.public_key.clone());
                id
            }
        };
        let access = state.enabled.entry((project_id, id)).or_insert(false);
        *access |= key.can_push;
        Ok(id)
    }

    fn create_hook(&self, project_id: i64, url: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.projects.contains_key(&project_id) {
            return Err(HostingError::not_found(format!("project {project_id}")));
        }
        state.hooks.push((project_id, url.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(name: &str, force_create: bool) -> ProjectSpec {
        ProjectSpec {
            name: name.to_string(),
            description: format!("Mirror of {name}."),
            namespace_id: 7,
            visibility: "private".into(),
            issues_enabled: false,
            wall_enabled: false,
            wiki_enabled: false,
            snippets_enabled: false,
            merge_requests_enabled: false,
            force_create,
        }
    }

    #[test]
    fn create_then_update_in_place() {
        let hosting = MemoryHosting::new("gitlab.example.com");
        hosting.add_group(7, "Mirrors");
        let created = hosting.get_or_create_project(None, &spec("log", false)).unwrap();
        assert_eq!(created.ssh_url_to_repo, "git@gitlab.example.com:mirrors/log.git");

        let renamed = hosting
            .get_or_create_project(Some(created.id), &spec("log-rs", false))
            .unwrap();
        assert_eq!(renamed.id, created.id);
        assert_eq!(renamed.name_with_namespace, "Mirrors / log-rs");
    }

    #[test]
    fn taken_name_needs_force_create() {
        let hosting = MemoryHosting::new("gitlab.example.com");
        hosting.add_group(7, "Mirrors");
        let existing = hosting.add_project(7, "log").unwrap();

        let err = hosting.get_or_create_project(None, &spec("log", false)).unwrap_err();
        assert!(matches!(err, HostingError::Rejected { status: 400, .. }));

        let adopted = hosting.get_or_create_project(None, &spec("log", true)).unwrap();
        assert_eq!(adopted.id, existing.id);
    }

    #[test]
    fn missing_group_is_remote_not_found() {
        let hosting = MemoryHosting::new("gitlab.example.com");
        let err = hosting.get_group(3).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.code(), ErrorCode::E0201);
        assert_eq!(UnconfiguredHosting.get_group(3).unwrap_err().code(), ErrorCode::E0202);
    }

    #[test]
    fn deploy_key_reused_and_upgraded() {
        let hosting = MemoryHosting::new("gitlab.example.com");
        hosting.add_group(7, "Mirrors");
        let project = hosting.add_project(7, "log").unwrap();
        let mut key = DeployKeySpec {
            existing_id: None,
            title: "deploy key for ann".into(),
            public_key: "ssh-rsa AAAA ann".into(),
            can_push: false,
        };
        let id = hosting.enable_deploy_key(project.id, &key).unwrap();
        assert_eq!(hosting.key_access(project.id, id), Some(false));

        key.existing_id = Some(id);
        key.can_push = true;
        assert_eq!(hosting.enable_deploy_key(project.id, &key).unwrap(), id);
        assert_eq!(hosting.key_access(project.id, id), Some(true));
    }
}
