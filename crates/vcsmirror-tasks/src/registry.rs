//! Task registry: name to handler.

use crate::context::TaskContext;
use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use vcsmirror_core::TaskSignature;

/// A task body.
pub type Handler = Arc<dyn Fn(&TaskContext, &TaskSignature) -> Result<Value> + Send + Sync>;

/// What makes two invocations the "same" task for single-instance locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockScope {
    /// Task name plus serialized arguments.
    #[default]
    NameAndArgs,
    /// Task name alone.
    NameOnly,
}

/// A registered task.
#[derive(Clone)]
pub struct TaskDefinition {
    /// Registered name.
    pub name: String,
    /// Locking scope.
    pub lock: LockScope,
    handler: Handler,
}

impl TaskDefinition {
    /// Run the task body.
    ///
    /// # Errors
    /// Returns whatever the handler returns.
    pub fn call(&self, ctx: &TaskContext, signature: &TaskSignature) -> Result<Value> {
        (self.handler)(ctx, signature)
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

/// Registered tasks, built once at worker start.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskDefinition>,
}

impl TaskRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as `name`, replacing an earlier registration.
    pub fn register<F>(&mut self, name: impl Into<String>, lock: LockScope, handler: F) -> &mut Self
    where
        F: Fn(&TaskContext, &TaskSignature) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.tasks.insert(
            name.clone(),
            TaskDefinition {
                name,
                lock,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Look up a task.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_registration_wins() {
        let mut registry = TaskRegistry::new();
        registry
            .register("ping", LockScope::NameAndArgs, |_, _| Ok(json!("first")))
            .register("ping", LockScope::NameOnly, |_, _| Ok(json!("second")));

        assert_eq!(registry.len(), 1);
        let def = registry.get("ping").unwrap();
        assert_eq!(def.lock, LockScope::NameOnly);
        assert!(registry.get("pong").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["ping"]);
    }
}
