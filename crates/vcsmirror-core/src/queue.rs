//! Task queue contract.
//!
//! The scheduler and the public service API only ever talk to a
//! [`TaskQueue`]; the worker side lives in `vcsmirror-tasks`.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Header carrying a task id chosen by the caller.
pub const TASK_ID_HEADER: &str = "task_id";

/// Routing and delivery options for one task invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Queue name; the queue's default applies when unset.
    pub queue: Option<String>,
    /// Exchange name.
    pub exchange: Option<String>,
    /// Routing key.
    pub routing_key: Option<String>,
    /// Priority, higher runs first.
    pub priority: Option<i32>,
    /// Extra message headers.
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// The task is discarded if it has not started by this time.
    pub expires: Option<DateTime<Utc>>,
    /// Name of the periodic task that produced this invocation.
    pub periodic_task_name: Option<String>,
}

/// A named task plus its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSignature {
    /// Registered task name.
    pub name: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Delivery options.
    #[serde(default)]
    pub options: TaskOptions,
}

impl TaskSignature {
    /// Create a signature with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            options: TaskOptions::default(),
        }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Replace positional arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Replace keyword arguments.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Replace delivery options.
    #[must_use]
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// Ask the queue to use `id` as the result-record id.
    #[must_use]
    pub fn with_task_id(mut self, id: Uuid) -> Self {
        self.options
            .headers
            .insert(TASK_ID_HEADER.to_string(), Value::String(id.to_string()));
        self
    }

    /// Result-record id chosen by the caller, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<Uuid> {
        self.options
            .headers
            .get(TASK_ID_HEADER)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    /// Positional argument `index` as an integer id.
    #[must_use]
    pub fn int_arg(&self, index: usize) -> Option<i64> {
        self.args.get(index).and_then(Value::as_i64)
    }

    /// Positional argument `index` as a string.
    #[must_use]
    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// Canonical JSON of the arguments, used for lock keys and storage.
    ///
    /// # Errors
    /// Returns error if an argument cannot be serialized.
    pub fn args_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.args)?)
    }
}

impl fmt::Display for TaskSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// Handle returned for an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Result-record id.
    pub id: Uuid,
    /// Task name.
    pub name: String,
}

/// Handles for every link of an enqueued chain, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHandle {
    links: Vec<TaskHandle>,
}

impl ChainHandle {
    /// Wrap the handles of a chain.
    #[must_use]
    pub fn new(links: Vec<TaskHandle>) -> Self {
        Self { links }
    }

    /// The link that runs first.
    #[must_use]
    pub fn first(&self) -> Option<&TaskHandle> {
        self.links.first()
    }

    /// The link that runs last.
    #[must_use]
    pub fn last(&self) -> Option<&TaskHandle> {
        self.links.last()
    }

    /// All links.
    #[must_use]
    pub fn links(&self) -> &[TaskHandle] {
        &self.links
    }
}

/// A work queue with at-least-once delivery.
pub trait TaskQueue: Send + Sync {
    /// Enqueue one task and return immediately.
    fn enqueue(&self, signature: TaskSignature) -> Result<TaskHandle>;

    /// Enqueue tasks that must run strictly one after another.
    ///
    /// A link only starts after the previous one succeeded; a failure
    /// aborts the remaining links.
    fn enqueue_chain(&self, chain: Vec<TaskSignature>) -> Result<ChainHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn signature_builder_and_accessors() {
        let sig = TaskSignature::new("create_ssh_config")
            .arg(7)
            .arg("github.com_7")
            .arg("git@github.com:a/b.git");

        assert_eq!(sig.int_arg(0), Some(7));
        assert_eq!(sig.str_arg(1), Some("github.com_7"));
        assert_eq!(sig.int_arg(1), None);
        assert_eq!(sig.str_arg(5), None);
        assert_eq!(
            sig.args_json().unwrap(),
            r#"[7,"github.com_7","git@github.com:a/b.git"]"#
        );
    }

    #[test]
    fn signature_display() {
        let sig = TaskSignature::new("sync_pull_mirror").with_args(vec![json!(3)]);
        assert_eq!(sig.to_string(), "sync_pull_mirror(3)");
    }

    #[test]
    fn caller_chosen_task_id() {
        let id = Uuid::new_v4();
        let sig = TaskSignature::new("save_pull_mirror").arg(1).with_task_id(id);
        assert_eq!(sig.task_id(), Some(id));
        assert_eq!(TaskSignature::new("save_pull_mirror").task_id(), None);
    }

    #[test]
    fn signature_deserializes_with_defaults() {
        let sig: TaskSignature = serde_json::from_str(r#"{"name":"backend_cleanup"}"#).unwrap();
        assert_eq!(sig, TaskSignature::new("backend_cleanup"));
    }

    #[test]
    fn chain_handle_order() {
        let a = TaskHandle {
            id: Uuid::new_v4(),
            name: "create_rsa_pair".into(),
        };
        let b = TaskHandle {
            id: Uuid::new_v4(),
            name: "create_ssh_config".into(),
        };
        let chain = ChainHandle::new(vec![a.clone(), b.clone()]);
        assert_eq!(chain.first(), Some(&a));
        assert_eq!(chain.last(), Some(&b));
        assert_eq!(chain.links().len(), 2);
    }
}
