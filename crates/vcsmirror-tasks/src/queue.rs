//! [`TaskQueue`] backed by the task-meta table.
//!
//! Every enqueue is one pending row. A chain is stored as its first link
//! with the remaining signatures attached; the worker inserts the next link
//! only after the current one succeeded.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use vcsmirror_core::{ChainHandle, Error, ErrorCode, TaskHandle, TaskQueue, TaskSignature};
use vcsmirror_store::{NewTaskRecord, Store, StoreError, TaskMetaRepo};

/// Queue used when a signature names none.
pub const DEFAULT_QUEUE: &str = "mirrors";

/// Persistent queue over the store.
#[derive(Debug, Clone)]
pub struct SqliteTaskQueue {
    store: Arc<Store>,
    default_queue: String,
}

impl SqliteTaskQueue {
    /// Create a queue routing unnamed tasks to [`DEFAULT_QUEUE`].
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            default_queue: DEFAULT_QUEUE.to_string(),
        }
    }

    /// Route unnamed tasks to `queue`.
    #[must_use]
    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    /// Queue unnamed tasks go to.
    #[must_use]
    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }
}

/// Give every link a task id so handles are known before anything runs.
pub(crate) fn assign_ids(chain: Vec<TaskSignature>) -> Vec<TaskSignature> {
    chain
        .into_iter()
        .map(|sig| match sig.task_id() {
            Some(_) => sig,
            None => sig.with_task_id(Uuid::new_v4()),
        })
        .collect()
}

/// Insert `signature` as a pending row with `rest` as its chain tail.
pub(crate) fn insert_link(
    repo: &TaskMetaRepo<'_>,
    signature: &TaskSignature,
    default_queue: &str,
    parent_id: Option<Uuid>,
    rest: &[TaskSignature],
) -> vcsmirror_store::Result<TaskHandle> {
    let id = signature.task_id().unwrap_or_else(Uuid::new_v4);
    let queue = signature.options.queue.as_deref().unwrap_or(default_queue);
    repo.insert_pending(&NewTaskRecord {
        task_id: id,
        signature,
        queue,
        parent_id,
        chain_next: rest,
        eta: None,
    })?;
    debug!(task = %signature, task_id = %id, queue, "task enqueued");
    Ok(TaskHandle {
        id,
        name: signature.name.clone(),
    })
}

fn queue_error(err: &StoreError) -> Error {
    Error::new(err.code(), err.to_string())
}

impl TaskQueue for SqliteTaskQueue {
    fn enqueue(&self, signature: TaskSignature) -> vcsmirror_core::Result<TaskHandle> {
        self.store
            .write(|tx| insert_link(&TaskMetaRepo::new(tx), &signature, &self.default_queue, None, &[]))
            .map_err(|e| queue_error(&e))
    }

    fn enqueue_chain(&self, chain: Vec<TaskSignature>) -> vcsmirror_core::Result<ChainHandle> {
        let chain = assign_ids(chain);
        let Some((first, rest)) = chain.split_first() else {
            return Err(Error::new(ErrorCode::E0504, "cannot enqueue an empty chain"));
        };
        self.store
            .write(|tx| insert_link(&TaskMetaRepo::new(tx), first, &self.default_queue, None, rest))
            .map_err(|e| queue_error(&e))?;

        let links = chain
            .iter()
            .filter_map(|sig| {
                sig.task_id().map(|id| TaskHandle {
                    id,
                    name: sig.name.clone(),
                })
            })
            .collect();
        Ok(ChainHandle::new(links))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use vcsmirror_core::{TaskOptions, TaskStatus};

    fn queue() -> SqliteTaskQueue {
        SqliteTaskQueue::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn enqueue_persists_pending_row_in_default_queue() {
        let queue = queue();
        let handle = queue.enqueue(TaskSignature::new("sync_pull_mirror").arg(3)).unwrap();

        let record = queue
            .store
            .read(|c| TaskMetaRepo::new(c).get(handle.id))
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.queue, DEFAULT_QUEUE);
        assert_eq!(record.signature.int_arg(0), Some(3));
    }

    #[test]
    fn caller_id_and_queue_are_respected() {
        let queue = queue();
        let id = Uuid::new_v4();
        let sig = TaskSignature::new("backend_cleanup")
            .with_options(TaskOptions {
                queue: Some("maintenance".into()),
                ..TaskOptions::default()
            })
            .with_task_id(id);

        assert_eq!(queue.enqueue(sig).unwrap().id, id);
        let claimed = queue
            .store
            .write(|tx| TaskMetaRepo::new(tx).claim_next("maintenance", Utc::now()))
            .unwrap();
        assert_eq!(claimed.map(|r| r.task_id), Some(id));
    }

    #[test]
    fn chain_stores_only_first_link() {
        let queue = queue();
        let handle = queue
            .enqueue_chain(vec![
                TaskSignature::new("create_rsa_pair").arg(1),
                TaskSignature::new("save_pull_mirror").arg(5),
            ])
            .unwrap();

        assert_eq!(handle.links().len(), 2);
        let first = handle.first().unwrap().id;
        let last = handle.last().unwrap().id;

        let record = queue
            .store
            .read(|c| TaskMetaRepo::new(c).get(first))
            .unwrap()
            .unwrap();
        assert_eq!(record.chain_next.len(), 1);
        assert_eq!(record.chain_next[0].task_id(), Some(last));
        assert!(queue.store.read(|c| TaskMetaRepo::new(c).get(last)).unwrap().is_none());
    }

    #[test]
    fn empty_chain_is_rejected() {
        let err = queue().enqueue_chain(Vec::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::E0504);
    }
}
