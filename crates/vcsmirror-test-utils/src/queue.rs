//! An in-memory [`TaskQueue`] that keeps what was enqueued.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;
use vcsmirror_core::{ChainHandle, Error, ErrorCode, Result, TaskHandle, TaskQueue, TaskSignature};

/// One enqueue call as seen by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// A single task.
    Task(TaskSignature, TaskHandle),
    /// A chain, links in order.
    Chain(Vec<(TaskSignature, TaskHandle)>),
}

/// Records enqueued signatures; nothing is ever executed.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    entries: Mutex<Vec<Enqueued>>,
    unavailable: AtomicBool,
}

impl RecordingQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything enqueued so far, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<Enqueued> {
        self.entries.lock().clone()
    }

    /// Flattened signatures, chains expanded in link order.
    #[must_use]
    pub fn signatures(&self) -> Vec<TaskSignature> {
        self.entries
            .lock()
            .iter()
            .flat_map(|entry| match entry {
                Enqueued::Task(sig, _) => vec![sig.clone()],
                Enqueued::Chain(links) => links.iter().map(|(sig, _)| sig.clone()).collect(),
            })
            .collect()
    }

    /// Names of the flattened signatures.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.signatures().into_iter().map(|s| s.name).collect()
    }

    /// Drop everything recorded.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Refuse every enqueue with a transient error while `unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorCode::E0301, "queue unavailable"));
        }
        Ok(())
    }
}

fn handle_for(signature: &TaskSignature) -> TaskHandle {
    TaskHandle {
        id: signature.task_id().unwrap_or_else(Uuid::new_v4),
        name: signature.name.clone(),
    }
}

impl TaskQueue for RecordingQueue {
    fn enqueue(&self, signature: TaskSignature) -> Result<TaskHandle> {
        self.check_available()?;
        let handle = handle_for(&signature);
        self.entries
            .lock()
            .push(Enqueued::Task(signature, handle.clone()));
        Ok(handle)
    }

    fn enqueue_chain(&self, chain: Vec<TaskSignature>) -> Result<ChainHandle> {
        self.check_available()?;
        let links: Vec<(TaskSignature, TaskHandle)> = chain
            .into_iter()
            .map(|sig| {
                let handle = handle_for(&sig);
                (sig, handle)
            })
            .collect();
        let handles = links.iter().map(|(_, h)| h.clone()).collect();
        self.entries.lock().push(Enqueued::Chain(links));
        Ok(ChainHandle::new(handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_are_flattened_in_order() {
        let queue = RecordingQueue::new();
        queue.enqueue(TaskSignature::new("sync_pull_mirror").arg(1)).unwrap();
        let chain = queue
            .enqueue_chain(vec![
                TaskSignature::new("create_ssh_config"),
                TaskSignature::new("save_pull_mirror"),
            ])
            .unwrap();

        assert_eq!(chain.links().len(), 2);
        assert_eq!(
            queue.names(),
            vec!["sync_pull_mirror", "create_ssh_config", "save_pull_mirror"]
        );
    }
}
