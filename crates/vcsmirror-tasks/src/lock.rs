//! Single-instance locking.
//!
//! A task runs under a lock keyed on its name (and usually its arguments).
//! The lock row lives in the store, so it holds across worker processes; it
//! carries a TTL so a crashed worker cannot keep it forever.

use crate::error::{Result, TaskError};
use crate::registry::LockScope;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;
use vcsmirror_core::TaskSignature;
use vcsmirror_store::{LockRepo, Store};

/// Lock key for an invocation: BLAKE3 of the name, plus the argument JSON
/// unless the scope is [`LockScope::NameOnly`].
///
/// # Errors
/// Returns error if the arguments cannot be serialized.
pub fn lock_key(signature: &TaskSignature, scope: LockScope) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(signature.name.as_bytes());
    if scope == LockScope::NameAndArgs {
        hasher.update(b"\0");
        hasher.update(signature.args_json()?.as_bytes());
    }
    Ok(format!("lock:{}", hasher.finalize().to_hex()))
}

/// Holder id for one claim of `task_id`.
///
/// A requeued task is claimed again under the same task id, so the holder
/// carries a fresh suffix per claim. A stale claim's guard then cannot
/// release the lock of the claim that replaced it.
#[must_use]
pub fn claim_holder(task_id: Uuid) -> String {
    format!("{task_id}/{}", Uuid::new_v4().simple())
}

/// Held lock, released on drop.
#[derive(Debug)]
pub struct SingleInstanceGuard<'s> {
    store: &'s Store,
    key: String,
    holder: String,
    released: bool,
}

impl<'s> SingleInstanceGuard<'s> {
    /// Take the lock for `signature` on behalf of `holder`.
    ///
    /// # Errors
    /// Returns [`TaskError::AlreadyRunning`] if an unexpired holder exists,
    /// or a store error.
    pub fn acquire(
        store: &'s Store,
        signature: &TaskSignature,
        scope: LockScope,
        holder: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Result<Self> {
        let key = lock_key(signature, scope)?;
        let holder = holder.into();
        let acquired = store.write(|tx| {
            LockRepo::new(tx).try_acquire(&key, &signature.name, &holder, Utc::now(), ttl)
        })?;
        if !acquired {
            debug!(task = %signature.name, key = %key, "lock held elsewhere");
            return Err(TaskError::AlreadyRunning {
                name: signature.name.clone(),
                key,
            });
        }
        debug!(task = %signature.name, key = %key, holder = %holder, "lock acquired");
        Ok(Self {
            store,
            key,
            holder,
            released: false,
        })
    }

    /// The lock key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Who holds it.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Release now instead of on drop.
    ///
    /// # Errors
    /// Returns error if the lock row cannot be deleted.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.delete()
    }

    fn delete(&self) -> Result<()> {
        let removed = self
            .store
            .write(|tx| LockRepo::new(tx).release(&self.key, &self.holder))?;
        if !removed {
            warn!(key = %self.key, "lock expired before release");
        }
        Ok(())
    }
}

impl Drop for SingleInstanceGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.delete() {
            warn!(key = %self.key, error = %e, "failed to release lock; it expires on its own");
        }
    }
}
