//! Single-instance lock rows.
//!
//! A row in `task_locks` means some worker runs the task identified by
//! `key`. Rows carry an expiry so a crashed worker cannot hold a lock
//! forever.

use crate::db::to_sql_ts;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// Lock rows.
#[derive(Debug, Clone, Copy)]
pub struct LockRepo<'c> {
    conn: &'c Connection,
}

impl<'c> LockRepo<'c> {
    /// View over a connection or transaction.
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Take the lock for `key` unless an unexpired holder exists.
    ///
    /// Run inside [`Store::write`](crate::Store::write); the expired-row
    /// cleanup and the insert must be one transaction.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn try_acquire(
        &self,
        key: &str,
        task_name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let now_ts = to_sql_ts(now);
        let expired = self.conn.execute(
            "DELETE FROM task_locks WHERE key = ?1 AND expires_at <= ?2",
            params![key, now_ts],
        )?;
        if expired > 0 {
            debug!(key, task_name, "replaced expired lock");
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO task_locks (key, task_name, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, task_name, holder, now_ts, to_sql_ts(now + ttl)],
        )?;
        Ok(inserted > 0)
    }

    /// Release `key` if `holder` owns it.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn release(&self, key: &str, holder: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM task_locks WHERE key = ?1 AND holder = ?2",
            params![key, holder],
        )?;
        Ok(changed > 0)
    }

    /// Push the expiry of `holder`'s lock on `key` to `now + ttl`.
    ///
    /// Returns `false` if `holder` no longer owns an unexpired row.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn refresh(&self, key: &str, holder: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE task_locks SET expires_at = ?4
             WHERE key = ?1 AND holder = ?2 AND expires_at > ?3",
            params![key, holder, to_sql_ts(now), to_sql_ts(now + ttl)],
        )?;
        Ok(changed > 0)
    }

    /// Current holder of `key`, ignoring expired rows.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn holder(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT holder FROM task_locks WHERE key = ?1 AND expires_at > ?2",
                params![key, to_sql_ts(now)],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Whether `key` is held at `now`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn is_held(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.holder(key, now)?.is_some())
    }

    /// Drop every expired row.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM task_locks WHERE expires_at <= ?1",
            params![to_sql_ts(now)],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    const KEY: &str = "sync_pull_mirror:abc";

    #[test]
    fn second_acquire_fails_until_release() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let ttl = Duration::minutes(30);
        store
            .write(|tx| {
                let locks = LockRepo::new(tx);
                assert!(locks.try_acquire(KEY, "sync_pull_mirror", "w1", now, ttl)?);
                assert!(!locks.try_acquire(KEY, "sync_pull_mirror", "w2", now, ttl)?);
                assert_eq!(locks.holder(KEY, now)?.as_deref(), Some("w1"));
                assert!(!locks.release(KEY, "w2")?);
                assert!(locks.release(KEY, "w1")?);
                assert!(locks.try_acquire(KEY, "sync_pull_mirror", "w2", now, ttl)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn refresh_extends_only_the_owners_row() {
        let store = Store::open_in_memory().unwrap();
        let start = Utc::now();
        let ttl = Duration::seconds(10);
        store
            .write(|tx| {
                let locks = LockRepo::new(tx);
                assert!(locks.try_acquire(KEY, "t", "w1", start, ttl)?);
                assert!(!locks.refresh(KEY, "w2", start, ttl)?);

                let later = start + Duration::seconds(8);
                assert!(locks.refresh(KEY, "w1", later, ttl)?);
                assert!(locks.is_held(KEY, start + Duration::seconds(15))?);

                let gone = later + Duration::seconds(11);
                assert!(!locks.refresh(KEY, "w1", gone, ttl)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn expired_lock_is_taken_over() {
        let store = Store::open_in_memory().unwrap();
        let start = Utc::now();
        let ttl = Duration::seconds(10);
        store
            .write(|tx| {
                let locks = LockRepo::new(tx);
                assert!(locks.try_acquire(KEY, "t", "w1", start, ttl)?);
                let later = start + Duration::seconds(11);
                assert!(!locks.is_held(KEY, later)?);
                assert!(locks.try_acquire(KEY, "t", "w2", later, ttl)?);
                assert_eq!(locks.holder(KEY, later)?.as_deref(), Some("w2"));
                assert_eq!(locks.purge_expired(later + Duration::minutes(1))?, 1);
                Ok(())
            })
            .unwrap();
    }
}
