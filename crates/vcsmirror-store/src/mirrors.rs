//! Pull and push mirror rows.
//!
//! Every accessor skips soft-deleted rows except the `*_for_deletion` ones,
//! which only the delete task uses.

use crate::db::{opt_sql_ts, opt_ts_col, to_sql_ts};
use crate::error::{Result, StoreError};
use crate::models::{Mirror, NewMirror, PullMirror, PullSettings};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use vcsmirror_core::{MirrorId, MirrorKind, UserId};

const MIRROR_COLUMNS: &str = "id, user_id, project_id, periodic_task_id, source, target, \
     foreign_vcs_type, last_sync, note, hook_token, is_force_update, is_prune_mirrors, is_deleted";

const PULL_SETTINGS_COLUMNS: &str = "group_id, project_name, project_mirror, is_no_create, \
     is_force_create, is_no_remote, is_issues_enabled, is_wall_enabled, is_wiki_enabled, \
     is_snippets_enabled, is_merge_requests_enabled, visibility";

const fn table(kind: MirrorKind) -> &'static str {
    match kind {
        MirrorKind::Pull => "pull_mirrors",
        MirrorKind::Push => "push_mirrors",
    }
}

const fn entity(kind: MirrorKind) -> &'static str {
    match kind {
        MirrorKind::Pull => "pull mirror",
        MirrorKind::Push => "push mirror",
    }
}

fn mirror_from_row(kind: MirrorKind, row: &Row<'_>) -> rusqlite::Result<Mirror> {
    Ok(Mirror {
        kind,
        id: row.get(0)?,
        user_id: row.get(1)?,
        project_id: row.get(2)?,
        periodic_task_id: row.get(3)?,
        source: row.get(4)?,
        target: row.get(5)?,
        foreign_vcs_type: row.get(6)?,
        last_sync: opt_ts_col(row, 7)?,
        note: row.get(8)?,
        hook_token: row.get(9)?,
        is_force_update: row.get(10)?,
        is_prune_mirrors: row.get(11)?,
        is_deleted: row.get(12)?,
    })
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<PullSettings> {
    Ok(PullSettings {
        group_id: row.get(0)?,
        project_name: row.get(1)?,
        project_mirror: row.get(2)?,
        is_no_create: row.get(3)?,
        is_force_create: row.get(4)?,
        is_no_remote: row.get(5)?,
        is_issues_enabled: row.get(6)?,
        is_wall_enabled: row.get(7)?,
        is_wiki_enabled: row.get(8)?,
        is_snippets_enabled: row.get(9)?,
        is_merge_requests_enabled: row.get(10)?,
        visibility: row.get(11)?,
    })
}

/// Mirror rows of both kinds.
#[derive(Debug, Clone, Copy)]
pub struct MirrorRepo<'c> {
    conn: &'c Connection,
}

impl<'c> MirrorRepo<'c> {
    /// View over a connection or transaction.
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert a pull mirror.
    ///
    /// # Errors
    /// Returns error if the owner does not exist.
    pub fn insert_pull(&self, new: &NewMirror, settings: &PullSettings) -> Result<PullMirror> {
        let mirror = self.insert(MirrorKind::Pull, new)?;
        self.conn.execute(
            "UPDATE pull_mirrors SET
                group_id = ?2, project_name = ?3, project_mirror = ?4, is_no_create = ?5,
                is_force_create = ?6, is_no_remote = ?7, is_issues_enabled = ?8,
                is_wall_enabled = ?9, is_wiki_enabled = ?10, is_snippets_enabled = ?11,
                is_merge_requests_enabled = ?12, visibility = ?13
             WHERE id = ?1",
            params![
                mirror.id,
                settings.group_id,
                settings.project_name,
                settings.project_mirror,
                settings.is_no_create,
                settings.is_force_create,
                settings.is_no_remote,
                settings.is_issues_enabled,
                settings.is_wall_enabled,
                settings.is_wiki_enabled,
                settings.is_snippets_enabled,
                settings.is_merge_requests_enabled,
                if settings.visibility.is_empty() { "private" } else { settings.visibility.as_str() },
            ],
        )?;
        self.get_pull(mirror.id)?
            .ok_or_else(|| StoreError::not_found(entity(MirrorKind::Pull), mirror.id))
    }

    /// Insert a push mirror.
    ///
    /// # Errors
    /// Returns error if the owner does not exist.
    pub fn insert_push(&self, new: &NewMirror) -> Result<Mirror> {
        self.insert(MirrorKind::Push, new)
    }

    fn insert(&self, kind: MirrorKind, new: &NewMirror) -> Result<Mirror> {
        let now = to_sql_ts(Utc::now());
        self.conn.execute(
            &format!(
                "INSERT INTO {} (user_id, project_id, source, target, foreign_vcs_type, note,
                    hook_token, is_force_update, is_prune_mirrors, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                table(kind)
            ),
            params![
                new.user_id,
                new.project_id,
                new.source,
                new.target,
                new.foreign_vcs_type,
                new.note,
                new.hook_token,
                new.is_force_update,
                new.is_prune_mirrors,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.require(kind, id)
    }

    fn select_one(&self, kind: MirrorKind, id: MirrorId, deleted: bool) -> Result<Option<Mirror>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {MIRROR_COLUMNS} FROM {} WHERE id = ?1 AND is_deleted = ?2",
                    table(kind)
                ),
                params![id, deleted],
                |row| mirror_from_row(kind, row),
            )
            .optional()?)
    }

    /// Fetch a live mirror.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn get(&self, kind: MirrorKind, id: MirrorId) -> Result<Option<Mirror>> {
        self.select_one(kind, id, false)
    }

    /// Fetch a live mirror that must exist.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if there is no such live mirror.
    pub fn require(&self, kind: MirrorKind, id: MirrorId) -> Result<Mirror> {
        self.get(kind, id)?
            .ok_or_else(|| StoreError::not_found(entity(kind), id))
    }

    /// Fetch a soft-deleted mirror; live mirrors are not returned.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn get_for_deletion(&self, kind: MirrorKind, id: MirrorId) -> Result<Option<Mirror>> {
        self.select_one(kind, id, true)
    }

    /// Fetch a live pull mirror with its settings.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn get_pull(&self, id: MirrorId) -> Result<Option<PullMirror>> {
        let Some(mirror) = self.get(MirrorKind::Pull, id)? else {
            return Ok(None);
        };
        let settings = self.conn.query_row(
            &format!("SELECT {PULL_SETTINGS_COLUMNS} FROM pull_mirrors WHERE id = ?1"),
            params![id],
            settings_from_row,
        )?;
        Ok(Some(PullMirror { mirror, settings }))
    }

    /// Live mirror owning `hook_token`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn find_by_hook_token(&self, kind: MirrorKind, hook_token: &str) -> Result<Option<Mirror>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {MIRROR_COLUMNS} FROM {} WHERE hook_token = ?1 AND is_deleted = 0
                     ORDER BY id LIMIT 1",
                    table(kind)
                ),
                params![hook_token],
                |row| mirror_from_row(kind, row),
            )
            .optional()?)
    }

    /// Live mirrors, optionally of one owner, by id.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn list(&self, kind: MirrorKind, user_id: Option<UserId>) -> Result<Vec<Mirror>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MIRROR_COLUMNS} FROM {} WHERE is_deleted = 0 AND (?1 IS NULL OR user_id = ?1)
             ORDER BY id",
            table(kind)
        ))?;
        let rows = stmt
            .query_map(params![user_id], |row| mirror_from_row(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Soft-deleted mirrors waiting for cleanup.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn list_deleted(&self, kind: MirrorKind) -> Result<Vec<Mirror>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MIRROR_COLUMNS} FROM {} WHERE is_deleted = 1 ORDER BY id",
            table(kind)
        ))?;
        let rows = stmt
            .query_map([], |row| mirror_from_row(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Flag a live mirror as deleted. Returns `false` if it was not live.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn mark_deleted(&self, kind: MirrorKind, id: MirrorId) -> Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET is_deleted = 1, updated = ?2 WHERE id = ?1 AND is_deleted = 0",
                table(kind)
            ),
            params![id, to_sql_ts(Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Remove a soft-deleted row for good.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn delete(&self, kind: MirrorKind, id: MirrorId) -> Result<bool> {
        let changed = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1 AND is_deleted = 1", table(kind)),
            params![id],
        )?;
        Ok(changed > 0)
    }

    fn update_live(&self, kind: MirrorKind, id: MirrorId, set: &str, value: &dyn rusqlite::ToSql) -> Result<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET {set} = ?2, updated = ?3 WHERE id = ?1 AND is_deleted = 0",
                table(kind)
            ),
            params![id, value, to_sql_ts(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(entity(kind), id));
        }
        Ok(())
    }

    /// Record a successful sync.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the mirror is gone.
    pub fn set_last_sync(&self, kind: MirrorKind, id: MirrorId, at: DateTime<Utc>) -> Result<()> {
        self.update_live(kind, id, "last_sync", &opt_sql_ts(Some(at)))
    }

    /// Replace the source location.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the mirror is gone.
    pub fn set_source(&self, kind: MirrorKind, id: MirrorId, source: Option<&str>) -> Result<()> {
        self.update_live(kind, id, "source", &source)
    }

    /// Replace the target location.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the mirror is gone.
    pub fn set_target(&self, kind: MirrorKind, id: MirrorId, target: Option<&str>) -> Result<()> {
        self.update_live(kind, id, "target", &target)
    }

    /// Link the hosting-service project.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the mirror is gone.
    pub fn set_project(&self, kind: MirrorKind, id: MirrorId, project_id: Option<i64>) -> Result<()> {
        self.update_live(kind, id, "project_id", &project_id)
    }

    /// Record the detected foreign VCS kind.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the mirror is gone.
    pub fn set_foreign_vcs_type(&self, kind: MirrorKind, id: MirrorId, vcs: &str) -> Result<()> {
        self.update_live(kind, id, "foreign_vcs_type", &vcs)
    }

    /// Point the mirror at its periodic task (or clear it).
    ///
    /// Also works on soft-deleted rows so that deletion can clear it.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the row does not exist.
    pub fn set_periodic_task(
        &self,
        kind: MirrorKind,
        id: MirrorId,
        periodic_task_id: Option<i64>,
    ) -> Result<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET periodic_task_id = ?2, updated = ?3 WHERE id = ?1",
                table(kind)
            ),
            params![id, periodic_task_id, to_sql_ts(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(entity(kind), id));
        }
        Ok(())
    }

    /// Periodic task id of a mirror, live or soft-deleted.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the row does not exist.
    pub fn periodic_task_of(&self, kind: MirrorKind, id: MirrorId) -> Result<Option<i64>> {
        self.conn
            .query_row(
                &format!("SELECT periodic_task_id FROM {} WHERE id = ?1", table(kind)),
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(entity(kind), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use crate::users::UserRepo;
    use pretty_assertions::assert_eq;

    fn new_mirror(user_id: UserId) -> NewMirror {
        NewMirror {
            user_id,
            source: Some("https://github.com/acme/widget.git".into()),
            hook_token: "token-1".into(),
            is_prune_mirrors: true,
            ..NewMirror::default()
        }
    }

    #[test]
    fn pull_mirror_with_settings() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let user = UserRepo::new(tx).insert("alice", None)?;
                let settings = PullSettings {
                    project_name: "widget".into(),
                    is_no_remote: true,
                    ..PullSettings::default()
                };
                let pull = MirrorRepo::new(tx).insert_pull(&new_mirror(user.id), &settings)?;
                assert_eq!(pull.mirror.kind, MirrorKind::Pull);
                assert!(pull.mirror.is_prune_mirrors);
                assert!(pull.settings.is_no_remote);
                assert_eq!(pull.settings.visibility, "private");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deleted_rows_are_only_visible_to_deletion() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let user = UserRepo::new(tx).insert("bob", None)?;
                let repo = MirrorRepo::new(tx);
                let mirror = repo.insert_push(&new_mirror(user.id))?;

                assert!(repo.get_for_deletion(MirrorKind::Push, mirror.id)?.is_none());
                assert!(!repo.delete(MirrorKind::Push, mirror.id)?);

                assert!(repo.mark_deleted(MirrorKind::Push, mirror.id)?);
                assert!(!repo.mark_deleted(MirrorKind::Push, mirror.id)?);
                assert!(repo.get(MirrorKind::Push, mirror.id)?.is_none());
                assert!(repo.list(MirrorKind::Push, None)?.is_empty());
                assert_eq!(repo.list_deleted(MirrorKind::Push)?.len(), 1);
                assert!(repo.get_for_deletion(MirrorKind::Push, mirror.id)?.is_some());

                let err = repo
                    .set_last_sync(MirrorKind::Push, mirror.id, Utc::now())
                    .unwrap_err();
                assert!(err.is_not_found());

                assert!(repo.delete(MirrorKind::Push, mirror.id)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn setters_update_live_rows() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let user = UserRepo::new(tx).insert("carol", None)?;
                let repo = MirrorRepo::new(tx);
                let mirror = repo.insert_push(&new_mirror(user.id))?;
                let at = Utc::now();

                repo.set_target(MirrorKind::Push, mirror.id, Some("git@example.com:a/b.git"))?;
                repo.set_last_sync(MirrorKind::Push, mirror.id, at)?;
                repo.set_foreign_vcs_type(MirrorKind::Push, mirror.id, "git")?;

                let mirror = repo.require(MirrorKind::Push, mirror.id)?;
                assert_eq!(mirror.target.as_deref(), Some("git@example.com:a/b.git"));
                assert_eq!(mirror.foreign_vcs_type.as_deref(), Some("git"));
                assert_eq!(
                    mirror.last_sync.map(|t| t.timestamp_micros()),
                    Some(at.timestamp_micros())
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn list_filters_by_owner() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let users = UserRepo::new(tx);
                let a = users.insert("a", None)?;
                let b = users.insert("b", None)?;
                let repo = MirrorRepo::new(tx);
                repo.insert_push(&new_mirror(a.id))?;
                repo.insert_push(&new_mirror(b.id))?;
                repo.insert_push(&new_mirror(b.id))?;

                assert_eq!(repo.list(MirrorKind::Push, None)?.len(), 3);
                assert_eq!(repo.list(MirrorKind::Push, Some(b.id))?.len(), 2);
                assert!(repo.find_by_hook_token(MirrorKind::Push, "token-1")?.is_some());
                assert!(repo.find_by_hook_token(MirrorKind::Push, "nope")?.is_none());
                Ok(())
            })
            .unwrap();
    }
}
