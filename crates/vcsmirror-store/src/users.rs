//! Users and the local copies of hosting-service groups and projects.

use crate::error::{Result, StoreError};
use crate::models::{MirrorGroup, Project, User};
use crate::db::to_sql_ts;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use vcsmirror_core::UserId;

const USER_COLUMNS: &str = "id, name, hosted_id, deploy_key_id, is_rsa_pair_set";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        hosted_id: row.get(2)?,
        deploy_key_id: row.get(3)?,
        is_rsa_pair_set: row.get(4)?,
    })
}

/// User rows.
#[derive(Debug, Clone, Copy)]
pub struct UserRepo<'c> {
    conn: &'c Connection,
}

impl<'c> UserRepo<'c> {
    /// View over a connection or transaction.
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert a user.
    ///
    /// # Errors
    /// Returns error if the hosted id is already taken.
    pub fn insert(&self, name: &str, hosted_id: Option<i64>) -> Result<User> {
        let now = to_sql_ts(Utc::now());
        self.conn.execute(
            "INSERT INTO users (name, hosted_id, created, updated) VALUES (?1, ?2, ?3, ?3)",
            params![name, hosted_id, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.require(id)
    }

    /// Fetch a user.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn get(&self, id: UserId) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?)
    }

    /// Fetch a user that must exist.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if there is no such user.
    pub fn require(&self, id: UserId) -> Result<User> {
        self.get(id)?.ok_or_else(|| StoreError::not_found("user", id))
    }

    /// All users, by id.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn list(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Record whether the user's keypair exists.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if there is no such user.
    pub fn set_rsa_pair(&self, id: UserId, is_set: bool) -> Result<()> {
        self.update(
            id,
            "UPDATE users SET is_rsa_pair_set = ?2, updated = ?3 WHERE id = ?1",
            params![id, is_set, to_sql_ts(Utc::now())],
        )
    }

    /// Record the user's deploy key id at the hosting service.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if there is no such user.
    pub fn set_deploy_key(&self, id: UserId, deploy_key_id: Option<i64>) -> Result<()> {
        self.update(
            id,
            "UPDATE users SET deploy_key_id = ?2, updated = ?3 WHERE id = ?1",
            params![id, deploy_key_id, to_sql_ts(Utc::now())],
        )
    }

    fn update(&self, id: UserId, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        match self.conn.execute(sql, params)? {
            0 => Err(StoreError::not_found("user", id)),
            _ => Ok(()),
        }
    }
}

/// Group and project rows, keyed by their hosting-service ids.
#[derive(Debug, Clone, Copy)]
pub struct CatalogRepo<'c> {
    conn: &'c Connection,
}

impl<'c> CatalogRepo<'c> {
    /// View over a connection or transaction.
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert or rename the group with `hosted_id`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn upsert_group(&self, hosted_id: i64, name: &str) -> Result<MirrorGroup> {
        let now = to_sql_ts(Utc::now());
        self.conn.execute(
            "INSERT INTO mirror_groups (hosted_id, name, created, updated) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT (hosted_id) DO UPDATE SET name = excluded.name, updated = excluded.updated",
            params![hosted_id, name, now],
        )?;
        self.conn
            .query_row(
                "SELECT id, hosted_id, name FROM mirror_groups WHERE hosted_id = ?1",
                params![hosted_id],
                group_from_row,
            )
            .map_err(Into::into)
    }

    /// Fetch a group.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn group(&self, id: i64) -> Result<Option<MirrorGroup>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, hosted_id, name FROM mirror_groups WHERE id = ?1",
                params![id],
                group_from_row,
            )
            .optional()?)
    }

    /// Insert or refresh the project with `hosted_id`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn upsert_project(
        &self,
        hosted_id: i64,
        name: &str,
        name_with_namespace: &str,
        web_url: Option<&str>,
    ) -> Result<Project> {
        let now = to_sql_ts(Utc::now());
        self.conn.execute(
            "INSERT INTO projects (hosted_id, name, name_with_namespace, web_url, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (hosted_id) DO UPDATE SET
                name = excluded.name,
                name_with_namespace = excluded.name_with_namespace,
                web_url = excluded.web_url,
                updated = excluded.updated",
            params![hosted_id, name, name_with_namespace, web_url, now],
        )?;
        self.conn
            .query_row(
                "SELECT id, hosted_id, name, name_with_namespace, web_url
                 FROM projects WHERE hosted_id = ?1",
                params![hosted_id],
                project_from_row,
            )
            .map_err(Into::into)
    }

    /// Fetch a project.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn project(&self, id: i64) -> Result<Option<Project>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, hosted_id, name, name_with_namespace, web_url FROM projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()?)
    }
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<MirrorGroup> {
    Ok(MirrorGroup {
        id: row.get(0)?,
        hosted_id: row.get(1)?,
        name: row.get(2)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        hosted_id: row.get(1)?,
        name: row.get(2)?,
        name_with_namespace: row.get(3)?,
        web_url: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use pretty_assertions::assert_eq;

    #[test]
    fn user_flags_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let repo = UserRepo::new(tx);
                let user = repo.insert("alice", Some(10))?;
                assert!(!user.is_rsa_pair_set);
                repo.set_rsa_pair(user.id, true)?;
                repo.set_deploy_key(user.id, Some(77))?;
                let user = repo.require(user.id)?;
                assert!(user.is_rsa_pair_set);
                assert_eq!(user.deploy_key_id, Some(77));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn missing_user_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .read(|conn| UserRepo::new(conn).set_rsa_pair(99, true))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn catalog_upserts_by_hosted_id() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let repo = CatalogRepo::new(tx);
                let first = repo.upsert_group(5, "mirrors")?;
                let second = repo.upsert_group(5, "mirrored")?;
                assert_eq!(first.id, second.id);
                assert_eq!(second.name, "mirrored");

                let project = repo.upsert_project(9, "widget", "mirrors / widget", None)?;
                assert_eq!(repo.project(project.id)?, Some(project));
                Ok(())
            })
            .unwrap();
    }
}
