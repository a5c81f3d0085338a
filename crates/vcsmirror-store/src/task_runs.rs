//! Audit rows linking mirrors to task-meta records.

use crate::db::{to_sql_ts, ts_col};
use crate::error::{Result, StoreError};
use crate::models::{NewTaskRun, TaskRun};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use vcsmirror_core::{InvokedBy, MirrorId, MirrorKind};

const COLUMNS: &str =
    "id, pull_mirror_id, push_mirror_id, task_name, invoked_by, task_id, parent_id, created";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRun> {
    let pull: Option<MirrorId> = row.get(1)?;
    let push: Option<MirrorId> = row.get(2)?;
    let mirror = pull
        .map(|id| (MirrorKind::Pull, id))
        .or_else(|| push.map(|id| (MirrorKind::Push, id)));
    let invoked_by: String = row.get(4)?;
    let task_id: String = row.get(5)?;
    let task_id = uuid::Uuid::parse_str(&task_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(TaskRun {
        id: row.get(0)?,
        mirror,
        task_name: row.get(3)?,
        invoked_by: InvokedBy::parse(&invoked_by),
        task_id,
        parent_id: row.get(6)?,
        created: ts_col(row, 7)?,
    })
}

const fn mirror_columns(mirror: Option<(MirrorKind, MirrorId)>) -> (Option<MirrorId>, Option<MirrorId>) {
    match mirror {
        Some((MirrorKind::Pull, id)) => (Some(id), None),
        Some((MirrorKind::Push, id)) => (None, Some(id)),
        None => (None, None),
    }
}

/// Task run rows.
#[derive(Debug, Clone, Copy)]
pub struct TaskRunRepo<'c> {
    conn: &'c Connection,
}

impl<'c> TaskRunRepo<'c> {
    /// View over a connection or transaction.
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Record a run.
    ///
    /// # Errors
    /// Returns error if the mirror or parent does not exist.
    pub fn insert(&self, new: &NewTaskRun) -> Result<TaskRun> {
        let (pull, push) = mirror_columns(new.mirror);
        self.conn.execute(
            "INSERT INTO task_runs
                (pull_mirror_id, push_mirror_id, task_name, invoked_by, task_id, parent_id, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                pull,
                push,
                new.task_name,
                new.invoked_by.as_str(),
                new.task_id.to_string(),
                new.parent_id,
                to_sql_ts(Utc::now()),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get(id)?
            .ok_or_else(|| StoreError::not_found("task run", id))
    }

    /// Fetch a run.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn get(&self, id: i64) -> Result<Option<TaskRun>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM task_runs WHERE id = ?1"),
                params![id],
                run_from_row,
            )
            .optional()?)
    }

    /// Runs chained after `parent_id`.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn children(&self, parent_id: i64) -> Result<Vec<TaskRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM task_runs WHERE parent_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![parent_id], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Runs of one mirror, newest first.
    ///
    /// # Errors
    /// Returns error on driver failure.
    pub fn list_for_mirror(&self, kind: MirrorKind, id: MirrorId, limit: usize) -> Result<Vec<TaskRun>> {
        let column = match kind {
            MirrorKind::Pull => "pull_mirror_id",
            MirrorKind::Push => "push_mirror_id",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM task_runs WHERE {column} = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![id, limit as i64], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use crate::mirrors::MirrorRepo;
    use crate::models::NewMirror;
    use crate::users::UserRepo;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn chained_runs_form_a_tree() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let user = UserRepo::new(tx).insert("dora", None)?;
                let mirror = MirrorRepo::new(tx).insert_push(&NewMirror {
                    user_id: user.id,
                    hook_token: "t".into(),
                    ..NewMirror::default()
                })?;
                let runs = TaskRunRepo::new(tx);
                let parent = runs.insert(&NewTaskRun {
                    mirror: Some((MirrorKind::Push, mirror.id)),
                    task_name: "create_ssh_config".into(),
                    invoked_by: InvokedBy::Manual,
                    task_id: Uuid::new_v4(),
                    parent_id: None,
                })?;
                let child = runs.insert(&NewTaskRun {
                    mirror: Some((MirrorKind::Push, mirror.id)),
                    task_name: "save_push_mirror".into(),
                    invoked_by: InvokedBy::Manual,
                    task_id: Uuid::new_v4(),
                    parent_id: Some(parent.id),
                })?;

                assert_eq!(runs.children(parent.id)?, vec![child.clone()]);
                let listed = runs.list_for_mirror(MirrorKind::Push, mirror.id, 10)?;
                assert_eq!(listed.first().map(|r| r.id), Some(child.id));
                assert_eq!(listed.len(), 2);
                assert!(runs.list_for_mirror(MirrorKind::Pull, mirror.id, 10)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn run_without_mirror() {
        let store = Store::open_in_memory().unwrap();
        let run = store
            .write(|tx| {
                TaskRunRepo::new(tx).insert(&NewTaskRun {
                    mirror: None,
                    task_name: "backend_cleanup".into(),
                    invoked_by: InvokedBy::Scheduler,
                    task_id: Uuid::new_v4(),
                    parent_id: None,
                })
            })
            .unwrap();
        assert_eq!(run.mirror, None);
        assert_eq!(run.invoked_by, InvokedBy::Scheduler);
    }
}
