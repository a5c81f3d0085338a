//! Per-mirror cron expressions stored as periodic tasks.

use crate::cron::parse_expression;
use crate::error::Result;
use chrono::Utc;
use tracing::info;
use vcsmirror_core::{MirrorId, MirrorKind};
use vcsmirror_store::{MirrorRepo, NewPeriodicTask, ScheduleStore, Store, StoreError};

/// Task dispatched by a mirror's periodic task.
#[must_use]
pub const fn cron_task_name(kind: MirrorKind) -> &'static str {
    match kind {
        MirrorKind::Pull => "sync_pull_mirror_cron",
        MirrorKind::Push => "sync_push_mirror_cron",
    }
}

/// Name of a mirror's periodic task, e.g. `PullMirror (id:3) periodic task 0 4 * * *`.
#[must_use]
pub fn periodic_task_name(kind: MirrorKind, mirror_id: MirrorId, expression: &str) -> String {
    format!(
        "{} (id:{mirror_id}) periodic task {}",
        kind.model_name(),
        expression.trim()
    )
}

/// Set, replace or clear the cron schedule of a mirror.
///
/// `None` or a blank expression removes the schedule. Returns `true` when
/// anything changed; re-setting an equivalent expression is a no-op and does
/// not advance the schedule version. A change advances it exactly once.
///
/// # Errors
/// Returns [`SchedulerError::InvalidCron`](crate::SchedulerError::InvalidCron)
/// before touching the store if the expression does not parse, and a store
/// error if the mirror does not exist or the write fails.
pub fn set_periodic_expression(
    store: &Store,
    kind: MirrorKind,
    mirror_id: MirrorId,
    expression: Option<&str>,
) -> Result<bool> {
    let wanted = expression
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| parse_expression(e).map(|fields| (e, fields)))
        .transpose()?;

    let changed = store.write(|tx| {
        let mirrors = MirrorRepo::new(tx);
        let schedules = ScheduleStore::batched(tx);

        let current = match mirrors.periodic_task_of(kind, mirror_id)? {
            Some(id) => schedules.get_task(id)?,
            None => None,
        };

        let Some((expr, fields)) = wanted else {
            let Some(task) = current else {
                return Ok(false);
            };
            schedules.delete_task(task.id)?;
            mirrors.set_periodic_task(kind, mirror_id, None)?;
            if let Some(crontab_id) = task.crontab_id {
                schedules.delete_crontab_if_unused(crontab_id)?;
            }
            schedules.bump_version(Utc::now())?;
            info!(kind = %kind, mirror_id, "periodic schedule cleared");
            return Ok(true);
        };

        if mirrors.get(kind, mirror_id)?.is_none() {
            return Err(StoreError::not_found(kind.model_name(), mirror_id));
        }

        let crontab = schedules.find_or_create_crontab(&fields)?;
        if let Some(task) = &current {
            if task.crontab_id == Some(crontab.id) {
                return Ok(false);
            }
        }

        if let Some(task) = current {
            schedules.delete_task(task.id)?;
            if let Some(old) = task.crontab_id.filter(|old| *old != crontab.id) {
                schedules.delete_crontab_if_unused(old)?;
            }
        }

        let name = periodic_task_name(kind, mirror_id, expr);
        if let Some(stale) = schedules.get_by_name(&name)? {
            schedules.delete_task(stale.id)?;
        }
        let task = schedules.create_task(
            &NewPeriodicTask::new(name, cron_task_name(kind))
                .with_crontab(crontab.id)
                .with_args(format!("[{mirror_id}]")),
        )?;
        mirrors.set_periodic_task(kind, mirror_id, Some(task.id))?;
        schedules.bump_version(Utc::now())?;
        info!(kind = %kind, mirror_id, expression = expr, "periodic schedule set");
        Ok(true)
    })?;

    Ok(changed)
}
