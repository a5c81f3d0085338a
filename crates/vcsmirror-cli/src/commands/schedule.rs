//! `vcsmirror schedule`.

use super::KindArg;
use crate::context::Context;
use clap::Subcommand;
use vcsmirror_core::{MirrorId, MirrorKind};
use vcsmirror_store::{PeriodicTaskRow, ScheduleStore};

/// Schedule subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ScheduleCommand {
    /// Sync a mirror on a cron expression (`minute hour day month weekday`)
    Set {
        /// Mirror id
        id: MirrorId,

        /// Cron expression, e.g. "0 4 * * *"
        expression: String,

        /// Mirror direction
        #[arg(long, value_enum, default_value = "pull")]
        kind: KindArg,
    },

    /// Remove a mirror's periodic sync
    Clear {
        /// Mirror id
        id: MirrorId,

        /// Mirror direction
        #[arg(long, value_enum, default_value = "pull")]
        kind: KindArg,
    },

    /// List periodic tasks
    List {
        /// Include disabled tasks
        #[arg(short, long)]
        all: bool,
    },
}

pub fn run(ctx: &Context, command: &ScheduleCommand) -> anyhow::Result<()> {
    let store = ctx.open_store()?;

    match command {
        ScheduleCommand::Set { id, expression, kind } => {
            let kind = MirrorKind::from(*kind);
            let changed = ctx.service(store).set_periodic_expression(kind, *id, Some(expression.as_str()))?;
            println!(
                "{kind} mirror {id}: {}",
                if changed { "schedule set" } else { "schedule unchanged" }
            );
        }
        ScheduleCommand::Clear { id, kind } => {
            let kind = MirrorKind::from(*kind);
            let changed = ctx.service(store).set_periodic_expression(kind, *id, None)?;
            println!(
                "{kind} mirror {id}: {}",
                if changed { "schedule cleared" } else { "no schedule" }
            );
        }
        ScheduleCommand::List { all } => {
            let lines = store.read(|c| {
                let schedules = ScheduleStore::new(c);
                let mut lines = Vec::new();
                for task in schedules.list_tasks()? {
                    if !*all && !task.enabled {
                        continue;
                    }
                    let when = describe_schedule(&schedules, &task)?;
                    lines.push(format_row(&task, &when));
                }
                Ok(lines)
            })?;
            for line in lines {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn describe_schedule(schedules: &ScheduleStore<'_>, task: &PeriodicTaskRow) -> vcsmirror_store::Result<String> {
    if let Some(id) = task.crontab_id
        && let Some(crontab) = schedules.crontab(id)?
    {
        return Ok(format!("cron {}", crontab.fields));
    }
    if let Some(id) = task.interval_id
        && let Some(interval) = schedules.interval(id)?
    {
        return Ok(format!("every {} {}", interval.every, interval.period));
    }
    Ok("unscheduled".to_string())
}

fn format_row(task: &PeriodicTaskRow, when: &str) -> String {
    let last = task
        .last_run_at
        .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
    format!(
        "{}\t{}\t{}\t{when}\t{}\tlast run {last}\truns {}",
        task.id,
        task.name,
        task.task,
        if task.enabled { "enabled" } else { "disabled" },
        task.total_run_count,
    )
}
