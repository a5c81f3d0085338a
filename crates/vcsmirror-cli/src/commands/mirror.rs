//! `vcsmirror mirror`.

use super::KindArg;
use crate::context::Context;
use clap::{Args, Subcommand};
use vcsmirror_core::{InvokedBy, MirrorId, MirrorKind, UserId};
use vcsmirror_store::{CatalogRepo, MirrorRepo, NewMirror, PullSettings, TaskRun};
use vcsmirror_vcs::RemoteEndpoint;

/// Mirror subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum MirrorCommand {
    /// Add a mirror from an external repository into the hosting service
    AddPull(AddPullArgs),

    /// Add a mirror from the hosting service out to an external repository
    AddPush(AddPushArgs),

    /// Delete a mirror, its schedule and its clone
    Delete {
        /// Mirror direction
        #[arg(value_enum)]
        kind: KindArg,

        /// Mirror id
        id: MirrorId,
    },

    /// List mirrors
    List {
        /// Mirror direction
        #[arg(value_enum)]
        kind: KindArg,

        /// Only mirrors owned by this user
        #[arg(long, value_name = "ID")]
        user: Option<UserId>,
    },
}

/// Flags shared by both directions.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Owner of the mirror
    #[arg(long, value_name = "ID")]
    pub user: UserId,

    /// Force-update refs on push
    #[arg(long)]
    pub force_update: bool,

    /// Do not delete refs the source no longer has
    #[arg(long)]
    pub no_prune: bool,

    /// Free-form note
    #[arg(long, default_value = "")]
    pub note: String,
}

/// Arguments for `mirror add-pull`
#[derive(Args, Debug, Clone)]
pub struct AddPullArgs {
    /// Repository to mirror (git, svn or ssh URL, or scp-like git location)
    pub source: String,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Hosting-service group to create the project in
    #[arg(long, value_name = "ID")]
    pub group: Option<i64>,

    /// Display name of the group
    #[arg(long, value_name = "NAME", requires = "group")]
    pub group_name: Option<String>,

    /// Name of the project to create
    #[arg(long, value_name = "NAME")]
    pub project_name: Option<String>,

    /// Project visibility
    #[arg(long, default_value = "private")]
    pub visibility: String,

    /// Push into this existing target instead of creating a project
    #[arg(long, value_name = "URL", conflicts_with_all = ["group", "no_remote"])]
    pub target: Option<String>,

    /// Keep a local mirror only, with no push target
    #[arg(long)]
    pub no_remote: bool,
}

/// Arguments for `mirror add-push`
#[derive(Args, Debug, Clone)]
pub struct AddPushArgs {
    /// External repository to push to
    pub target: String,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Hosting-service project to mirror from
    #[arg(long, value_name = "ID")]
    pub project: Option<i64>,

    /// Display name of the project
    #[arg(long, value_name = "NAME", requires = "project")]
    pub project_name: Option<String>,
}

fn new_mirror(common: &CommonArgs, source: Option<String>, target: Option<String>) -> NewMirror {
    NewMirror {
        user_id: common.user,
        source,
        target,
        note: common.note.clone(),
        hook_token: uuid::Uuid::new_v4().simple().to_string(),
        is_force_update: common.force_update,
        is_prune_mirrors: !common.no_prune,
        ..NewMirror::default()
    }
}

fn print_runs(kind: MirrorKind, id: MirrorId, runs: &[TaskRun]) {
    println!("{kind} mirror {id}");
    for run in runs {
        println!("  {} {}", run.task_name, run.task_id);
    }
}

pub fn run(ctx: &Context, command: &MirrorCommand) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let service = ctx.service(store.clone());

    match command {
        MirrorCommand::AddPull(args) => {
            RemoteEndpoint::parse(&args.source)?;
            if let Some(target) = &args.target {
                RemoteEndpoint::parse(target)?;
            }
            let pull = store.write(|tx| {
                let group_id = match args.group {
                    Some(hosted) => {
                        let name = args.group_name.clone().unwrap_or_else(|| hosted.to_string());
                        Some(CatalogRepo::new(tx).upsert_group(hosted, &name)?.id)
                    }
                    None => None,
                };
                let settings = PullSettings {
                    group_id,
                    project_name: args.project_name.clone().unwrap_or_default(),
                    is_no_create: args.target.is_some(),
                    is_no_remote: args.no_remote,
                    visibility: args.visibility.clone(),
                    ..PullSettings::default()
                };
                let new = new_mirror(&args.common, Some(args.source.clone()), args.target.clone());
                MirrorRepo::new(tx).insert_pull(&new, &settings)
            })?;
            let id = pull.mirror.id;
            let runs = service.schedule_create_or_update(MirrorKind::Pull, id, InvokedBy::Manual)?;
            print_runs(MirrorKind::Pull, id, &runs);
        }
        MirrorCommand::AddPush(args) => {
            RemoteEndpoint::parse(&args.target)?;
            let mirror = store.write(|tx| {
                let mut new = new_mirror(&args.common, None, Some(args.target.clone()));
                if let Some(hosted) = args.project {
                    let name = args.project_name.clone().unwrap_or_else(|| hosted.to_string());
                    new.project_id = Some(CatalogRepo::new(tx).upsert_project(hosted, &name, &name, None)?.id);
                }
                MirrorRepo::new(tx).insert_push(&new)
            })?;
            let runs = service.schedule_create_or_update(MirrorKind::Push, mirror.id, InvokedBy::Manual)?;
            print_runs(MirrorKind::Push, mirror.id, &runs);
        }
        MirrorCommand::Delete { kind, id } => {
            let run = service.schedule_delete((*kind).into(), *id, InvokedBy::Manual)?;
            println!("{} {}", run.task_name, run.task_id);
        }
        MirrorCommand::List { kind, user } => {
            let kind = MirrorKind::from(*kind);
            for mirror in store.read(|c| MirrorRepo::new(c).list(kind, *user))? {
                let location = match kind {
                    MirrorKind::Pull => mirror.source.as_deref(),
                    MirrorKind::Push => mirror.target.as_deref(),
                };
                let synced = mirror
                    .last_sync
                    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
                println!(
                    "{}\tuser {}\t{}\tlast sync {synced}",
                    mirror.id,
                    mirror.user_id,
                    location.unwrap_or("-"),
                );
            }
        }
    }
    Ok(())
}
