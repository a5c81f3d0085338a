//! `vcsmirror sync`.

use super::KindArg;
use crate::context::Context;
use clap::Args;
use vcsmirror_core::{InvokedBy, MirrorId, MirrorKind};

/// Arguments for the sync command
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Mirror direction
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Mirror id
    pub id: MirrorId,
}

pub fn run(ctx: &Context, args: &SyncArgs) -> anyhow::Result<()> {
    let kind = MirrorKind::from(args.kind);
    let run = ctx
        .service(ctx.open_store()?)
        .schedule_sync(kind, args.id, InvokedBy::Manual)?;
    println!("{} {} (task run {})", run.task_name, run.task_id, run.id);
    Ok(())
}
