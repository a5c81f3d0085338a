//! `vcsmirror beat`.

use crate::context::Context;
use crate::shutdown::run_until_interrupted;
use clap::Args;
use vcsmirror_scheduler::DatabaseScheduler;

/// Arguments for the beat command
#[derive(Args, Debug, Clone)]
pub struct BeatArgs {
    /// Install the default entries and exit
    #[arg(long)]
    pub install_only: bool,
}

pub async fn run(ctx: &Context, args: &BeatArgs) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let queue = ctx.queue(store.clone());
    let max_interval = chrono::Duration::from_std(ctx.settings().beat.max_interval())?;
    let mut scheduler = DatabaseScheduler::new(store, queue).with_max_interval(max_interval);

    if args.install_only {
        scheduler.install_default_entries()?;
        println!("default periodic tasks installed");
        return Ok(());
    }

    run_until_interrupted(move |stop| Ok(scheduler.run(&stop)?)).await
}
