//! `vcsmirror worker`.

use crate::context::Context;
use crate::shutdown::run_until_interrupted;
use clap::Args;
use std::sync::Arc;
use vcsmirror_tasks::{TaskRegistry, Worker, WorkerConfig, register_all};

/// Arguments for the worker command
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Pool threads (overrides worker.concurrency)
    #[arg(short = 'c', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Queue to consume (overrides default_queue)
    #[arg(short = 'Q', long, value_name = "NAME")]
    pub queue: Option<String>,

    /// Run pending tasks on the current thread, then exit
    #[arg(long)]
    pub drain: bool,
}

pub async fn run(ctx: &Context, args: &WorkerArgs) -> anyhow::Result<()> {
    let settings = ctx.settings();
    let store = ctx.open_store()?;
    let config = WorkerConfig {
        queue: settings.default_queue.clone(),
        concurrency: settings.worker.concurrency,
        poll_interval: settings.worker.poll_interval(),
        soft_time_limit: settings.worker.soft_time_limit(),
        hard_time_limit: settings.worker.hard_time_limit(),
        lock_timeout: settings.worker.lock_timeout(),
    };

    let mut registry = TaskRegistry::new();
    register_all(&mut registry);
    let worker = Worker::new(ctx.task_context(store), Arc::new(registry), config);

    if args.drain {
        let mut count = 0usize;
        while let Some(done) = worker.run_once()? {
            println!("{} {} {}", done.task_id, done.name, done.status);
            count += 1;
        }
        println!("{count} task(s) run");
        return Ok(());
    }

    run_until_interrupted(move |stop| Ok(worker.run(&stop)?)).await
}
