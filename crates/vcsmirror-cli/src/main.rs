//! vcsmirror CLI - keeps Git and SVN repositories mirrored into a hosting
//! service.
//!
//! `vcsmirror beat` runs the periodic scheduler, `vcsmirror worker` runs
//! the task pool; the remaining commands administer mirrors, schedules and
//! SSH identities in the shared database.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod context;
mod shutdown;

use clap::Parser;
use commands::{Cli, Commands, LogFormat};
use context::Context;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use vcsmirror_config::{CliOverrides, ConfigError, ConfigLoader, EnvConfig, Resolved};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 if cli.quiet => Level::ERROR,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.with_target(false).init(),
    }

    let resolved = match load_settings(&cli) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            return ExitCode::FAILURE;
        }
    };
    let ctx = Context::new(resolved);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(&cli, &ctx)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Resolved, ConfigError> {
    let mut overrides = CliOverrides {
        database: cli.database.clone(),
        storage_root: cli.storage_root.clone(),
        ..CliOverrides::default()
    };
    if let Commands::Worker(args) = &cli.command {
        overrides.concurrency = args.concurrency;
        overrides.default_queue.clone_from(&args.queue);
    }

    ConfigLoader::new(EnvConfig::from_env()?)
        .with_file(cli.config.clone())
        .load(&overrides)
}

async fn run_command(cli: &Cli, ctx: &Context) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Beat(args) => commands::beat::run(ctx, args).await,
        Commands::Worker(args) => commands::worker::run(ctx, args).await,
        Commands::Sync(args) => commands::sync::run(ctx, args),
        Commands::Mirror(command) => commands::mirror::run(ctx, command),
        Commands::Schedule(command) => commands::schedule::run(ctx, command),
        Commands::Keys(command) => commands::keys::run(ctx, command),
        Commands::User(command) => commands::user::run(ctx, command),
        Commands::Config(command) => commands::config::run(ctx, command),
    }
}
