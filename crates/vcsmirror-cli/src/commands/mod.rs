//! CLI commands for vcsmirror.

pub mod beat;
pub mod config;
pub mod keys;
pub mod mirror;
pub mod schedule;
pub mod sync;
pub mod user;
pub mod worker;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vcsmirror_core::MirrorKind;

/// vcsmirror - keep Git and SVN repositories mirrored into a hosting service
///
/// Runs the periodic scheduler and the worker pool, and administers mirrors,
/// their schedules and the per-user SSH identities.
#[derive(Parser, Debug)]
#[command(name = "vcsmirror")]
#[command(author = "vcsmirror Contributors")]
#[command(version)]
#[command(about = "Mirror Git and SVN repositories on a schedule", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Only print errors
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Increase the verbosity of messages: -v info, -vv debug, -vvv trace
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Read settings from this JSON file (on top of the global one)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use this database file
    #[arg(long, global = true, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Keep mirror clones under this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub storage_root: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the periodic task scheduler until interrupted
    Beat(beat::BeatArgs),

    /// Run the worker pool until interrupted
    Worker(worker::WorkerArgs),

    /// Schedule a fetch-and-push of a mirror
    Sync(sync::SyncArgs),

    /// Add and delete mirrors
    #[command(subcommand)]
    Mirror(mirror::MirrorCommand),

    /// Manage periodic sync schedules
    #[command(subcommand)]
    Schedule(schedule::ScheduleCommand),

    /// Manage per-user SSH keys and trusted hosts
    #[command(subcommand)]
    Keys(keys::KeysCommand),

    /// Manage mirror owners
    #[command(subcommand)]
    User(user::UserCommand),

    /// Inspect the effective settings
    #[command(subcommand)]
    Config(config::ConfigCommand),
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Mirror direction argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// External repository into the hosting service
    Pull,
    /// Hosting service out to an external repository
    Push,
}

impl From<KindArg> for MirrorKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Pull => Self::Pull,
            KindArg::Push => Self::Push,
        }
    }
}
