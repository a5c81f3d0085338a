//! Layered settings for vcsmirror.
//!
//! Settings are merged from, lowest to highest precedence:
//!
//! 1. built-in defaults
//! 2. the global `config.json` in the platform config directory
//! 3. a file passed with `--config`
//! 4. `VCSMIRROR_*` environment variables
//! 5. command-line flags
//!
//! The merged result is validated; problems surface as [`miette`]
//! diagnostics.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod env;
pub mod error;
pub mod loader;
pub mod types;
pub mod validate;

pub use env::{EnvConfig, EnvVar, parse_duration_secs};
pub use error::{ConfigError, Result};
pub use loader::{CliOverrides, ConfigLoader, ConfigSource, Resolved, load_file};
pub use types::{
    BeatFile, BeatSettings, DEFAULT_QUEUE, Settings, SettingsFile, WorkerFile, WorkerSettings,
    project_dirs,
};
pub use validate::{MAX_CONCURRENCY, issues, validate};
