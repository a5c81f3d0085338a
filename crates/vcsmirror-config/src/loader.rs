//! Settings loader with layered merging.

use crate::env::EnvConfig;
use crate::error::{ConfigError, Result};
use crate::types::{Settings, SettingsFile, project_dirs};
use crate::validate::validate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration source in layering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    /// Built-in defaults.
    Defaults = 0,
    /// User global configuration file.
    Global = 1,
    /// File named with `--config`.
    File = 2,
    /// Environment variables.
    Environment = 3,
    /// CLI arguments.
    Cli = 4,
}

impl ConfigSource {
    /// Get description for display.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Defaults => "built-in defaults",
            Self::Global => "global configuration",
            Self::File => "configuration file",
            Self::Environment => "environment variables",
            Self::Cli => "command-line arguments",
        }
    }
}

/// Overrides taken from command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// `--database`.
    pub database: Option<PathBuf>,
    /// `--storage-root`.
    pub storage_root: Option<PathBuf>,
    /// `--concurrency`.
    pub concurrency: Option<usize>,
    /// `--queue`.
    pub default_queue: Option<String>,
}

impl CliOverrides {
    fn as_layer(&self) -> SettingsFile {
        let mut layer = SettingsFile {
            database: self.database.clone(),
            storage_root: self.storage_root.clone(),
            default_queue: self.default_queue.clone(),
            ..SettingsFile::default()
        };
        layer.worker.concurrency = self.concurrency;
        layer
    }
}

/// Settings together with the layer each key was last set by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The merged settings.
    pub settings: Settings,
    /// Key (dot notation) to the source that set it.
    pub origins: BTreeMap<&'static str, ConfigSource>,
}

impl Resolved {
    /// Source of `key`; keys never overridden come from the defaults.
    #[must_use]
    pub fn origin(&self, key: &str) -> ConfigSource {
        self.origins.get(key).copied().unwrap_or(ConfigSource::Defaults)
    }
}

/// Loads and merges the configuration layers.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    global_path: Option<PathBuf>,
    file: Option<PathBuf>,
    env: EnvConfig,
}

impl ConfigLoader {
    /// A loader reading the global file from the platform config directory.
    #[must_use]
    pub fn new(env: EnvConfig) -> Self {
        Self {
            global_path: project_dirs().map(|dirs| dirs.config_dir().join("config.json")),
            file: None,
            env,
        }
    }

    /// Read the global layer from `path` instead, or skip it with `None`.
    #[must_use]
    pub fn with_global_path(mut self, path: Option<PathBuf>) -> Self {
        self.global_path = path;
        self
    }

    /// Add an explicit configuration file, which must exist.
    #[must_use]
    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        self.file = path;
        self
    }

    /// Path of the global configuration file.
    #[must_use]
    pub fn global_path(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Merge all layers and validate the result.
    ///
    /// # Errors
    /// Returns error if a file cannot be read or parsed, the explicit file
    /// is missing, or the merged settings fail validation.
    pub fn load(&self, cli: &CliOverrides) -> Result<Resolved> {
        let mut resolved = Resolved {
            settings: Settings::default(),
            origins: BTreeMap::new(),
        };

        if let Some(path) = &self.global_path {
            match load_file(path) {
                Ok(layer) => apply(&mut resolved, &layer, ConfigSource::Global),
                Err(err) if err.is_not_found() => debug!(path = ?path, "no global configuration"),
                Err(err) => return Err(err),
            }
        }
        if let Some(path) = &self.file {
            apply(&mut resolved, &load_file(path)?, ConfigSource::File);
        }
        apply(&mut resolved, self.env.layer(), ConfigSource::Environment);
        apply(&mut resolved, &cli.as_layer(), ConfigSource::Cli);

        validate(&resolved.settings)?;
        Ok(resolved)
    }
}

/// Parse one settings file.
///
/// # Errors
/// Returns error if the file cannot be read or is not a valid settings file.
pub fn load_file(path: &Path) -> Result<SettingsFile> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    sonic_rs::from_str(&content).map_err(|e| ConfigError::json(path, &e))
}

fn set<T: Clone>(
    origins: &mut BTreeMap<&'static str, ConfigSource>,
    key: &'static str,
    source: ConfigSource,
    value: Option<&T>,
    slot: &mut T,
) {
    if let Some(value) = value {
        *slot = value.clone();
        origins.insert(key, source);
    }
}

fn apply(resolved: &mut Resolved, layer: &SettingsFile, source: ConfigSource) {
    let Resolved { settings, origins } = resolved;
    set(origins, "storage_root", source, layer.storage_root.as_ref(), &mut settings.storage_root);
    set(origins, "ssh_dir", source, layer.ssh_dir.as_ref(), &mut settings.ssh_dir);
    set(origins, "database", source, layer.database.as_ref(), &mut settings.database);
    set(origins, "default_queue", source, layer.default_queue.as_ref(), &mut settings.default_queue);
    if let Some(url) = &layer.hook_base_url {
        settings.hook_base_url = Some(url.clone());
        origins.insert("hook_base_url", source);
    }

    let beat = &layer.beat;
    set(
        origins,
        "beat.max_interval_secs",
        source,
        beat.max_interval_secs.as_ref(),
        &mut settings.beat.max_interval_secs,
    );

    let worker = &layer.worker;
    let slots = &mut settings.worker;
    set(origins, "worker.concurrency", source, worker.concurrency.as_ref(), &mut slots.concurrency);
    set(
        origins,
        "worker.poll_interval_ms",
        source,
        worker.poll_interval_ms.as_ref(),
        &mut slots.poll_interval_ms,
    );
    set(
        origins,
        "worker.soft_time_limit_secs",
        source,
        worker.soft_time_limit_secs.as_ref(),
        &mut slots.soft_time_limit_secs,
    );
    set(
        origins,
        "worker.hard_time_limit_secs",
        source,
        worker.hard_time_limit_secs.as_ref(),
        &mut slots.hard_time_limit_secs,
    );
    set(
        origins,
        "worker.result_expires_secs",
        source,
        worker.result_expires_secs.as_ref(),
        &mut slots.result_expires_secs,
    );
    set(
        origins,
        "worker.lock_timeout_secs",
        source,
        worker.lock_timeout_secs.as_ref(),
        &mut slots.lock_timeout_secs,
    );
}
