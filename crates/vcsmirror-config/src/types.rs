//! Settings types: the resolved [`Settings`] and the partial file layer.

use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default queue for mirror tasks.
pub const DEFAULT_QUEUE: &str = "mirrors";

/// Platform directories for vcsmirror, if a home directory is known.
#[must_use]
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "vcsmirror", "vcsmirror")
}

fn data_dir() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from("."), |dirs| dirs.data_dir().to_path_buf())
}

fn home_ssh_dir() -> PathBuf {
    BaseDirs::new().map_or_else(|| PathBuf::from(".ssh"), |dirs| dirs.home_dir().join(".ssh"))
}

/// Periodic scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatSettings {
    /// Longest sleep between schedule checks.
    pub max_interval_secs: u64,
}

impl Default for BeatSettings {
    fn default() -> Self {
        Self { max_interval_secs: 5 }
    }
}

impl BeatSettings {
    /// [`Self::max_interval_secs`] as a duration.
    #[must_use]
    pub const fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Pool threads.
    pub concurrency: usize,
    /// Sleep between polls of an empty queue.
    pub poll_interval_ms: u64,
    /// Runs longer than this are logged.
    pub soft_time_limit_secs: u64,
    /// Claims older than this are handed out again.
    pub hard_time_limit_secs: u64,
    /// Finished task rows are purged after this long.
    pub result_expires_secs: u64,
    /// Single-instance locks expire after this long.
    pub lock_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            poll_interval_ms: 500,
            soft_time_limit_secs: 20 * 60,
            hard_time_limit_secs: 30 * 60,
            result_expires_secs: 10 * 60,
            lock_timeout_secs: 30 * 60,
        }
    }
}

impl WorkerSettings {
    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Soft limit as a duration.
    #[must_use]
    pub const fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    /// Hard limit as a duration.
    #[must_use]
    pub const fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }

    /// Result expiry as a duration.
    #[must_use]
    pub const fn result_expires(&self) -> Duration {
        Duration::from_secs(self.result_expires_secs)
    }

    /// Lock timeout as a duration.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the per-mirror clones.
    pub storage_root: PathBuf,
    /// Keys, known-hosts files and the shared ssh config.
    pub ssh_dir: PathBuf,
    /// SQLite database file.
    pub database: PathBuf,
    /// Queue for tasks that name none.
    pub default_queue: String,
    /// Base URL push hooks call back to.
    pub hook_base_url: Option<String>,
    /// Scheduler.
    pub beat: BeatSettings,
    /// Worker pool.
    pub worker: WorkerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data = data_dir();
        Self {
            storage_root: data.join("repositories"),
            ssh_dir: home_ssh_dir(),
            database: data.join("vcsmirror.sqlite3"),
            default_queue: DEFAULT_QUEUE.to_string(),
            hook_base_url: None,
            beat: BeatSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

/// `beat` section of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeatFile {
    /// See [`BeatSettings::max_interval_secs`].
    pub max_interval_secs: Option<u64>,
}

/// `worker` section of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerFile {
    pub concurrency: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub soft_time_limit_secs: Option<u64>,
    pub hard_time_limit_secs: Option<u64>,
    pub result_expires_secs: Option<u64>,
    pub lock_timeout_secs: Option<u64>,
}

/// A settings file: every key optional, unknown keys rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub storage_root: Option<PathBuf>,
    pub ssh_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub default_queue: Option<String>,
    pub hook_base_url: Option<String>,
    #[serde(default)]
    pub beat: BeatFile,
    #[serde(default)]
    pub worker: WorkerFile,
}
