//! Environment variable configuration support.

use crate::error::{ConfigError, Result};
use crate::types::SettingsFile;
use std::path::PathBuf;

/// Environment variables vcsmirror reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvVar {
    /// `VCSMIRROR_STORAGE_ROOT` - root of the mirror clones.
    StorageRoot,
    /// `VCSMIRROR_SSH_DIR` - keys and ssh config.
    SshDir,
    /// `VCSMIRROR_DATABASE` - database file.
    Database,
    /// `VCSMIRROR_BEAT_MAX_INTERVAL` - scheduler max sleep.
    BeatMaxInterval,
    /// `VCSMIRROR_WORKER_CONCURRENCY` - pool threads.
    WorkerConcurrency,
    /// `VCSMIRROR_WORKER_POLL_MS` - empty queue poll interval.
    WorkerPollMs,
    /// `VCSMIRROR_SOFT_TIME_LIMIT` - task soft limit.
    SoftTimeLimit,
    /// `VCSMIRROR_HARD_TIME_LIMIT` - task hard limit.
    HardTimeLimit,
    /// `VCSMIRROR_RESULT_EXPIRES` - finished task retention.
    ResultExpires,
    /// `VCSMIRROR_LOCK_TIMEOUT` - single-instance lock expiry.
    LockTimeout,
    /// `VCSMIRROR_DEFAULT_QUEUE` - queue for unnamed tasks.
    DefaultQueue,
    /// `VCSMIRROR_HOOK_BASE_URL` - base of push hook URLs.
    HookBaseUrl,
}

impl EnvVar {
    /// Every variable, in documentation order.
    pub const ALL: [Self; 12] = [
        Self::StorageRoot,
        Self::SshDir,
        Self::Database,
        Self::BeatMaxInterval,
        Self::WorkerConcurrency,
        Self::WorkerPollMs,
        Self::SoftTimeLimit,
        Self::HardTimeLimit,
        Self::ResultExpires,
        Self::LockTimeout,
        Self::DefaultQueue,
        Self::HookBaseUrl,
    ];

    /// Get the environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StorageRoot => "VCSMIRROR_STORAGE_ROOT",
            Self::SshDir => "VCSMIRROR_SSH_DIR",
            Self::Database => "VCSMIRROR_DATABASE",
            Self::BeatMaxInterval => "VCSMIRROR_BEAT_MAX_INTERVAL",
            Self::WorkerConcurrency => "VCSMIRROR_WORKER_CONCURRENCY",
            Self::WorkerPollMs => "VCSMIRROR_WORKER_POLL_MS",
            Self::SoftTimeLimit => "VCSMIRROR_SOFT_TIME_LIMIT",
            Self::HardTimeLimit => "VCSMIRROR_HARD_TIME_LIMIT",
            Self::ResultExpires => "VCSMIRROR_RESULT_EXPIRES",
            Self::LockTimeout => "VCSMIRROR_LOCK_TIMEOUT",
            Self::DefaultQueue => "VCSMIRROR_DEFAULT_QUEUE",
            Self::HookBaseUrl => "VCSMIRROR_HOOK_BASE_URL",
        }
    }

    /// Settings key the variable overrides.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::StorageRoot => "storage_root",
            Self::SshDir => "ssh_dir",
            Self::Database => "database",
            Self::BeatMaxInterval => "beat.max_interval_secs",
            Self::WorkerConcurrency => "worker.concurrency",
            Self::WorkerPollMs => "worker.poll_interval_ms",
            Self::SoftTimeLimit => "worker.soft_time_limit_secs",
            Self::HardTimeLimit => "worker.hard_time_limit_secs",
            Self::ResultExpires => "worker.result_expires_secs",
            Self::LockTimeout => "worker.lock_timeout_secs",
            Self::DefaultQueue => "default_queue",
            Self::HookBaseUrl => "hook_base_url",
        }
    }

    const fn is_duration(self) -> bool {
        matches!(
            self,
            Self::BeatMaxInterval
                | Self::SoftTimeLimit
                | Self::HardTimeLimit
                | Self::ResultExpires
                | Self::LockTimeout
        )
    }
}

/// Variables read from a lookup, already parsed into a settings layer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    layer: SettingsFile,
    set: Vec<EnvVar>,
}

impl EnvConfig {
    /// Read the process environment.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read variables through `lookup`. Empty values count as unset.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        for var in EnvVar::ALL {
            let Some(raw) = lookup(var.as_str()).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            config.apply(var, raw.trim())?;
            config.set.push(var);
        }
        Ok(config)
    }

    fn apply(&mut self, var: EnvVar, raw: &str) -> Result<()> {
        let layer = &mut self.layer;
        match var {
            EnvVar::StorageRoot => layer.storage_root = Some(PathBuf::from(raw)),
            EnvVar::SshDir => layer.ssh_dir = Some(PathBuf::from(raw)),
            EnvVar::Database => layer.database = Some(PathBuf::from(raw)),
            EnvVar::DefaultQueue => layer.default_queue = Some(raw.to_string()),
            EnvVar::HookBaseUrl => layer.hook_base_url = Some(raw.to_string()),
            EnvVar::WorkerConcurrency => {
                layer.worker.concurrency = Some(raw.parse().map_err(|_| env_error(var, raw, "an integer"))?);
            }
            EnvVar::WorkerPollMs => {
                layer.worker.poll_interval_ms =
                    Some(raw.parse().map_err(|_| env_error(var, raw, "milliseconds"))?);
            }
            _ if var.is_duration() => {
                let secs = parse_duration_secs(raw).map_err(|_| env_error(var, raw, "a duration like 300 or 5m"))?;
                match var {
                    EnvVar::BeatMaxInterval => layer.beat.max_interval_secs = Some(secs),
                    EnvVar::SoftTimeLimit => layer.worker.soft_time_limit_secs = Some(secs),
                    EnvVar::HardTimeLimit => layer.worker.hard_time_limit_secs = Some(secs),
                    EnvVar::ResultExpires => layer.worker.result_expires_secs = Some(secs),
                    _ => layer.worker.lock_timeout_secs = Some(secs),
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The parsed layer.
    #[must_use]
    pub const fn layer(&self) -> &SettingsFile {
        &self.layer
    }

    /// Variables that were set, in documentation order.
    #[must_use]
    pub fn set_vars(&self) -> &[EnvVar] {
        &self.set
    }
}

fn env_error(var: EnvVar, raw: &str, expected: &str) -> ConfigError {
    ConfigError::EnvError {
        var: var.as_str().to_string(),
        message: format!("expected {expected}, got '{raw}'"),
    }
}

/// Parse duration string (e.g., "300", "5m", "1h").
///
/// # Errors
/// Returns error if the duration string is invalid.
pub fn parse_duration_secs(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }

    let num_end = s.chars().take_while(char::is_ascii_digit).count();
    if num_end == 0 {
        return Err(ConfigError::invalid_value(
            "duration",
            "invalid duration",
            "use format like '300' or '5m'",
        ));
    }

    let (num_str, unit) = s.split_at(num_end);
    let num: u64 = num_str
        .parse()
        .map_err(|_| ConfigError::invalid_value("duration", "invalid number", "use a whole number"))?;

    let multiplier: u64 = match unit.trim().to_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        unit => {
            return Err(ConfigError::invalid_value(
                "duration",
                format!("unknown unit: {unit}"),
                "use s, m, h, or d",
            ));
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| ConfigError::invalid_value("duration", "duration too large", "use a smaller value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use test_case::test_case;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test_case("300", 300 ; "bare seconds")]
    #[test_case("5m", 300 ; "minutes")]
    #[test_case("1h", 3600 ; "hours")]
    #[test_case("2 days", 172_800 ; "spelled unit")]
    fn durations(input: &str, expected: u64) {
        assert_eq!(parse_duration_secs(input).unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("m5" ; "unit first")]
    #[test_case("5w" ; "unknown unit")]
    fn bad_durations(input: &str) {
        assert!(parse_duration_secs(input).is_err());
    }

    #[test]
    fn variables_fill_the_layer() {
        let env = EnvConfig::from_lookup(lookup(&[
            ("VCSMIRROR_DATABASE", "/srv/m.sqlite3"),
            ("VCSMIRROR_WORKER_CONCURRENCY", "3"),
            ("VCSMIRROR_SOFT_TIME_LIMIT", "10m"),
            ("VCSMIRROR_HOOK_BASE_URL", " https://mirror.example.com "),
            ("VCSMIRROR_DEFAULT_QUEUE", ""),
        ]))
        .unwrap();

        let layer = env.layer();
        assert_eq!(layer.database, Some(PathBuf::from("/srv/m.sqlite3")));
        assert_eq!(layer.worker.concurrency, Some(3));
        assert_eq!(layer.worker.soft_time_limit_secs, Some(600));
        assert_eq!(layer.hook_base_url.as_deref(), Some("https://mirror.example.com"));
        assert_eq!(layer.default_queue, None);
        assert_eq!(
            env.set_vars(),
            &[EnvVar::Database, EnvVar::WorkerConcurrency, EnvVar::SoftTimeLimit, EnvVar::HookBaseUrl]
        );
    }

    #[test]
    fn malformed_number_names_the_variable() {
        let err = EnvConfig::from_lookup(lookup(&[("VCSMIRROR_WORKER_CONCURRENCY", "many")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot use VCSMIRROR_WORKER_CONCURRENCY: expected an integer, got 'many'"
        );
    }
}
