//! Validation of merged settings.

use crate::error::{ConfigError, Result};
use crate::types::Settings;
use url::Url;

/// Upper bound for `worker.concurrency`.
pub const MAX_CONCURRENCY: usize = 1024;

/// Every problem with `settings`, in key order.
#[must_use]
pub fn issues(settings: &Settings) -> Vec<ConfigError> {
    let mut issues = Vec::new();

    if settings.default_queue.trim().is_empty() {
        issues.push(ConfigError::invalid_value(
            "default_queue",
            "must not be empty",
            "use the default 'mirrors'",
        ));
    }

    if let Some(raw) = &settings.hook_base_url {
        let valid = Url::parse(raw).is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
        if !valid {
            issues.push(ConfigError::InvalidUrl {
                field: "hook_base_url".into(),
                url: raw.clone(),
            });
        }
    }

    if settings.beat.max_interval_secs == 0 {
        issues.push(ConfigError::invalid_value(
            "beat.max_interval_secs",
            "must be greater than zero",
            "the scheduler needs a positive upper bound on its sleep; 5 is the default",
        ));
    }

    let worker = &settings.worker;
    if !(1..=MAX_CONCURRENCY).contains(&worker.concurrency) {
        issues.push(ConfigError::out_of_range(
            "worker.concurrency",
            worker.concurrency,
            1,
            MAX_CONCURRENCY,
        ));
    }
    if worker.poll_interval_ms == 0 {
        issues.push(ConfigError::invalid_value(
            "worker.poll_interval_ms",
            "must be greater than zero",
            "use the default 500",
        ));
    }
    if worker.soft_time_limit_secs >= worker.hard_time_limit_secs {
        issues.push(ConfigError::invalid_value(
            "worker.soft_time_limit_secs",
            format!(
                "must be below the hard limit of {}s, got {}s",
                worker.hard_time_limit_secs, worker.soft_time_limit_secs
            ),
            "lower worker.soft_time_limit_secs or raise worker.hard_time_limit_secs",
        ));
    }

    issues
}

/// Check merged settings.
///
/// # Errors
/// Returns [`ConfigError::ValidationFailed`] carrying every problem found.
pub fn validate(settings: &Settings) -> Result<()> {
    let errors = issues(settings);
    if errors.is_empty() {
        return Ok(());
    }
    Err(ConfigError::ValidationFailed {
        count: errors.len(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.worker.concurrency = 4;
        settings
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&settings()).is_ok());
    }

    #[test_case(|s: &mut Settings| s.worker.concurrency = 0, "worker.concurrency" ; "zero concurrency")]
    #[test_case(|s: &mut Settings| s.worker.soft_time_limit_secs = 1800, "worker.soft_time_limit_secs" ; "soft equals hard")]
    #[test_case(|s: &mut Settings| s.beat.max_interval_secs = 0, "beat.max_interval_secs" ; "zero max interval")]
    #[test_case(|s: &mut Settings| s.hook_base_url = Some("ftp://mirror.example.com".into()), "hook_base_url" ; "non http hook")]
    #[test_case(|s: &mut Settings| s.hook_base_url = Some("not a url".into()), "hook_base_url" ; "unparsable hook")]
    fn rejects(mutate: fn(&mut Settings), field: &str) {
        let mut settings = settings();
        mutate(&mut settings);
        let found = issues(&settings);
        assert_eq!(found.len(), 1, "{found:?}");
        assert!(found[0].to_string().contains(field), "{}", found[0]);
    }

    #[test]
    fn all_problems_are_reported_together() {
        let mut settings = settings();
        settings.worker.concurrency = 0;
        settings.beat.max_interval_secs = 0;
        let err = validate(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { count: 2, .. }));
    }
}
