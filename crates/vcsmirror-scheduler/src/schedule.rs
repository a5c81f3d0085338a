//! Due-time evaluation for interval and crontab schedules.

use crate::cron::CronSchedule;
use chrono::{DateTime, Duration, Utc};

/// Longest the scheduler sleeps between ticks, and the re-check delay of
/// disabled entries.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::seconds(5);

/// Re-check delay for entries that will never fire again.
pub const NEVER_CHECK_TIMEOUT: Duration = Duration::seconds(100_000_000);

/// Shortest delay before an entry is looked at again.
pub const MIN_RECHECK: Duration = Duration::milliseconds(100);

/// Whether an entry should run now, and when to look at it next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueState {
    /// Run now.
    pub is_due: bool,
    /// Delay until the next check.
    pub next_check: Duration,
}

impl DueState {
    /// Due now, check again after `next_check`.
    #[must_use]
    pub const fn due(next_check: Duration) -> Self {
        Self {
            is_due: true,
            next_check,
        }
    }

    /// Not due, check again after `next_check`.
    #[must_use]
    pub const fn not_due(next_check: Duration) -> Self {
        Self {
            is_due: false,
            next_check,
        }
    }
}

/// When a periodic task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every fixed period, counted from the last run.
    Interval(Duration),
    /// On matching calendar minutes.
    Crontab(CronSchedule),
}

impl Schedule {
    /// Evaluate against the last run and the current time.
    ///
    /// An interval is due once `last_run_at + period` has passed. A crontab
    /// is due once its first match after `last_run_at` has passed; the next
    /// check is then its first match after `now`.
    #[must_use]
    pub fn is_due(&self, last_run_at: DateTime<Utc>, now: DateTime<Utc>) -> DueState {
        match self {
            Self::Interval(every) => {
                let every = (*every).max(Duration::zero());
                match last_run_at.checked_add_signed(every) {
                    Some(next) if next <= now => DueState::due(every),
                    Some(next) => DueState::not_due(next - now),
                    None => DueState::not_due(NEVER_CHECK_TIMEOUT),
                }
            }
            Self::Crontab(cron) => {
                let Some(next) = cron.next_after(&last_run_at) else {
                    return DueState::not_due(NEVER_CHECK_TIMEOUT);
                };
                if next <= now {
                    let next_check = cron
                        .next_after(&now)
                        .map_or(NEVER_CHECK_TIMEOUT, |after| after - now);
                    DueState::due(next_check)
                } else {
                    DueState::not_due(next - now)
                }
            }
        }
    }
}
