//! Cron expression parsing and evaluation.
//!
//! Expressions use the standard five fields,
//! `minute hour day-of-month month day-of-week`. Each field accepts `*`,
//! values, ranges, steps (`*/n`, `a-b/n`, `a/n`) and comma lists; months and
//! weekdays also accept three-letter names. A time matches when every field
//! matches.

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use vcsmirror_store::CrontabFields;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How far ahead [`CronSchedule::next_after`] searches.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

fn expand_macro(expr: &str) -> Option<&'static str> {
    match expr {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    names_start: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_start: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_start: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day of month",
    min: 1,
    max: 31,
    names: &[],
    names_start: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    names_start: 1,
};
// 7 is accepted as a second spelling of Sunday.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day of week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    names_start: 0,
};

impl FieldSpec {
    fn value(&self, raw: &str) -> std::result::Result<u32, String> {
        let lower = raw.to_ascii_lowercase();
        if let Some(pos) = self.names.iter().position(|n| *n == lower) {
            return Ok(self.names_start + pos as u32);
        }
        let value: u32 = raw
            .parse()
            .map_err(|_| format!("invalid {} value '{raw}'", self.name))?;
        if value < self.min || value > self.max {
            return Err(format!(
                "{} value {value} out of range {}-{}",
                self.name, self.min, self.max
            ));
        }
        Ok(value)
    }

    fn parse(&self, field: &str) -> std::result::Result<u64, String> {
        let mut bits = 0u64;
        for part in field.split(',') {
            if part.is_empty() {
                return Err(format!("empty {} list item", self.name));
            }
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("invalid {} step '{step}'", self.name))?;
                    if step == 0 {
                        return Err(format!("{} step must be positive", self.name));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (self.value(a)?, self.value(b)?);
                if a > b {
                    return Err(format!("{} range {a}-{b} is reversed", self.name));
                }
                (a, b)
            } else {
                let a = self.value(range)?;
                // `a/n` runs from `a` to the end of the field.
                (a, if step.is_some() { self.max } else { a })
            };

            let step = step.unwrap_or(1) as usize;
            for v in (start..=end).step_by(step) {
                bits |= 1 << v;
            }
        }
        if self.names.len() == 7 && bits & (1 << 7) != 0 {
            bits = (bits & !(1 << 7)) | 1;
        }
        Ok(bits)
    }
}

/// Split a user-supplied expression into its five fields.
///
/// Macros such as `@daily` are expanded, names are lowercased and every field
/// is validated. The returned fields are what gets stored.
///
/// # Errors
/// Returns [`SchedulerError::InvalidCron`] for malformed expressions.
pub fn parse_expression(expr: &str) -> Result<CrontabFields> {
    let trimmed = expr.trim();
    let expanded = expand_macro(&trimmed.to_ascii_lowercase()).unwrap_or(trimmed);
    let parts: Vec<&str> = expanded.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = parts.as_slice() else {
        return Err(SchedulerError::invalid_cron(
            expr,
            format!("expected 5 fields, got {}", parts.len()),
        ));
    };
    let fields = CrontabFields {
        minute: minute.to_ascii_lowercase(),
        hour: hour.to_ascii_lowercase(),
        day_of_month: dom.to_ascii_lowercase(),
        month_of_year: month.to_ascii_lowercase(),
        day_of_week: dow.to_ascii_lowercase(),
    };
    CronSchedule::from_fields(&fields).map_err(|e| match e {
        SchedulerError::InvalidCron { reason, .. } => SchedulerError::invalid_cron(expr, reason),
        other => other,
    })?;
    Ok(fields)
}

/// A parsed crontab, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    minute: u64,
    hour: u64,
    day_of_month: u64,
    month: u64,
    day_of_week: u64,
}

impl CronSchedule {
    /// Parse an expression.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidCron`] for malformed expressions.
    pub fn parse(expr: &str) -> Result<Self> {
        Self::from_fields(&parse_expression(expr)?)
    }

    /// Build from stored fields.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidCron`] if a field is malformed.
    pub fn from_fields(fields: &CrontabFields) -> Result<Self> {
        let err = |reason: String| SchedulerError::invalid_cron(fields.to_string(), reason);
        Ok(Self {
            minute: MINUTE.parse(&fields.minute).map_err(err)?,
            hour: HOUR.parse(&fields.hour).map_err(err)?,
            day_of_month: DAY_OF_MONTH.parse(&fields.day_of_month).map_err(err)?,
            month: MONTH.parse(&fields.month_of_year).map_err(err)?,
            day_of_week: DAY_OF_WEEK.parse(&fields.day_of_week).map_err(err)?,
        })
    }

    const fn has(bits: u64, value: u32) -> bool {
        bits & (1 << value) != 0
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        Self::has(self.month, date.month())
            && Self::has(self.day_of_month, date.day())
            && Self::has(self.day_of_week, date.weekday().num_days_from_sunday())
    }

    /// Whether the minute containing `time` matches.
    #[must_use]
    pub fn matches(&self, time: &DateTime<Utc>) -> bool {
        self.day_matches(time.date_naive())
            && Self::has(self.hour, time.hour())
            && Self::has(self.minute, time.minute())
    }

    /// First matching minute strictly after `after`.
    ///
    /// Returns `None` for schedules that never fire, such as February 30th.
    #[must_use]
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(SEARCH_HORIZON_DAYS);
        let mut t = start;

        while t <= limit {
            let date = t.date_naive();
            if !Self::has(self.month, date.month()) {
                let (y, m) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !self.day_matches(date) {
                t = date.succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !Self::has(self.hour, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !Self::has(self.minute, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;
    use vcsmirror_test_utils::proptest_strategies::cron_expression_strategy;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test_case("0 4 * * *", "0", "4", "*", "*", "*" ; "daily at four")]
    #[test_case("@daily", "0", "0", "*", "*", "*" ; "daily macro")]
    #[test_case("@HOURLY", "0", "*", "*", "*", "*" ; "macro case insensitive")]
    #[test_case("@weekly", "0", "0", "*", "*", "0" ; "weekly macro")]
    #[test_case("  */15 9-17 * JAN-mar Mon-Fri ", "*/15", "9-17", "*", "jan-mar", "mon-fri" ; "names lowercased")]
    fn splits_fields(expr: &str, minute: &str, hour: &str, dom: &str, month: &str, dow: &str) {
        let fields = parse_expression(expr).unwrap();
        assert_eq!(
            fields,
            CrontabFields {
                minute: minute.into(),
                hour: hour.into(),
                day_of_month: dom.into(),
                month_of_year: month.into(),
                day_of_week: dow.into(),
            }
        );
    }

    #[test_case("" ; "empty")]
    #[test_case("* * * *" ; "four fields")]
    #[test_case("* * * * * *" ; "six fields")]
    #[test_case("60 * * * *" ; "minute out of range")]
    #[test_case("* 24 * * *" ; "hour out of range")]
    #[test_case("* * 0 * *" ; "day zero")]
    #[test_case("* * * 13 *" ; "month thirteen")]
    #[test_case("*/0 * * * *" ; "zero step")]
    #[test_case("5-1 * * * *" ; "reversed range")]
    #[test_case("1,,2 * * * *" ; "empty list item")]
    #[test_case("@fortnightly" ; "unknown macro")]
    fn rejects(expr: &str) {
        let err = parse_expression(expr).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }), "{err}");
    }

    #[test]
    fn sunday_has_two_spellings() {
        let a = CronSchedule::parse("0 0 * * 0").unwrap();
        let b = CronSchedule::parse("0 0 * * 7").unwrap();
        let c = CronSchedule::parse("0 0 * * sun").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn matches_requires_every_field() {
        let cron = CronSchedule::parse("30 4 1 * mon").unwrap();
        // 2026-06-01 is a Monday.
        assert!(cron.matches(&at(2026, 6, 1, 4, 30)));
        assert!(!cron.matches(&at(2026, 6, 8, 4, 30)));
        assert!(!cron.matches(&at(2026, 6, 1, 4, 31)));
    }

    #[test]
    fn next_after_walks_forward() {
        let cron = CronSchedule::parse("0 4 * * *").unwrap();
        assert_eq!(
            cron.next_after(&at(2026, 3, 10, 3, 59)),
            Some(at(2026, 3, 10, 4, 0))
        );
        assert_eq!(
            cron.next_after(&at(2026, 3, 10, 4, 0)),
            Some(at(2026, 3, 11, 4, 0))
        );
        assert_eq!(
            cron.next_after(&at(2026, 12, 31, 23, 0)),
            Some(at(2027, 1, 1, 4, 0))
        );
    }

    #[test]
    fn step_ranges() {
        let cron = CronSchedule::parse("10-40/15 * * * *").unwrap();
        assert_eq!(cron.next_after(&at(2026, 1, 1, 0, 0)), Some(at(2026, 1, 1, 0, 10)));
        assert_eq!(cron.next_after(&at(2026, 1, 1, 0, 10)), Some(at(2026, 1, 1, 0, 25)));
        assert_eq!(cron.next_after(&at(2026, 1, 1, 0, 40)), Some(at(2026, 1, 1, 1, 10)));
    }

    #[test]
    fn impossible_dates_never_fire() {
        let cron = CronSchedule::parse("0 0 30 feb *").unwrap();
        assert_eq!(cron.next_after(&at(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn leap_day() {
        let cron = CronSchedule::parse("0 12 29 2 *").unwrap();
        assert_eq!(
            cron.next_after(&at(2026, 3, 1, 0, 0)),
            Some(at(2028, 2, 29, 12, 0))
        );
    }

    proptest! {
        #[test]
        fn generated_expressions_parse_and_fire(expr in cron_expression_strategy()) {
            let cron = CronSchedule::parse(&expr).unwrap();
            let start = at(2026, 1, 1, 0, 0);
            if let Some(next) = cron.next_after(&start) {
                prop_assert!(next > start);
                prop_assert!(cron.matches(&next));
                prop_assert_eq!(next.second(), 0);
            }
        }
    }
}
