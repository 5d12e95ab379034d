//! Cron specification parsing.
//! Format: "SEC MIN HOUR DOM MON DOW [YEAR]" (6 or 7 fields).
//! Wildcards: *, ?, */N, ranges, lists, L, W, #
//! Example: "0 0 * * * ?" = every hour on the hour
//!
//! Parsing is delegated to the `cron` crate; this module only adds the error
//! mapping and the next-fire helpers the timer engine needs.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};

/// Parse and validate a cron specification.
pub fn parse(spec: &str) -> Result<::cron::Schedule> {
    let trimmed = spec.trim();
    let fields = trimmed.split_whitespace().count();
    if !(6..=7).contains(&fields) {
        return Err(SchedulerError::InvalidCronFormat {
            spec: spec.to_string(),
            reason: format!("expected 6 or 7 fields (SEC MIN HOUR DOM MON DOW [YEAR]), found {fields}"),
        });
    }
    ::cron::Schedule::from_str(trimmed).map_err(|e| SchedulerError::InvalidCronFormat {
        spec: spec.to_string(),
        reason: e.to_string(),
    })
}

/// Check a cron specification without keeping the parsed form.
pub fn validate(spec: &str) -> Result<()> {
    parse(spec).map(|_| ())
}

/// Next fire time strictly after `after`, if the schedule fires again at all.
pub fn next_fire_after(schedule: &::cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_every_hour() {
        let schedule = parse("0 0 * * * ?").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_fire_after(&schedule, after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time_with_year() {
        let schedule = parse("0 0 8 * * ? 2026").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_fire_after(&schedule, after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_every_15_seconds() {
        let schedule = parse("*/15 * * * * ?").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 2).unwrap();
        let next = next_fire_after(&schedule, after).unwrap();
        assert_eq!(next.second(), 15);
    }

    #[test]
    fn test_expired_year_never_fires() {
        let schedule = parse("0 0 8 * * ? 2020").unwrap();
        assert!(next_fire_after(&schedule, Utc::now()).is_none());
    }

    #[test]
    fn test_invalid_specs_echo_the_input() {
        for bad in ["bad", "0 8 * * *", "0 0 25 * * ?", "0 0 * * * ? 2026 extra"] {
            match validate(bad) {
                Err(SchedulerError::InvalidCronFormat { spec, .. }) => assert_eq!(spec, bad),
                other => panic!("expected InvalidCronFormat for '{bad}', got {other:?}"),
            }
        }
    }
}
