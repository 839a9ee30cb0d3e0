// Schedule Input Parsing
//
// A job is scheduled from one of three input shapes: a cron expression, an
// absolute epoch-millisecond instant, or a wall-clock datetime. All three
// normalize to the same internal pair (cron_expression | specific_time,
// next_run) before anything is persisted.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{AppError, Result};

/// Schedule input accepted by `Scheduler::schedule`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Recurring schedule: standard 5-field cron, or 6-/7-field with a
    /// leading seconds field. Ranges, lists, steps, and weekday syntax pass
    /// through to the parser unchanged.
    Cron(String),
    /// One-shot firing at an absolute instant (ms since epoch).
    At(i64),
    /// One-shot firing at a wall-clock datetime.
    AtDateTime(DateTime<Utc>),
}

impl From<&str> for ScheduleSpec {
    fn from(expression: &str) -> Self {
        ScheduleSpec::Cron(expression.to_string())
    }
}

impl From<String> for ScheduleSpec {
    fn from(expression: String) -> Self {
        ScheduleSpec::Cron(expression)
    }
}

impl From<i64> for ScheduleSpec {
    fn from(instant_millis: i64) -> Self {
        ScheduleSpec::At(instant_millis)
    }
}

impl From<DateTime<Utc>> for ScheduleSpec {
    fn from(datetime: DateTime<Utc>) -> Self {
        ScheduleSpec::AtDateTime(datetime)
    }
}

/// Normalized schedule: exactly one of `cron_expression` and
/// `specific_time` is set, and `next_run` is the first firing instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSchedule {
    pub cron_expression: Option<String>,
    pub specific_time: Option<i64>,
    pub next_run: i64,
}

impl ScheduleSpec {
    /// Normalize the input against the current instant.
    ///
    /// Fails fast (`InvalidCron`, `TimeInPast`) before any write; exclusivity
    /// of the output pair holds by construction.
    pub fn normalize(&self, now_millis: i64) -> Result<NormalizedSchedule> {
        match self {
            ScheduleSpec::Cron(expression) => {
                let next_run = next_occurrence(expression, now_millis)?;
                Ok(NormalizedSchedule {
                    cron_expression: Some(expression.trim().to_string()),
                    specific_time: None,
                    next_run,
                })
            }
            ScheduleSpec::At(instant) => normalize_instant(*instant, now_millis),
            ScheduleSpec::AtDateTime(datetime) => {
                normalize_instant(datetime.timestamp_millis(), now_millis)
            }
        }
    }
}

fn normalize_instant(specific_time: i64, now_millis: i64) -> Result<NormalizedSchedule> {
    if specific_time <= now_millis {
        return Err(AppError::TimeInPast {
            specific_time,
            now: now_millis,
        });
    }
    Ok(NormalizedSchedule {
        cron_expression: None,
        specific_time: Some(specific_time),
        next_run: specific_time,
    })
}

/// Compute the first firing instant strictly after `after_millis`.
pub fn next_occurrence(expression: &str, after_millis: i64) -> Result<i64> {
    let schedule = parse_expression(expression)?;
    let anchor = DateTime::<Utc>::from_timestamp_millis(after_millis)
        .ok_or_else(|| AppError::Internal(format!("Timestamp out of range: {after_millis}")))?;
    schedule
        .after(&anchor)
        .next()
        .map(|occurrence| occurrence.timestamp_millis())
        .ok_or_else(|| AppError::InvalidCron {
            expression: expression.to_string(),
            reason: "no upcoming occurrence".to_string(),
        })
}

fn parse_expression(expression: &str) -> Result<Schedule> {
    Schedule::from_str(&with_seconds_field(expression)).map_err(|e| AppError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// The parser requires a seconds field; standard 5-field Unix cron gains a
/// leading `0` so `*/5 * * * *` means "at second zero, every 5 minutes".
fn with_seconds_field(expression: &str) -> Cow<'_, str> {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {trimmed}"))
    } else {
        Cow::Borrowed(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2023-11-14T22:13:20Z
    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn five_field_expression_gains_seconds() {
        assert_eq!(with_seconds_field("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(with_seconds_field("  0 9 * * 1-5  "), "0 0 9 * * 1-5");
        assert_eq!(with_seconds_field("*/2 * * * * *"), "*/2 * * * * *");
    }

    #[test]
    fn cron_next_run_is_strictly_after_now() {
        let normalized = ScheduleSpec::from("*/5 * * * *").normalize(NOW).unwrap();
        assert!(normalized.next_run > NOW);
        assert_eq!(normalized.cron_expression.as_deref(), Some("*/5 * * * *"));
        assert_eq!(normalized.specific_time, None);

        // every-second cadence: the next occurrence is within one second
        let next = next_occurrence("* * * * * *", NOW).unwrap();
        assert!(next > NOW && next <= NOW + 1_000);
    }

    #[test]
    fn next_occurrence_advances_past_each_firing() {
        let first = next_occurrence("*/5 * * * *", NOW).unwrap();
        let second = next_occurrence("*/5 * * * *", first).unwrap();
        assert!(second > first);
        assert_eq!(second - first, 5 * 60 * 1_000);
    }

    #[test]
    fn invalid_expression_is_rejected() {
        let err = ScheduleSpec::from("not a cron").normalize(NOW).unwrap_err();
        assert!(matches!(err, AppError::InvalidCron { .. }));

        let err = ScheduleSpec::from("99 * * * *").normalize(NOW).unwrap_err();
        assert!(matches!(err, AppError::InvalidCron { .. }));
    }

    #[test]
    fn absolute_instant_must_be_in_the_future() {
        let normalized = ScheduleSpec::At(NOW + 1).normalize(NOW).unwrap();
        assert_eq!(normalized.specific_time, Some(NOW + 1));
        assert_eq!(normalized.next_run, NOW + 1);
        assert_eq!(normalized.cron_expression, None);

        assert!(matches!(
            ScheduleSpec::At(NOW).normalize(NOW),
            Err(AppError::TimeInPast { .. })
        ));
        assert!(matches!(
            ScheduleSpec::At(NOW - 1).normalize(NOW),
            Err(AppError::TimeInPast { .. })
        ));
    }

    #[test]
    fn datetime_input_normalizes_to_its_instant() {
        let at = DateTime::<Utc>::from_timestamp_millis(NOW + 60_000).unwrap();
        let normalized = ScheduleSpec::from(at).normalize(NOW).unwrap();
        assert_eq!(normalized.specific_time, Some(NOW + 60_000));
        assert_eq!(normalized.next_run, NOW + 60_000);
    }
}
