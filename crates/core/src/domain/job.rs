// Job Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::schedule::NormalizedSchedule;

/// Job ID (UUID v4)
pub type JobId = String;

/// Maximum accepted length for a caller-supplied identifier
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Job status
///
/// Lifecycle:
/// - `active -> paused` (pause)
/// - `active -> cancelled` (cancel)
/// - `active -> completed` (one-shot fired)
/// - `paused -> active` (resume)
/// - `paused -> cancelled` (cancel)
///
/// `cancelled` and `completed` are terminal; terminal jobs are only removed
/// by retention cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Cancelled | JobStatus::Completed)
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, to),
            (Active, Paused)
                | (Active, Cancelled)
                | (Active, Completed)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(JobStatus::Active),
            "paused" => Ok(JobStatus::Paused),
            "cancelled" => Ok(JobStatus::Cancelled),
            "completed" => Ok(JobStatus::Completed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Job Entity
///
/// Exactly one of `cron_expression` (recurring) and `specific_time`
/// (one-shot) is set. All instants are integer milliseconds since the Unix
/// epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub identifier: String,
    pub cron_expression: Option<String>,
    pub specific_time: Option<i64>,
    pub status: JobStatus,
    pub next_run: i64,
    pub last_run: Option<i64>,
    pub run_count: i64,
    pub created_at: i64, // epoch ms
    pub updated_at: i64,
}

impl Job {
    /// Create a new active job from a normalized schedule.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `identifier` - Caller-supplied unique identifier
    /// * `schedule` - Normalized schedule input
    /// * `now_millis` - Creation timestamp (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        identifier: impl Into<String>,
        schedule: &NormalizedSchedule,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            identifier: identifier.into(),
            cron_expression: schedule.cron_expression.clone(),
            specific_time: schedule.specific_time,
            status: JobStatus::Active,
            next_run: schedule.next_run,
            last_run: None,
            run_count: 0,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }
}

/// Validate a caller-supplied identifier before any write.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(DomainError::ValidationError(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(DomainError::ValidationError(format!(
            "Identifier too long (max {} chars, got {})",
            MAX_IDENTIFIER_LEN,
            identifier.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn one_shot_schedule(at: i64) -> NormalizedSchedule {
        NormalizedSchedule {
            cron_expression: None,
            specific_time: Some(at),
            next_run: at,
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Active,
            JobStatus::Paused,
            JobStatus::Cancelled,
            JobStatus::Completed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::from_str("ACTIVE").is_err());
        assert!(JobStatus::from_str("done").is_err());
    }

    #[test]
    fn transition_matrix() {
        use JobStatus::*;
        assert!(Active.can_transition_to(Paused));
        assert!(Active.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Completed));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Cancelled));

        assert!(!Paused.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Active.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn new_job_starts_active_with_zero_runs() {
        let job = Job::new("id-1", "report", &one_shot_schedule(5_000), 1_000);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.run_count, 0);
        assert_eq!(job.last_run, None);
        assert_eq!(job.next_run, 5_000);
        assert_eq!(job.created_at, 1_000);
        assert_eq!(job.updated_at, 1_000);
        assert!(!job.is_recurring());
    }

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("jobs.daily-report").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }
}
