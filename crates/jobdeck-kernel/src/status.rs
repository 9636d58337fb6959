//! Lifecycle status of one execution attempt.
//!
//! Status is derived, never stored. It is a pure function of three facts:
//! whether the attempt finished, whether it recorded an error, and whether the
//! owning job has concluded. Each fact only ever moves from absent to present,
//! so a resolved status never reverts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One of the four states an attempt can be observed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Retried,
    Discarded,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Retried => "retried",
            ExecutionStatus::Discarded => "discarded",
        }
    }

    /// True once the attempt itself has ended, whatever the outcome.
    pub fn is_finished(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only inputs status resolution looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusInput {
    pub finished_at: Option<DateTime<Utc>>,
    pub has_error: bool,
    pub job_finished_at: Option<DateTime<Utc>>,
}

/// Resolve the status of an attempt. First match wins:
/// unfinished is `Running`; an error on a concluded job is `Discarded`;
/// an error while the job is still live is `Retried`; otherwise `Succeeded`.
pub fn resolve_status(input: StatusInput) -> ExecutionStatus {
    if input.finished_at.is_none() {
        return ExecutionStatus::Running;
    }
    match (input.has_error, input.job_finished_at.is_some()) {
        (true, true) => ExecutionStatus::Discarded,
        (true, false) => ExecutionStatus::Retried,
        (false, _) => ExecutionStatus::Succeeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single()
    }

    #[test]
    fn unfinished_attempt_is_running_even_with_error() {
        for has_error in [false, true] {
            for job_finished_at in [None, at(5)] {
                let status = resolve_status(StatusInput {
                    finished_at: None,
                    has_error,
                    job_finished_at,
                });
                assert_eq!(status, ExecutionStatus::Running);
            }
        }
    }

    #[test]
    fn failed_attempt_on_finished_job_is_discarded() {
        let status = resolve_status(StatusInput {
            finished_at: at(1),
            has_error: true,
            job_finished_at: at(2),
        });
        assert_eq!(status, ExecutionStatus::Discarded);
    }

    #[test]
    fn failed_attempt_on_live_job_is_retried() {
        let status = resolve_status(StatusInput {
            finished_at: at(1),
            has_error: true,
            job_finished_at: None,
        });
        assert_eq!(status, ExecutionStatus::Retried);
    }

    #[test]
    fn clean_finish_is_succeeded_regardless_of_job() {
        for job_finished_at in [None, at(3)] {
            let status = resolve_status(StatusInput {
                finished_at: at(1),
                has_error: false,
                job_finished_at,
            });
            assert_eq!(status, ExecutionStatus::Succeeded);
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::Discarded).expect("serialize");
        assert_eq!(json, "\"discarded\"");
        assert_eq!(ExecutionStatus::Retried.to_string(), "retried");
        assert!(!ExecutionStatus::Running.is_finished());
        assert!(ExecutionStatus::Succeeded.is_finished());
    }
}
