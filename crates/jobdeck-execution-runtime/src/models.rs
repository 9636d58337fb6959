//! Execution-attempt domain models.
//!
//! An [ExecutionRecord] is written once when an attempt begins and updated
//! once when it ends. Every derived value (status, latency, display) is
//! computed from these facts by the sibling modules; nothing here mutates a
//! persisted row.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use jobdeck_kernel::identity::{ActiveJobId, ExecutionId};
use jobdeck_kernel::status::{resolve_status, ExecutionStatus, StatusInput};

/// Key in `serialized_params` counting prior attempts (zero-based).
pub const EXECUTIONS_PARAM: &str = "executions";

/// Classification of the error recorded on an attempt.
///
/// Codes match the integer values stored in the `error_event` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorEvent {
    Interrupted,
    Unhandled,
    Handled,
    Retried,
    RetryStopped,
    Discarded,
}

impl ErrorEvent {
    pub fn code(&self) -> i64 {
        match self {
            ErrorEvent::Interrupted => 0,
            ErrorEvent::Unhandled => 1,
            ErrorEvent::Handled => 2,
            ErrorEvent::Retried => 3,
            ErrorEvent::RetryStopped => 4,
            ErrorEvent::Discarded => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ErrorEvent::Interrupted),
            1 => Some(ErrorEvent::Unhandled),
            2 => Some(ErrorEvent::Handled),
            3 => Some(ErrorEvent::Retried),
            4 => Some(ErrorEvent::RetryStopped),
            5 => Some(ErrorEvent::Discarded),
            _ => None,
        }
    }
}

/// The parts of the owning job an attempt needs to resolve its status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobSummary {
    pub active_job_id: ActiveJobId,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSummary {
    pub fn new(active_job_id: impl Into<ActiveJobId>) -> Self {
        Self {
            active_job_id: active_job_id.into(),
            finished_at: None,
        }
    }

    pub fn with_finished_at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = Some(finished_at);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// One physical execution attempt of a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub active_job_id: ActiveJobId,
    /// When the row was written; doubles as the attempt's start time.
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// `None` while the attempt is in progress (or crashed before cleanup).
    pub finished_at: Option<DateTime<Utc>>,
    pub serialized_params: Map<String, Value>,
    pub error: Option<String>,
    pub error_backtrace: Option<Vec<String>>,
    pub error_event: Option<ErrorEvent>,
    /// Monotonic runtime, only written by stores that carry the `duration` column.
    #[serde(default, with = "duration_millis")]
    pub duration: Option<Duration>,
}

impl ExecutionRecord {
    pub fn new(
        id: ExecutionId,
        active_job_id: impl Into<ActiveJobId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            active_job_id: active_job_id.into(),
            created_at,
            scheduled_at: None,
            finished_at: None,
            serialized_params: Map::new(),
            error: None,
            error_backtrace: None,
            error_event: None,
            duration: None,
        }
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_finished_at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = Some(finished_at);
        self
    }

    pub fn with_serialized_params(mut self, params: Map<String, Value>) -> Self {
        self.serialized_params = params;
        self
    }

    pub fn with_executions(mut self, executions: u64) -> Self {
        self.serialized_params
            .insert(EXECUTIONS_PARAM.to_string(), Value::from(executions));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_error_backtrace(mut self, frames: Vec<String>) -> Self {
        self.error_backtrace = Some(frames);
        self
    }

    pub fn with_error_event(mut self, event: ErrorEvent) -> Self {
        self.error_event = Some(event);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// 1-based attempt ordinal. A missing or non-integer `executions`
    /// counter counts as zero prior attempts.
    pub fn number(&self) -> u64 {
        self.serialized_params
            .get(EXECUTIONS_PARAM)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .saturating_add(1)
    }

    /// Start of the attempt. Rows carry no separate start column.
    pub fn performed_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// An error counts only when it has visible content.
    pub fn has_error(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|error| !error.trim().is_empty())
    }

    pub fn status_input(&self, job: &JobSummary) -> StatusInput {
        StatusInput {
            finished_at: self.finished_at,
            has_error: self.has_error(),
            job_finished_at: job.finished_at,
        }
    }

    pub fn status(&self, job: &JobSummary) -> ExecutionStatus {
        resolve_status(self.status_input(job))
    }
}

/// A job together with all of its attempts, oldest first.
#[derive(Clone, Debug, PartialEq)]
pub struct JobExecutions {
    pub job: JobSummary,
    pub executions: Vec<ExecutionRecord>,
}

impl JobExecutions {
    pub fn finished(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.executions.iter().filter(|record| record.is_finished())
    }

    pub fn latest(&self) -> Option<&ExecutionRecord> {
        self.executions.last()
    }
}

mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => s.serialize_some(&duration.num_milliseconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(Duration::milliseconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid ts")
    }

    #[test]
    fn number_is_prior_executions_plus_one() {
        let record = ExecutionRecord::new(1, "job-1", t0());
        assert_eq!(record.number(), 1);
        assert_eq!(record.clone().with_executions(0).number(), 1);
        assert_eq!(record.with_executions(4).number(), 5);
    }

    #[test]
    fn number_ignores_malformed_counter() {
        let mut params = Map::new();
        params.insert(EXECUTIONS_PARAM.to_string(), json!("three"));
        let record = ExecutionRecord::new(1, "job-1", t0()).with_serialized_params(params);
        assert_eq!(record.number(), 1);

        let mut params = Map::new();
        params.insert(EXECUTIONS_PARAM.to_string(), json!(-2));
        let record = ExecutionRecord::new(1, "job-1", t0()).with_serialized_params(params);
        assert_eq!(record.number(), 1);
    }

    #[test]
    fn blank_error_does_not_count() {
        let record = ExecutionRecord::new(1, "job-1", t0()).with_error("   ");
        assert!(!record.has_error());
        assert!(ExecutionRecord::new(1, "job-1", t0())
            .with_error("RuntimeError: boom")
            .has_error());
    }

    #[test]
    fn status_uses_owning_job() {
        let record = ExecutionRecord::new(1, "job-1", t0())
            .with_finished_at(t0() + Duration::seconds(3))
            .with_error("RuntimeError: boom");
        let live = JobSummary::new("job-1");
        let done = JobSummary::new("job-1").with_finished_at(t0() + Duration::seconds(4));
        assert_eq!(record.status(&live), ExecutionStatus::Retried);
        assert_eq!(record.status(&done), ExecutionStatus::Discarded);
    }

    #[test]
    fn error_event_codes_are_stable() {
        for code in 0..=5 {
            let event = ErrorEvent::from_code(code).expect("known code");
            assert_eq!(event.code(), code);
        }
        assert_eq!(ErrorEvent::from_code(6), None);
        assert_eq!(ErrorEvent::from_code(-1), None);
    }

    #[test]
    fn duration_serializes_as_millis() {
        let record =
            ExecutionRecord::new(7, "job-1", t0()).with_duration(Duration::milliseconds(1500));
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["duration"], json!(1500));

        let back: ExecutionRecord = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.duration, Some(Duration::milliseconds(1500)));
    }
}
