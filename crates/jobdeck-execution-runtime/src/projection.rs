//! Display-ready projections of execution attempts for the dashboard.
//!
//! [ExecutionProjector] composes status, latency and error projection over an
//! already-loaded record. It never writes back; projecting the same record
//! twice with the same `now` yields the same view.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use jobdeck_kernel::identity::{ActiveJobId, ExecutionId};
use jobdeck_kernel::status::ExecutionStatus;

use crate::capabilities::SchemaCapabilities;
use crate::error_events::{error_event, filtered_backtrace, BacktraceCleaner, ErrorSummary};
use crate::latency::{last_status_at, measure_runtime, queue_latency};
use crate::models::{ErrorEvent, ExecutionRecord, JobExecutions, JobSummary};

/// Synthetic key carrying the record's own attributes in the display params.
pub const EXECUTION_SNAPSHOT_KEY: &str = "_execution_snapshot";

/// `serialized_params` plus a snapshot of every other record attribute under
/// [EXECUTION_SNAPSHOT_KEY]. The snapshot leaves out `serialized_params`
/// itself so the params are not embedded twice.
pub fn display_serialized_params(record: &ExecutionRecord) -> Map<String, Value> {
    let mut snapshot = match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(err) => {
            log::debug!("execution {} snapshot not serializable: {}", record.id, err);
            Map::new()
        }
    };
    snapshot.remove("serialized_params");

    let mut params = record.serialized_params.clone();
    params.insert(EXECUTION_SNAPSHOT_KEY.to_string(), Value::Object(snapshot));
    params
}

/// Everything the dashboard renders for one attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionView {
    pub id: ExecutionId,
    pub active_job_id: ActiveJobId,
    pub number: u64,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_status_at: DateTime<Utc>,
    pub queue_latency_ms: Option<i64>,
    /// Absent means "not available yet", which is distinct from zero.
    pub runtime_latency_ms: Option<i64>,
    /// True when `runtime_latency_ms` is elapsed time of an unfinished
    /// attempt rather than a final runtime.
    pub runtime_in_progress: bool,
    pub error: Option<String>,
    pub error_summary: Option<ErrorSummary>,
    pub error_event: Option<ErrorEvent>,
    pub backtrace: Vec<String>,
    pub serialized_params: Map<String, Value>,
}

/// A job with every attempt projected, as shown on the job detail page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobDetailView {
    pub job: JobSummary,
    pub capabilities: SchemaCapabilities,
    pub executions: Vec<ExecutionView>,
}

/// Projects records using a fixed capability set and backtrace cleaner.
pub struct ExecutionProjector<B: BacktraceCleaner> {
    capabilities: SchemaCapabilities,
    cleaner: B,
}

impl<B: BacktraceCleaner> ExecutionProjector<B> {
    pub fn new(capabilities: SchemaCapabilities, cleaner: B) -> Self {
        Self {
            capabilities,
            cleaner,
        }
    }

    pub fn capabilities(&self) -> SchemaCapabilities {
        self.capabilities
    }

    pub fn project(
        &self,
        record: &ExecutionRecord,
        job: &JobSummary,
        now: DateTime<Utc>,
    ) -> ExecutionView {
        let runtime = measure_runtime(record, self.capabilities, now);
        ExecutionView {
            id: record.id,
            active_job_id: record.active_job_id.clone(),
            number: record.number(),
            status: record.status(job),
            created_at: record.created_at,
            scheduled_at: record.scheduled_at,
            finished_at: record.finished_at,
            last_status_at: last_status_at(record),
            queue_latency_ms: queue_latency(record).map(|d| d.num_milliseconds()),
            runtime_latency_ms: runtime.map(|r| r.duration().num_milliseconds()),
            runtime_in_progress: runtime.is_some_and(|r| r.is_in_progress()),
            error: record.error.clone(),
            error_summary: ErrorSummary::from_record(record),
            error_event: error_event(record, self.capabilities),
            backtrace: filtered_backtrace(record, &self.cleaner),
            serialized_params: display_serialized_params(record),
        }
    }

    /// Views for every attempt of a job, in stored (oldest-first) order.
    pub fn project_job(&self, job: &JobExecutions, now: DateTime<Utc>) -> Vec<ExecutionView> {
        job.executions
            .iter()
            .map(|record| self.project(record, &job.job, now))
            .collect()
    }

    pub fn job_detail(&self, job: &JobExecutions, now: DateTime<Utc>) -> JobDetailView {
        JobDetailView {
            job: job.job.clone(),
            capabilities: self.capabilities,
            executions: self.project_job(job, now),
        }
    }
}

/// Orders views by most recent activity first; ties fall back to newest id.
pub fn most_recent_first(views: &mut [ExecutionView]) {
    views.sort_by(|a, b| {
        b.last_status_at
            .cmp(&a.last_status_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
