//! Queue and runtime latency of an execution attempt.
//!
//! Two runtime measurements coexist while the `duration` column rolls out:
//! the stored monotonic duration, and wall-clock arithmetic over the row
//! timestamps. [LatencyStrategy] is picked once from [SchemaCapabilities];
//! the stored value wins whenever the schema carries it.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capabilities::SchemaCapabilities;
use crate::models::ExecutionRecord;

/// How runtime latency is measured for a given schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LatencyStrategy {
    /// Read the stored `duration` verbatim.
    Monotonic,
    /// Subtract wall-clock timestamps.
    WallClock,
}

impl LatencyStrategy {
    pub fn for_capabilities(capabilities: SchemaCapabilities) -> Self {
        if capabilities.monotonic_duration {
            LatencyStrategy::Monotonic
        } else {
            LatencyStrategy::WallClock
        }
    }
}

/// Runtime latency together with whether it is still growing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeLatency {
    /// Final runtime of a finished attempt (or a stored duration).
    Final(Duration),
    /// Elapsed time so far of an attempt that has not finished.
    Elapsed(Duration),
}

impl RuntimeLatency {
    pub fn duration(&self) -> Duration {
        match self {
            RuntimeLatency::Final(d) | RuntimeLatency::Elapsed(d) => *d,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, RuntimeLatency::Elapsed(_))
    }
}

/// Delay between the intended start and the moment the attempt row was
/// written. Negative values mean clock skew and are returned as-is.
pub fn queue_latency(record: &ExecutionRecord) -> Option<Duration> {
    record
        .scheduled_at
        .map(|scheduled_at| record.created_at - scheduled_at)
}

/// Runtime of the attempt, or `None` when it is not available yet.
///
/// With the monotonic strategy a stored `None` duration stays `None`: the
/// attempt has not reported a runtime. With the wall-clock strategy an
/// unfinished attempt reports elapsed time up to `now`.
pub fn runtime_latency(
    record: &ExecutionRecord,
    capabilities: SchemaCapabilities,
    now: DateTime<Utc>,
) -> Option<Duration> {
    measure_runtime(record, capabilities, now).map(|latency| latency.duration())
}

/// Like [runtime_latency] but keeps the final/elapsed distinction.
pub fn measure_runtime(
    record: &ExecutionRecord,
    capabilities: SchemaCapabilities,
    now: DateTime<Utc>,
) -> Option<RuntimeLatency> {
    match LatencyStrategy::for_capabilities(capabilities) {
        LatencyStrategy::Monotonic => record.duration.map(RuntimeLatency::Final),
        LatencyStrategy::WallClock => {
            let performed_at = record.performed_at();
            Some(match record.finished_at {
                Some(finished_at) => RuntimeLatency::Final(finished_at - performed_at),
                None => RuntimeLatency::Elapsed(now - performed_at),
            })
        }
    }
}

/// Most recent activity on the attempt, for recency ordering.
pub fn last_status_at(record: &ExecutionRecord) -> DateTime<Utc> {
    record.finished_at.unwrap_or(record.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid ts")
    }

    fn wall_clock() -> SchemaCapabilities {
        SchemaCapabilities::legacy()
    }

    #[test]
    fn queue_latency_is_unclamped() {
        let late =
            ExecutionRecord::new(1, "job", t0()).with_scheduled_at(t0() - Duration::seconds(4));
        assert_eq!(queue_latency(&late), Some(Duration::seconds(4)));

        let skewed =
            ExecutionRecord::new(2, "job", t0()).with_scheduled_at(t0() + Duration::seconds(2));
        assert_eq!(queue_latency(&skewed), Some(Duration::seconds(-2)));

        assert_eq!(queue_latency(&ExecutionRecord::new(3, "job", t0())), None);
    }

    #[test]
    fn monotonic_duration_wins_over_timestamps() {
        let record = ExecutionRecord::new(1, "job", t0())
            .with_finished_at(t0() + Duration::seconds(900))
            .with_duration(Duration::seconds(125));
        let latency = runtime_latency(&record, SchemaCapabilities::current(), t0());
        assert_eq!(latency, Some(Duration::seconds(125)));
    }

    #[test]
    fn monotonic_missing_duration_is_unavailable_not_zero() {
        let record = ExecutionRecord::new(1, "job", t0());
        let now = t0() + Duration::seconds(10);
        assert_eq!(
            runtime_latency(&record, SchemaCapabilities::current(), now),
            None
        );
    }

    #[test]
    fn wall_clock_uses_finished_at() {
        let record =
            ExecutionRecord::new(1, "job", t0()).with_finished_at(t0() + Duration::seconds(30));
        let measured = measure_runtime(&record, wall_clock(), t0() + Duration::hours(1));
        assert_eq!(measured, Some(RuntimeLatency::Final(Duration::seconds(30))));
    }

    #[test]
    fn wall_clock_unfinished_reports_elapsed_so_far() {
        let record = ExecutionRecord::new(1, "job", t0());
        let measured = measure_runtime(&record, wall_clock(), t0() + Duration::seconds(10))
            .expect("elapsed");
        assert!(measured.is_in_progress());
        assert_eq!(measured.duration(), Duration::seconds(10));
    }

    #[test]
    fn wall_clock_ignores_stored_duration() {
        let record = ExecutionRecord::new(1, "job", t0())
            .with_finished_at(t0() + Duration::seconds(30))
            .with_duration(Duration::seconds(125));
        assert_eq!(
            runtime_latency(&record, wall_clock(), t0()),
            Some(Duration::seconds(30))
        );
    }

    #[test]
    fn last_status_prefers_finished_at() {
        let running = ExecutionRecord::new(1, "job", t0());
        assert_eq!(last_status_at(&running), t0());
        let done = running.with_finished_at(t0() + Duration::seconds(7));
        assert_eq!(last_status_at(&done), t0() + Duration::seconds(7));
    }

    #[test]
    fn strategy_follows_capabilities() {
        assert_eq!(
            LatencyStrategy::for_capabilities(SchemaCapabilities::current()),
            LatencyStrategy::Monotonic
        );
        assert_eq!(
            LatencyStrategy::for_capabilities(SchemaCapabilities::legacy()),
            LatencyStrategy::WallClock
        );
    }
}
