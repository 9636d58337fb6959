//! Execution-attempt records, schema capability probing, and the derived
//! status/latency/error projections rendered by the jobs dashboard.

pub mod capabilities;
pub mod config;
pub mod dashboard_contract;
pub mod error_events;
pub mod latency;
pub mod models;
pub mod projection;
pub mod repository;
#[cfg(feature = "sqlite-persistence")]
pub mod sqlite_execution_repository;

pub use capabilities::{
    warn_migration_pending, Capability, ColumnCatalog, SchemaCapabilities, SchemaCapabilityProbe,
};
pub use config::{DashboardConfig, SchemaMode};
pub use dashboard_contract::{
    dashboard_contract, dashboard_contract_pretty_json, dashboard_routes, DashboardContract,
    PathParamContract, RouteContract,
};
pub use error_events::{
    error_event, error_event_migrated, filtered_backtrace, BacktraceCleaner, ErrorSummary,
    FilteringBacktraceCleaner, NoopBacktraceCleaner,
};
pub use jobdeck_kernel::{
    resolve_status, ActiveJobId, DeckError, ExecutionId, ExecutionStatus, StatusInput,
};
pub use latency::{
    last_status_at, measure_runtime, queue_latency, runtime_latency, LatencyStrategy,
    RuntimeLatency,
};
pub use models::{ErrorEvent, ExecutionRecord, JobExecutions, JobSummary, EXECUTIONS_PARAM};
pub use projection::{
    display_serialized_params, most_recent_first, ExecutionProjector, ExecutionView,
    JobDetailView, EXECUTION_SNAPSHOT_KEY,
};
pub use repository::{load_job_executions, ExecutionRepository};
#[cfg(feature = "sqlite-persistence")]
pub use sqlite_execution_repository::{
    ExecutionOutcome, SqliteExecutionRepository, EXECUTIONS_TABLE, JOBS_TABLE,
};
