//! Read façade over stored jobs and their execution attempts.

use jobdeck_kernel::DeckError;

use crate::capabilities::SchemaCapabilities;
use crate::models::{ExecutionRecord, JobExecutions, JobSummary};

/// Query surface the dashboard reads attempts through.
///
/// Implementations must:
/// - return attempts ordered by `created_at` ascending, ties by id;
/// - fill optional fields only when [Self::schema_capabilities] reports the
///   backing column, leaving them `None` otherwise.
pub trait ExecutionRepository: Send + Sync {
    /// Capabilities of the backing schema, resolved once per repository.
    fn schema_capabilities(&self) -> SchemaCapabilities;

    fn job_summary(&self, active_job_id: &str) -> Result<Option<JobSummary>, DeckError>;

    fn executions_for_job(&self, active_job_id: &str) -> Result<Vec<ExecutionRecord>, DeckError>;

    /// Attempts that have recorded a `finished_at`.
    fn finished_executions(&self, active_job_id: &str) -> Result<Vec<ExecutionRecord>, DeckError> {
        Ok(self
            .executions_for_job(active_job_id)?
            .into_iter()
            .filter(|record| record.is_finished())
            .collect())
    }
}

/// Load a job and all of its attempts.
pub fn load_job_executions<R: ExecutionRepository + ?Sized>(
    repository: &R,
    active_job_id: &str,
) -> Result<JobExecutions, DeckError> {
    let job = repository
        .job_summary(active_job_id)?
        .ok_or_else(|| DeckError::NotFound(format!("job {}", active_job_id)))?;
    let executions = repository.executions_for_job(active_job_id)?;
    Ok(JobExecutions { job, executions })
}
