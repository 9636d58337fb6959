//! Identity types for jobs and their execution attempts.
//!
//! ActiveJobId correlates every attempt with its owning job; it is not unique
//! across attempts. ExecutionId is the storage row id of a single attempt.

/// Stable identifier of a logical job, shared by all of its attempts.
pub type ActiveJobId = String;

/// Row identifier of one physical execution attempt.
pub type ExecutionId = i64;
