//! Jobdeck kernel: identity types, the shared error type, and the pure
//! status resolver for execution attempts.
//!
//! Nothing in this crate touches storage. Everything that depends on a
//! backing table lives in `jobdeck-execution-runtime`.

pub mod error;
pub mod identity;
pub mod status;

pub use error::DeckError;
pub use identity::{ActiveJobId, ExecutionId};
pub use status::{resolve_status, ExecutionStatus, StatusInput};
