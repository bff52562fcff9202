//! The remote generation service seam

use crate::task::{CreateTask, TaskId, TaskReport};
use kiln_core::Result;

/// A remote service that runs generation tasks.
///
/// Implementations report failures with the shared error taxonomy:
/// - `NotFound` when the service does not know a task id
/// - `ServiceError` for error statuses returned by the service
/// - `TransportError` for connection-level failures
/// - `ParseError` for responses that cannot be understood
pub trait GenerationService {
    /// Service name (e.g. "meshy", "mock")
    fn name(&self) -> &str;

    /// Create a task and return the id the service assigned to it
    fn create(&self, task: &CreateTask) -> Result<TaskId>;

    /// Fetch the current status of a task
    fn status(&self, task_id: &TaskId) -> Result<TaskReport>;
}

/// Downloads the binary behind an artifact URL
pub trait BinaryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
