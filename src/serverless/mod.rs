//! Remote job API: the `JobApi` seam and its RunPod HTTP implementation.
pub mod client;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppResult;
pub use types::{JobHandle, JobStatus, StatusReport};

/// The three remote operations the driver consumes.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Create a job from an opaque payload and return its id.
    async fn create_job(&self, payload: &Value) -> AppResult<String>;

    /// Fetch the current status of a job.
    async fn job_status(&self, job_id: &str) -> AppResult<StatusReport>;

    /// Ask the service to cancel a job. Callers treat this as best-effort.
    async fn cancel_job(&self, job_id: &str) -> AppResult<()>;
}
