//! Common error types and result alias.
//!
//! `DriverError` covers the job lifecycle (submission, polling outcomes,
//! artifact decoding). `AppError` wraps it together with the ambient
//! failures of config, workflow files, and the artifact sink.
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The create-job call failed or returned no usable job id. Not retried.
    #[error("job submission failed: {0}")]
    Submission(String),

    /// A single status check failed. Swallowed by the poll loop.
    #[error("status check failed: {0}")]
    StatusTransient(String),

    /// The remote service reported a terminal failure.
    #[error("job {job_id} failed remotely: {message}")]
    RemoteFailure { job_id: String, message: String },

    /// The job stayed in the running phase longer than allowed.
    #[error("job {job_id} stuck in {last_status} for {phase_secs}s (elapsed {elapsed_secs}s)")]
    StallTimeout {
        job_id: String,
        last_status: String,
        phase_secs: u64,
        elapsed_secs: u64,
    },

    /// The overall wait budget ran out before a terminal status.
    #[error("job {job_id} timed out after {elapsed_secs}s (last status {last_status})")]
    OverallTimeout {
        job_id: String,
        last_status: String,
        elapsed_secs: u64,
    },

    /// A declared artifact payload could not be decoded.
    #[error("artifact {index} could not be decoded: {reason}")]
    ArtifactDecode { index: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("serverless API error: {0}")]
    Serverless(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("workflow error: {0}")]
    Workflow(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// True when the failure came from the job itself rather than local setup.
    pub fn is_job_outcome(&self) -> bool {
        matches!(
            self,
            AppError::Driver(
                DriverError::RemoteFailure { .. }
                    | DriverError::StallTimeout { .. }
                    | DriverError::OverallTimeout { .. }
            )
        )
    }
}
