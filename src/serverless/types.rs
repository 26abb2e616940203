//! Wire-level types for the serverless job API.
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Remote job status, normalised from the service's wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl JobStatus {
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IN_QUEUE" | "QUEUED" => JobStatus::Queued,
            "IN_PROGRESS" | "RUNNING" => JobStatus::Running,
            "COMPLETED" | "SUCCEEDED" => JobStatus::Succeeded,
            "FAILED" | "CANCELLED" | "TIMED_OUT" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted job. Identity lives only in memory for the run.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub submitted_at: Instant,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        JobHandle { id: id.into(), submitted_at: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResponse {
    pub id: Option<String>,
}

/// One status check result.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: JobStatus,
    pub raw_status: String,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub delay_time_ms: Option<u64>,
    pub execution_time_ms: Option<u64>,
    /// Full payload as returned, kept for the diagnostic record.
    pub raw: Value,
}

impl StatusReport {
    pub fn from_value(raw: Value) -> Self {
        let raw_status = raw
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let error = match raw.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        StatusReport {
            status: JobStatus::from_remote(&raw_status),
            output: raw.get("output").filter(|v| !v.is_null()).cloned(),
            error,
            delay_time_ms: millis_field(&raw, &["delayTime", "delayTimeMs"]),
            execution_time_ms: millis_field(&raw, &["executionTime", "executionTimeMs"]),
            raw_status,
            raw,
        }
    }
}

fn millis_field(raw: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|k| raw.get(*k))
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
}
