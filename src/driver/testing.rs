//! Scripted in-memory `JobApi` driven by tokio's clock.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AppError, AppResult, DriverError};
use crate::serverless::{JobApi, StatusReport};

pub(crate) struct ScriptedApi {
    started: Instant,
    /// `(from_secs, raw_status)` sorted by time.
    timeline: Vec<(u64, &'static str)>,
    output: Value,
    error: Option<String>,
    fail_first: usize,
    complete_on_check: Option<usize>,
    fail_cancel: bool,
    reject_submit: bool,
    checks: AtomicUsize,
    cancels: AtomicUsize,
}

impl ScriptedApi {
    pub fn new(timeline: Vec<(u64, &'static str)>) -> Self {
        ScriptedApi {
            started: Instant::now(),
            timeline,
            output: json!({"images": []}),
            error: None,
            fail_first: 0,
            complete_on_check: None,
            fail_cancel: false,
            reject_submit: false,
            checks: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn failing_first(mut self, checks: usize) -> Self {
        self.fail_first = checks;
        self
    }

    /// Report COMPLETED from the given 1-based status check onwards.
    pub fn completing_on_check(mut self, check: usize) -> Self {
        self.complete_on_check = Some(check);
        self
    }

    pub fn failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    pub fn rejecting_submit(mut self) -> Self {
        self.reject_submit = true;
        self
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn status_at(&self, elapsed: Duration) -> &'static str {
        self.timeline
            .iter()
            .rev()
            .find(|(from, _)| elapsed >= Duration::from_secs(*from))
            .map(|(_, status)| *status)
            .unwrap_or("IN_QUEUE")
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn create_job(&self, _payload: &Value) -> AppResult<String> {
        if self.reject_submit {
            return Err(DriverError::Submission("response carried no job id".to_string()).into());
        }
        Ok("job-1".to_string())
    }

    async fn job_status(&self, job_id: &str) -> AppResult<StatusReport> {
        let check = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        if check <= self.fail_first {
            return Err(AppError::Serverless("status check timed out".to_string()));
        }
        let status = match self.complete_on_check {
            Some(n) if check >= n => "COMPLETED",
            _ => self.status_at(self.started.elapsed()),
        };
        let mut raw = json!({"id": job_id, "status": status, "seq": check});
        match status {
            "COMPLETED" => raw["output"] = self.output.clone(),
            "FAILED" => {
                if let Some(error) = &self.error {
                    raw["error"] = Value::String(error.clone());
                }
            }
            _ => {}
        }
        Ok(StatusReport::from_value(raw))
    }

    async fn cancel_job(&self, _job_id: &str) -> AppResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel {
            return Err(AppError::Serverless("cancel rejected".to_string()));
        }
        Ok(())
    }
}
