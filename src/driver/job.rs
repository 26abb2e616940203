//! Job driver: submission, the poll loop, and best-effort cancellation.
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::config::PollConfig;
use super::phase::{overall_exceeded, PhaseTracker, StallWarning, Verdict};
use crate::error::{AppError, DriverError};
use crate::serverless::{JobApi, JobHandle, JobStatus, StatusReport};

/// How the driver stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Stuck,
}

impl JobOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "SUCCEEDED",
            JobOutcome::Failed => "FAILED",
            JobOutcome::TimedOut => "TIMED_OUT",
            JobOutcome::Stuck => "STUCK",
        }
    }
}

/// Counters that separate a slow job from a desynced one.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub status_changes: u32,
    pub queue_duration: Option<Duration>,
    pub execution_duration: Option<Duration>,
    pub warnings: u32,
    pub transient_errors: u32,
    pub polls: u32,
    pub elapsed: Duration,
    pub remote_delay_ms: Option<u64>,
    pub remote_execution_ms: Option<u64>,
    pub cancel_requested: bool,
    /// Length of the phase that was open when the driver gave up.
    pub stalled_phase: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub outcome: JobOutcome,
    /// Last status reported by the service, if any status check succeeded.
    pub last_status: Option<JobStatus>,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Full payload of the last successful status check.
    pub last_report: Option<Value>,
    pub diagnostics: Diagnostics,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Succeeded
    }

    fn last_status_str(&self) -> String {
        self.last_status.map(|s| s.to_string()).unwrap_or_else(|| "NONE".to_string())
    }

    /// Turn a non-success outcome into its typed error.
    pub fn into_result(self) -> Result<JobResult, DriverError> {
        let elapsed_secs = self.diagnostics.elapsed.as_secs();
        match self.outcome {
            JobOutcome::Succeeded => Ok(self),
            JobOutcome::Failed => Err(DriverError::RemoteFailure {
                message: self.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
                job_id: self.job_id,
            }),
            JobOutcome::Stuck => Err(DriverError::StallTimeout {
                last_status: self.last_status_str(),
                phase_secs: self.diagnostics.stalled_phase.unwrap_or_default().as_secs(),
                job_id: self.job_id,
                elapsed_secs,
            }),
            JobOutcome::TimedOut => Err(DriverError::OverallTimeout {
                last_status: self.last_status_str(),
                job_id: self.job_id,
                elapsed_secs,
            }),
        }
    }
}

/// Drives jobs on one remote API. Each `await_completion` call owns its own
/// timers; the only shared state is the list of pending cancellations.
pub struct JobDriver {
    api: Arc<dyn JobApi>,
    cancellations: Mutex<Vec<JoinHandle<()>>>,
}

impl JobDriver {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        JobDriver { api, cancellations: Mutex::new(Vec::new()) }
    }

    /// Submit an opaque payload and start the job's monotonic clock.
    pub async fn submit(&self, payload: &Value) -> Result<JobHandle, DriverError> {
        let id = self.api.create_job(payload).await.map_err(|e| match e {
            AppError::Driver(d @ DriverError::Submission(_)) => d,
            other => DriverError::Submission(other.to_string()),
        })?;
        Ok(JobHandle::new(id))
    }

    /// Poll until the job reaches a terminal status, stalls, or runs out of time.
    pub async fn await_completion(&self, handle: &JobHandle, config: &PollConfig) -> JobResult {
        let job_id = handle.id.as_str();
        let mut tracker = PhaseTracker::new(handle.submitted_at);
        let mut diag = Diagnostics::default();
        let mut last: Option<StatusReport> = None;

        info!(job_id, "Polling for result every {}s", config.poll_interval.as_secs());

        loop {
            time::sleep(config.poll_interval).await;
            diag.polls += 1;

            let report = match self.api.job_status(job_id).await {
                Ok(report) => report,
                Err(e) => {
                    diag.transient_errors += 1;
                    let elapsed = handle.elapsed();
                    warn!(job_id, elapsed_secs = elapsed.as_secs(), error = %e, "Status check failed, retrying");
                    if overall_exceeded(elapsed, config) {
                        return self.abort(handle, config, JobOutcome::TimedOut, tracker, diag, last).await;
                    }
                    continue;
                }
            };

            let now = Instant::now();
            let previous = tracker.last_status();
            if tracker.observe(report.status, now) {
                if previous == Some(JobStatus::Queued) {
                    info!(
                        job_id,
                        queued_secs = tracker.queue_duration().unwrap_or_default().as_secs(),
                        "Worker picked up job"
                    );
                }
                debug!(job_id, status = %report.raw_status, "Status changed");
            }
            let poll = tracker.outcome(report.status, now);
            info!(
                job_id,
                elapsed_secs = poll.elapsed.as_secs(),
                phase_secs = poll.phase_elapsed.as_secs(),
                status = %report.status,
                "Status"
            );

            let verdict = poll.verdict(config);
            last = Some(report);
            match verdict {
                Verdict::Terminal => return self.finish(handle, tracker, diag, last),
                Verdict::Stuck => {
                    return self.abort(handle, config, JobOutcome::Stuck, tracker, diag, last).await;
                }
                Verdict::TimedOut => {
                    return self.abort(handle, config, JobOutcome::TimedOut, tracker, diag, last).await;
                }
                Verdict::Warn(kind) => {
                    if tracker.take_warning() {
                        diag.warnings += 1;
                        match kind {
                            StallWarning::SlowQueue => warn!(
                                job_id,
                                queued_secs = poll.phase_elapsed.as_secs(),
                                "Job still queued, worker may be scaling"
                            ),
                            StallWarning::SlowRunning => warn!(
                                job_id,
                                running_secs = poll.phase_elapsed.as_secs(),
                                "Job running longer than expected"
                            ),
                        }
                    }
                }
                Verdict::Continue => {}
            }
        }
    }

    fn finish(
        &self,
        handle: &JobHandle,
        mut tracker: PhaseTracker,
        diag: Diagnostics,
        last: Option<StatusReport>,
    ) -> JobResult {
        let now = Instant::now();
        tracker.finish(now);
        let last_status = tracker.last_status();
        let outcome = match last_status {
            Some(JobStatus::Succeeded) => JobOutcome::Succeeded,
            _ => JobOutcome::Failed,
        };
        let result = build_result(handle, outcome, &tracker, diag, last, now);
        match outcome {
            JobOutcome::Succeeded => info!(
                job_id = %result.job_id,
                elapsed_secs = result.diagnostics.elapsed.as_secs(),
                "Job completed"
            ),
            _ => error!(
                job_id = %result.job_id,
                elapsed_secs = result.diagnostics.elapsed.as_secs(),
                error = result.error.as_deref().unwrap_or("Unknown error"),
                "Job failed remotely"
            ),
        }
        result
    }

    async fn abort(
        &self,
        handle: &JobHandle,
        config: &PollConfig,
        outcome: JobOutcome,
        mut tracker: PhaseTracker,
        mut diag: Diagnostics,
        mut last: Option<StatusReport>,
    ) -> JobResult {
        if config.confirm_before_abort {
            match self.api.job_status(&handle.id).await {
                Ok(report) if report.status.is_terminal() => {
                    info!(job_id = %handle.id, status = %report.status, "Job reached a terminal status before abort");
                    tracker.observe(report.status, Instant::now());
                    return self.finish(handle, tracker, diag, Some(report));
                }
                Ok(report) => last = Some(report),
                Err(e) => {
                    diag.transient_errors += 1;
                    debug!(job_id = %handle.id, error = %e, "Confirmation status check failed");
                }
            }
        }

        self.spawn_cancel(&handle.id);
        diag.cancel_requested = true;

        let now = Instant::now();
        diag.stalled_phase = Some(tracker.phase_elapsed(now));
        tracker.finish(now);
        let result = build_result(handle, outcome, &tracker, diag, last, now);
        error!(
            job_id = %result.job_id,
            outcome = outcome.as_str(),
            elapsed_secs = result.diagnostics.elapsed.as_secs(),
            last_status = %result.last_status_str(),
            "Gave up waiting for job, cancellation requested"
        );
        result
    }

    /// Fire a detached cancel request. Its result is logged and dropped.
    fn spawn_cancel(&self, job_id: &str) {
        let api = Arc::clone(&self.api);
        let job_id = job_id.to_string();
        let handle = tokio::spawn(async move {
            match api.cancel_job(&job_id).await {
                Ok(()) => info!(job_id = %job_id, "Job cancelled"),
                Err(e) => debug!(job_id = %job_id, error = %e, "Cancel request failed"),
            }
        });
        if let Ok(mut pending) = self.cancellations.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }

    /// Give pending cancel requests up to `grace` to finish. Returns how many
    /// were still outstanding when the grace period ran out.
    pub async fn flush_cancellations(&self, grace: Duration) -> usize {
        let pending: Vec<JoinHandle<()>> = match self.cancellations.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => return 0,
        };
        let deadline = Instant::now() + grace;
        let mut outstanding = 0;
        for handle in pending {
            if time::timeout_at(deadline, handle).await.is_err() {
                outstanding += 1;
            }
        }
        outstanding
    }
}

fn build_result(
    handle: &JobHandle,
    outcome: JobOutcome,
    tracker: &PhaseTracker,
    mut diag: Diagnostics,
    last: Option<StatusReport>,
    now: Instant,
) -> JobResult {
    diag.status_changes = tracker.status_changes();
    diag.queue_duration = tracker.queue_duration();
    diag.execution_duration = tracker.execution_duration();
    diag.elapsed = now.saturating_duration_since(handle.submitted_at);

    let (output, error, last_report) = match last {
        Some(report) => {
            diag.remote_delay_ms = report.delay_time_ms;
            diag.remote_execution_ms = report.execution_time_ms;
            let output = if outcome == JobOutcome::Succeeded { report.output } else { None };
            let error = if outcome == JobOutcome::Failed {
                Some(report.error.unwrap_or_else(|| format!("remote status {}", report.raw_status)))
            } else {
                None
            };
            (output, error, Some(report.raw))
        }
        None => (None, None, None),
    };

    JobResult {
        job_id: handle.id.clone(),
        outcome,
        last_status: tracker.last_status(),
        output,
        error,
        last_report,
        diagnostics: diag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::ScriptedApi;
    use serde_json::json;

    fn secs(d: Option<Duration>) -> u64 {
        d.map(|d| d.as_secs()).unwrap_or(0)
    }

    async fn run(api: Arc<ScriptedApi>, config: PollConfig) -> JobResult {
        let driver = JobDriver::new(api.clone());
        let handle = driver.submit(&json!({"input": {}})).await.expect("submit");
        let result = driver.await_completion(&handle, &config).await;
        driver.flush_cancellations(Duration::from_secs(5)).await;
        result
    }

    #[tokio::test(start_paused = true)]
    async fn concrete_timeline_succeeds_without_warnings() {
        let api = Arc::new(
            ScriptedApi::new(vec![(0, "IN_QUEUE"), (10, "IN_PROGRESS"), (25, "COMPLETED")])
                .with_output(json!({"images": [{"data": "AAEC"}]})),
        );
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Succeeded);
        assert_eq!(secs(result.diagnostics.queue_duration), 10);
        assert_eq!(secs(result.diagnostics.execution_duration), 15);
        assert_eq!(result.diagnostics.warnings, 0);
        assert_eq!(result.diagnostics.status_changes, 2);
        assert_eq!(result.diagnostics.elapsed.as_secs(), 25);
        assert!(result.output.is_some());
        assert_eq!(api.cancels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_before_overall_timeout() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_PROGRESS"), (40, "COMPLETED")]));
        let result = run(api.clone(), PollConfig::basic()).await;

        assert!(result.is_success());
        assert_eq!(result.diagnostics.elapsed.as_secs(), 40);
        assert_eq!(result.diagnostics.polls, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn long_running_job_is_stuck_and_cancelled_once() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_QUEUE"), (10, "IN_PROGRESS")]));
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Stuck);
        assert!(result.diagnostics.cancel_requested);
        assert_eq!(result.diagnostics.elapsed.as_secs(), 105);
        assert_eq!(secs(result.diagnostics.execution_duration), 95);
        assert_eq!(api.cancels(), 1);
        assert!(matches!(result.into_result(), Err(DriverError::StallTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn stall_reports_only_the_final_running_stretch() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_PROGRESS"), (20, "WARMING"), (25, "IN_PROGRESS")]));
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Stuck);
        assert_eq!(secs(result.diagnostics.stalled_phase), 95);
        // both running stretches together: 5..20 and 25..120
        assert_eq!(secs(result.diagnostics.execution_duration), 110);
        match result.into_result() {
            Err(DriverError::StallTimeout { phase_secs, elapsed_secs, .. }) => {
                assert_eq!(phase_secs, 95);
                assert_eq!(elapsed_secs, 120);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abort_keeps_the_confirmation_report() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_QUEUE"), (10, "IN_PROGRESS")]));
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Stuck);
        assert_eq!(result.diagnostics.polls, 21);
        let report = result.last_report.expect("last report");
        assert_eq!(report["seq"], 22);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_forever_times_out_rather_than_stuck() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_QUEUE")]));
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::TimedOut);
        assert_eq!(result.last_status, Some(JobStatus::Queued));
        assert_eq!(result.diagnostics.elapsed.as_secs(), 185);
        assert_eq!(result.diagnostics.warnings, 1);
        assert_eq!(api.cancels(), 1);
        assert!(matches!(result.into_result(), Err(DriverError::OverallTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transition_to_running_resets_phase_timer() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_QUEUE"), (55, "IN_PROGRESS"), (95, "COMPLETED")]));
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Succeeded);
        assert_eq!(secs(result.diagnostics.queue_duration), 55);
        assert_eq!(secs(result.diagnostics.execution_duration), 40);
        // only the running warning at 30s fires; the queue never passed 60s
        assert_eq!(result.diagnostics.warnings, 1);
        assert_eq!(api.cancels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_status_errors_are_retried() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "COMPLETED")]).failing_first(2));
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Succeeded);
        assert_eq!(result.diagnostics.transient_errors, 2);
        assert_eq!(result.diagnostics.polls, 3);
        assert_eq!(result.diagnostics.warnings, 0);
        assert!(!result.diagnostics.cancel_requested);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_carries_error_text() {
        let api = Arc::new(
            ScriptedApi::new(vec![(0, "IN_PROGRESS"), (15, "FAILED")]).with_error("CUDA out of memory"),
        );
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Failed);
        assert_eq!(result.error.as_deref(), Some("CUDA out of memory"));
        assert!(result.output.is_none());
        match result.into_result() {
            Err(DriverError::RemoteFailure { message, .. }) => assert_eq!(message, "CUDA out of memory"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_failure_does_not_change_outcome() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_PROGRESS")]).failing_cancel());
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Stuck);
        assert_eq!(api.cancels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_check_keeps_a_just_finished_result() {
        // stuck is detected on check 20 (t=100); check 21 is the confirmation
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_PROGRESS")]).completing_on_check(21));
        let result = run(api.clone(), PollConfig::default()).await;

        assert_eq!(result.outcome, JobOutcome::Succeeded);
        assert_eq!(api.cancels(), 0);
        assert!(!result.diagnostics.cancel_requested);
    }

    #[tokio::test(start_paused = true)]
    async fn status_errors_still_respect_overall_timeout() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_QUEUE")]).failing_first(usize::MAX));
        let config = PollConfig::default().with_overall_timeout(Duration::from_secs(30));
        let result = run(api.clone(), config).await;

        assert_eq!(result.outcome, JobOutcome::TimedOut);
        assert_eq!(result.last_status, None);
        assert!(result.diagnostics.transient_errors >= 7);
        assert_eq!(api.cancels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_without_id_fails() {
        let api = Arc::new(ScriptedApi::new(vec![(0, "IN_QUEUE")]).rejecting_submit());
        let driver = JobDriver::new(api);
        let err = driver.submit(&json!({})).await.unwrap_err();
        assert!(matches!(err, DriverError::Submission(_)));
    }
}
