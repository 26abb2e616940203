use std::time::Duration;

/// Poll loop thresholds.
///
/// Stall thresholds are optional; `None` disables that check. Thresholds are
/// compared against whole elapsed seconds with strict greater-than.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Fixed delay before every status check.
    pub poll_interval: Duration,
    /// Budget from submission to a terminal status.
    pub overall_timeout: Duration,
    /// Advisory: queued longer than this usually means workers are scaling.
    pub queue_stall_threshold: Option<Duration>,
    /// Advisory warning point while running.
    pub running_warn_threshold: Option<Duration>,
    /// Fatal: running longer than this is treated as stuck.
    pub running_stall_threshold: Option<Duration>,
    /// Check once more before aborting, in case the job just finished.
    pub confirm_before_abort: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            poll_interval: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(180),
            queue_stall_threshold: Some(Duration::from_secs(60)),
            running_warn_threshold: Some(Duration::from_secs(30)),
            running_stall_threshold: Some(Duration::from_secs(90)),
            confirm_before_abort: true,
        }
    }
}

impl PollConfig {
    /// Queue warning and overall timeout only, no running-phase checks.
    pub fn basic() -> Self {
        PollConfig {
            running_warn_threshold: None,
            running_stall_threshold: None,
            ..PollConfig::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }
}
