//! Phase timers and the per-poll threshold decision.
use std::time::Duration;
use tokio::time::Instant;

use super::config::PollConfig;
use crate::serverless::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Queued(Instant),
    Running(Instant),
}

/// Tracks the single active phase timer for one job.
#[derive(Debug)]
pub struct PhaseTracker {
    submitted_at: Instant,
    phase: Phase,
    last_status: Option<JobStatus>,
    status_changes: u32,
    queue_duration: Option<Duration>,
    execution_duration: Option<Duration>,
    warned_in_phase: bool,
}

impl PhaseTracker {
    pub fn new(submitted_at: Instant) -> Self {
        PhaseTracker {
            submitted_at,
            phase: Phase::Idle,
            last_status: None,
            status_changes: 0,
            queue_duration: None,
            execution_duration: None,
            warned_in_phase: false,
        }
    }

    /// Record an observed status. Returns true if it differs from the last one.
    ///
    /// A job first seen queued has been queued since submission, so its queue
    /// timer is backdated to the submission instant.
    pub fn observe(&mut self, status: JobStatus, now: Instant) -> bool {
        if self.last_status == Some(status) {
            return false;
        }
        let first = self.last_status.is_none();
        self.close_phase(now);
        self.phase = match status {
            JobStatus::Queued if first => Phase::Queued(self.submitted_at),
            JobStatus::Queued => Phase::Queued(now),
            JobStatus::Running => Phase::Running(now),
            _ => Phase::Idle,
        };
        if !first {
            self.status_changes += 1;
        }
        self.last_status = Some(status);
        self.warned_in_phase = false;
        true
    }

    /// Stop whichever timer is running, folding it into the totals.
    pub fn finish(&mut self, now: Instant) {
        self.close_phase(now);
    }

    fn close_phase(&mut self, now: Instant) {
        match self.phase {
            Phase::Queued(start) => accumulate(&mut self.queue_duration, now.saturating_duration_since(start)),
            Phase::Running(start) => accumulate(&mut self.execution_duration, now.saturating_duration_since(start)),
            Phase::Idle => {}
        }
        self.phase = Phase::Idle;
    }

    pub fn phase_elapsed(&self, now: Instant) -> Duration {
        match self.phase {
            Phase::Queued(start) | Phase::Running(start) => now.saturating_duration_since(start),
            Phase::Idle => Duration::ZERO,
        }
    }

    pub fn outcome(&self, status: JobStatus, now: Instant) -> PollOutcome {
        PollOutcome {
            status,
            elapsed: now.saturating_duration_since(self.submitted_at),
            phase_elapsed: self.phase_elapsed(now),
        }
    }

    /// True the first time a warning is requested in the current phase.
    pub fn take_warning(&mut self) -> bool {
        if self.warned_in_phase {
            false
        } else {
            self.warned_in_phase = true;
            true
        }
    }

    pub fn last_status(&self) -> Option<JobStatus> {
        self.last_status
    }

    pub fn status_changes(&self) -> u32 {
        self.status_changes
    }

    pub fn queue_duration(&self) -> Option<Duration> {
        self.queue_duration
    }

    pub fn execution_duration(&self) -> Option<Duration> {
        self.execution_duration
    }
}

fn accumulate(total: &mut Option<Duration>, span: Duration) {
    *total = Some(total.unwrap_or(Duration::ZERO) + span);
}

/// Latest status plus elapsed-time bookkeeping for one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: JobStatus,
    pub elapsed: Duration,
    pub phase_elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallWarning {
    SlowQueue,
    SlowRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Terminal,
    Stuck,
    TimedOut,
    Warn(StallWarning),
    Continue,
}

impl PollOutcome {
    /// Apply thresholds in precedence order: terminal, stuck, timed out, warn.
    pub fn verdict(&self, config: &PollConfig) -> Verdict {
        if self.status.is_terminal() {
            return Verdict::Terminal;
        }
        let phase_secs = self.phase_elapsed.as_secs();
        if self.status == JobStatus::Running && exceeds(phase_secs, config.running_stall_threshold) {
            return Verdict::Stuck;
        }
        if overall_exceeded(self.elapsed, config) {
            return Verdict::TimedOut;
        }
        match self.status {
            JobStatus::Queued if exceeds(phase_secs, config.queue_stall_threshold) => {
                Verdict::Warn(StallWarning::SlowQueue)
            }
            JobStatus::Running if exceeds(phase_secs, config.running_warn_threshold) => {
                Verdict::Warn(StallWarning::SlowRunning)
            }
            _ => Verdict::Continue,
        }
    }
}

pub fn overall_exceeded(elapsed: Duration, config: &PollConfig) -> bool {
    elapsed.as_secs() > config.overall_timeout.as_secs()
}

fn exceeds(secs: u64, threshold: Option<Duration>) -> bool {
    threshold.map_or(false, |t| secs > t.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    fn outcome(status: JobStatus, elapsed: u64, phase: u64) -> PollOutcome {
        PollOutcome {
            status,
            elapsed: Duration::from_secs(elapsed),
            phase_elapsed: Duration::from_secs(phase),
        }
    }

    #[test]
    fn queue_timer_is_backdated_to_submission() {
        let t0 = Instant::now();
        let mut tracker = PhaseTracker::new(t0);
        assert!(tracker.observe(JobStatus::Queued, at(t0, 5)));
        assert_eq!(tracker.phase_elapsed(at(t0, 5)), Duration::from_secs(5));
        assert!(!tracker.observe(JobStatus::Queued, at(t0, 10)));
        assert_eq!(tracker.status_changes(), 0);
    }

    #[test]
    fn running_resets_phase_timer() {
        let t0 = Instant::now();
        let mut tracker = PhaseTracker::new(t0);
        tracker.observe(JobStatus::Queued, at(t0, 5));
        tracker.observe(JobStatus::Running, at(t0, 55));
        assert_eq!(tracker.queue_duration(), Some(Duration::from_secs(55)));
        assert_eq!(tracker.phase_elapsed(at(t0, 95)), Duration::from_secs(40));
        assert_eq!(tracker.status_changes(), 1);

        tracker.observe(JobStatus::Succeeded, at(t0, 95));
        assert_eq!(tracker.execution_duration(), Some(Duration::from_secs(40)));
        assert_eq!(tracker.phase_elapsed(at(t0, 100)), Duration::ZERO);
        assert_eq!(tracker.status_changes(), 2);
    }

    #[test]
    fn unknown_status_stops_both_timers() {
        let t0 = Instant::now();
        let mut tracker = PhaseTracker::new(t0);
        tracker.observe(JobStatus::Running, at(t0, 5));
        tracker.observe(JobStatus::Unknown, at(t0, 20));
        assert_eq!(tracker.execution_duration(), Some(Duration::from_secs(15)));
        assert_eq!(tracker.phase_elapsed(at(t0, 30)), Duration::ZERO);
    }

    #[test]
    fn warning_is_taken_once_per_phase() {
        let t0 = Instant::now();
        let mut tracker = PhaseTracker::new(t0);
        tracker.observe(JobStatus::Queued, at(t0, 5));
        assert!(tracker.take_warning());
        assert!(!tracker.take_warning());
        tracker.observe(JobStatus::Running, at(t0, 70));
        assert!(tracker.take_warning());
    }

    #[test]
    fn thresholds_use_strict_greater_than() {
        let config = PollConfig::default();
        assert_eq!(outcome(JobStatus::Running, 100, 90).verdict(&config), Verdict::Warn(StallWarning::SlowRunning));
        assert_eq!(outcome(JobStatus::Running, 105, 91).verdict(&config), Verdict::Stuck);
        assert_eq!(outcome(JobStatus::Running, 40, 30).verdict(&config), Verdict::Continue);
        assert_eq!(outcome(JobStatus::Queued, 60, 60).verdict(&config), Verdict::Continue);
        assert_eq!(outcome(JobStatus::Queued, 65, 65).verdict(&config), Verdict::Warn(StallWarning::SlowQueue));
    }

    #[test]
    fn overall_timeout_applies_in_any_phase() {
        let config = PollConfig::default();
        assert_eq!(outcome(JobStatus::Queued, 180, 180).verdict(&config), Verdict::Warn(StallWarning::SlowQueue));
        assert_eq!(outcome(JobStatus::Queued, 185, 185).verdict(&config), Verdict::TimedOut);
        assert_eq!(outcome(JobStatus::Unknown, 185, 0).verdict(&config), Verdict::TimedOut);
    }

    #[test]
    fn stuck_takes_precedence_over_timeout() {
        let config = PollConfig::default();
        assert_eq!(outcome(JobStatus::Running, 200, 95).verdict(&config), Verdict::Stuck);
        assert_eq!(outcome(JobStatus::Succeeded, 200, 95).verdict(&config), Verdict::Terminal);
    }

    #[test]
    fn basic_config_never_reports_stuck() {
        let config = PollConfig::basic();
        assert_eq!(outcome(JobStatus::Running, 150, 140).verdict(&config), Verdict::Continue);
        assert_eq!(outcome(JobStatus::Running, 185, 175).verdict(&config), Verdict::TimedOut);
    }
}
