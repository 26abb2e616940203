//! Drives one remote job from submission to a terminal outcome.
//!
//! The poll loop tolerates transient status-check failures, tracks one phase timer
//! at a time (queued or running), and gives up with a best-effort cancel when
//! the job stalls in the running phase or exhausts the overall budget.
pub mod config;
pub mod job;
pub mod phase;
#[cfg(test)]
pub(crate) mod testing;

pub use config::PollConfig;
pub use job::{Diagnostics, JobDriver, JobOutcome, JobResult};
pub use phase::{PollOutcome, Verdict};
