//! Serverless ComfyUI job driver library
//!
//! Modules:
//! - `driver`: Submit/poll/cancel state machine with stall detection.
//! - `serverless`: The `JobApi` seam and the RunPod HTTP client.
//! - `artifacts`: Base64 artifact decoding and persistence to a blob sink.
//! - `workflow`: Loading and patching API-format workflows into job payloads.
//! - `config`: Env-driven configuration loader.
//! - `error`: Common error types and alias.
//!
//! Re-exports are provided for common types: `Config`, `JobDriver`,
//! `PollConfig`, `RunPodClient`, and `decode_artifacts`.
pub mod artifacts;
pub mod config;
pub mod driver;
pub mod error;
pub mod serverless;
pub mod workflow;

pub use artifacts::{decode_artifacts, ArtifactStore, FsSink};
pub use config::Config;
pub use driver::{JobDriver, JobOutcome, JobResult, PollConfig};
pub use serverless::client::RunPodClient;
