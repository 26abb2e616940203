//! Env-driven configuration for the driver and the `comfyjob` binary.
//!
//! Values are read from the process environment; `dotenv` is loaded on demand
//! by the binary. Poll thresholds default to the values the serverless test
//! runs settled on (5s poll, 180s budget, 60s queue warning, 30s/90s running
//! warning/stall).
use std::env;
use std::time::Duration;
use dotenv;

use crate::driver::PollConfig;
use crate::error::{AppError, AppResult};

pub struct Config {
    pub endpoint_url: String,
    pub api_key: String,
    pub output_dir: String,
    pub poll_interval_secs: u64,
    pub job_timeout_secs: u64,
    pub queue_stall_secs: u64,
    pub running_warn_secs: u64,
    pub running_stall_secs: u64,
}

impl Config {
    pub fn dotenv_load() {
        dotenv::dotenv().ok();
    }

    pub fn new() -> AppResult<Self> {
        Ok(Config {
            endpoint_url: env::var("RUNPOD_ENDPOINT_URL").unwrap_or_default(),
            api_key: env::var("RUNPOD_API_KEY").unwrap_or_default(),
            output_dir: env::var("OUTPUT_DIR").unwrap_or_else(|_| "./output".to_string()),
            poll_interval_secs: secs_var("POLL_INTERVAL_SECS", 5)?,
            job_timeout_secs: secs_var("JOB_TIMEOUT_SECS", 180)?,
            queue_stall_secs: secs_var("QUEUE_STALL_SECS", 60)?,
            running_warn_secs: secs_var("RUNNING_WARN_SECS", 30)?,
            running_stall_secs: secs_var("RUNNING_STALL_SECS", 90)?,
        })
    }

    /// Checks the values every remote call depends on.
    pub fn validate(&self) -> AppResult<()> {
        if self.endpoint_url.trim().is_empty() {
            return Err(AppError::Config("RUNPOD_ENDPOINT_URL is not set".to_string()));
        }
        if !self.endpoint_url.starts_with("http://") && !self.endpoint_url.starts_with("https://") {
            return Err(AppError::Config(format!("Invalid endpoint URL '{}'", self.endpoint_url)));
        }
        if self.api_key.trim().is_empty() {
            return Err(AppError::Config("RUNPOD_API_KEY is not set".to_string()));
        }
        if self.poll_interval_secs == 0 || self.job_timeout_secs == 0 {
            return Err(AppError::Config("poll interval and job timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Poll thresholds with stall detection enabled.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            overall_timeout: Duration::from_secs(self.job_timeout_secs),
            queue_stall_threshold: Some(Duration::from_secs(self.queue_stall_secs)),
            running_warn_threshold: Some(Duration::from_secs(self.running_warn_secs)),
            running_stall_threshold: Some(Duration::from_secs(self.running_stall_secs)),
            ..PollConfig::default()
        }
    }

    pub fn print_env_vars() {
        println!("RUNPOD_ENDPOINT_URL: {}", env::var("RUNPOD_ENDPOINT_URL").unwrap_or_else(|_| "<unset>".to_string()));
        println!("RUNPOD_API_KEY: {}", env::var("RUNPOD_API_KEY").map(|k| mask_secret(&k)).unwrap_or_else(|_| "<unset>".to_string()));
        println!("OUTPUT_DIR: {}", env::var("OUTPUT_DIR").unwrap_or_else(|_| "<unset>".to_string()));
        println!("POLL_INTERVAL_SECS: {}", env::var("POLL_INTERVAL_SECS").unwrap_or_else(|_| "<unset>".to_string()));
        println!("JOB_TIMEOUT_SECS: {}", env::var("JOB_TIMEOUT_SECS").unwrap_or_else(|_| "<unset>".to_string()));
    }
}

fn secs_var(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{} must be a whole number of seconds, got '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Keep only the last four characters of a secret for display.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
