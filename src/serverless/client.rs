//! Thin HTTP client for a RunPod serverless endpoint.
//!
//! - `create_job` posts the payload to `/run`.
//! - `job_status` fetches `/status/<id>`.
//! - `cancel_job` posts to `/cancel/<id>`.
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

use super::types::{StatusReport, SubmitResponse};
use super::JobApi;
use crate::error::{AppError, AppResult, DriverError};

/// Per-call request timeouts.
#[derive(Debug, Clone)]
pub struct RequestTimeouts {
    pub submit: Duration,
    pub status: Duration,
    pub cancel: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        RequestTimeouts {
            submit: Duration::from_secs(30),
            status: Duration::from_secs(10),
            cancel: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct RunPodClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeouts: RequestTimeouts,
}

impl RunPodClient {
    /// Accepts the endpoint base or its `/run` / `/runsync` URL.
    pub fn new(endpoint_url: &str, api_key: impl Into<String>) -> Self {
        RunPodClient {
            client: Client::new(),
            base_url: normalize_endpoint(endpoint_url),
            api_key: api_key.into(),
            timeouts: RequestTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: RequestTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authed(&self, builder: RequestBuilder, timeout: Duration) -> RequestBuilder {
        builder.bearer_auth(&self.api_key).timeout(timeout)
    }
}

#[async_trait]
impl JobApi for RunPodClient {
    async fn create_job(&self, payload: &Value) -> AppResult<String> {
        let url = format!("{}/run", self.base_url);
        tracing::info!("Submitting job to {}", url);

        let response = self
            .authed(self.client.post(&url), self.timeouts.submit)
            .json(payload)
            .send()
            .await
            .map_err(|e| DriverError::Submission(format!("transport error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unable to read error body".to_string());
            let message = format!("Failed to submit job. Status: {}, Body: {}", status, body);
            tracing::error!("{}", message);
            return Err(DriverError::Submission(message).into());
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| DriverError::Submission(format!("unparseable response: {}", e)))?;
        match parsed.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                tracing::info!(job_id = %id, "Job submitted");
                Ok(id)
            }
            None => Err(DriverError::Submission("response carried no job id".to_string()).into()),
        }
    }

    async fn job_status(&self, job_id: &str) -> AppResult<StatusReport> {
        let url = format!("{}/status/{}", self.base_url, job_id);
        let response = self
            .authed(self.client.get(&url), self.timeouts.status)
            .send()
            .await
            .map_err(AppError::HttpClient)?;

        if response.status().is_success() {
            let raw: Value = response.json().await.map_err(AppError::HttpClient)?;
            Ok(StatusReport::from_value(raw))
        } else {
            Err(AppError::Serverless(format!("Failed to get status for {}: {:?}", job_id, response.status())))
        }
    }

    async fn cancel_job(&self, job_id: &str) -> AppResult<()> {
        let url = format!("{}/cancel/{}", self.base_url, job_id);
        let response = self
            .authed(self.client.post(&url), self.timeouts.cancel)
            .send()
            .await
            .map_err(AppError::HttpClient)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::Serverless(format!("Failed to cancel {}: {:?}", job_id, response.status())))
        }
    }
}

/// Strip a trailing slash and any `/run` or `/runsync` suffix.
pub fn normalize_endpoint(endpoint_url: &str) -> String {
    let trimmed = endpoint_url.trim().trim_end_matches('/');
    let base = trimmed
        .strip_suffix("/runsync")
        .or_else(|| trimmed.strip_suffix("/run"))
        .unwrap_or(trimmed);
    base.to_string()
}
