//! Persisting decoded artifacts through a "write named blob" sink.
//!
//! Names follow `{prefix}_{timestamp}_{index}.{ext}`; the diagnostic status
//! record is written as `{response_prefix}_{timestamp}.json`.
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use super::decode::Artifact;
use crate::error::AppResult;

#[async_trait]
pub trait BlobSink: Send + Sync {
    /// Write `bytes` under `name`, returning the number of bytes written.
    async fn write_blob(&self, name: &str, bytes: &[u8]) -> AppResult<u64>;

    /// Human-readable location of a blob, for reporting.
    fn location(&self, name: &str) -> String;
}

/// Filesystem sink rooted at a directory created on first write.
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSink { root: root.into() }
    }
}

#[async_trait]
impl BlobSink for FsSink {
    async fn write_blob(&self, name: &str, bytes: &[u8]) -> AppResult<u64> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(name), bytes).await?;
        Ok(bytes.len() as u64)
    }

    fn location(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct PersistedArtifact {
    pub index: usize,
    pub file_name: String,
    pub location: String,
    pub bytes_written: u64,
}

pub struct ArtifactStore<S: BlobSink> {
    sink: S,
    prefix: String,
    response_prefix: String,
    timestamp: String,
    default_ext: String,
}

impl<S: BlobSink> ArtifactStore<S> {
    pub fn new(sink: S, prefix: impl Into<String>) -> Self {
        ArtifactStore {
            sink,
            prefix: prefix.into(),
            response_prefix: "response".to_string(),
            timestamp: run_timestamp(),
            default_ext: "png".to_string(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn with_response_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.response_prefix = prefix.into();
        self
    }

    pub fn with_default_extension(mut self, ext: impl Into<String>) -> Self {
        self.default_ext = ext.into();
        self
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn file_name_for(&self, artifact: &Artifact) -> String {
        let ext = artifact.sniff_extension().unwrap_or(self.default_ext.as_str());
        format!("{}_{}_{}.{}", self.prefix, self.timestamp, artifact.index, ext)
    }

    /// Write every artifact, in order. Stops at the first sink error.
    pub async fn persist(&self, artifacts: &[Artifact]) -> AppResult<Vec<PersistedArtifact>> {
        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let file_name = self.file_name_for(artifact);
            let bytes_written = self.sink.write_blob(&file_name, &artifact.data).await?;
            tracing::info!(index = artifact.index, bytes = bytes_written, file = %file_name, "Saved artifact");
            written.push(PersistedArtifact {
                index: artifact.index,
                location: self.sink.location(&file_name),
                file_name,
                bytes_written,
            });
        }
        Ok(written)
    }

    /// Save the full last status payload next to the artifacts.
    pub async fn save_response(&self, report: &Value) -> AppResult<String> {
        let file_name = format!("{}_{}.json", self.response_prefix, self.timestamp);
        let body = serde_json::to_vec_pretty(report)?;
        self.sink.write_blob(&file_name, &body).await?;
        Ok(self.sink.location(&file_name))
    }
}

/// Local timestamp used to group one run's files.
pub fn run_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
