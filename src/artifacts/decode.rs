//! Decoding of base64 artifacts from a succeeded job's output.
//!
//! Entries are either a bare base64 string or an object with a `data` field
//! (plus optional `filename`/`name`). A `data:<mime>;base64,` prefix is
//! accepted. Empty entries are skipped; undecodable ones are reported per
//! index without stopping the batch.
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::error::DriverError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Position within the job's output list.
    pub index: usize,
    pub name: Option<String>,
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension guessed from the payload's magic bytes.
    pub fn sniff_extension(&self) -> Option<&'static str> {
        let d = &self.data;
        if d.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some("png")
        } else if d.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some("jpg")
        } else if d.starts_with(b"GIF8") {
            Some("gif")
        } else if d.len() >= 12 && &d[0..4] == b"RIFF" && &d[8..12] == b"WEBP" {
            Some("webp")
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct ArtifactBatch {
    pub artifacts: Vec<Artifact>,
    /// Indices of entries that carried no data.
    pub skipped: Vec<usize>,
    pub failures: Vec<DriverError>,
}

impl ArtifactBatch {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failures.is_empty()
    }

    pub fn entries(&self) -> usize {
        self.artifacts.len() + self.skipped.len() + self.failures.len()
    }
}

/// Locate the artifact list inside an output section.
pub fn artifact_entries(output: &Value) -> &[Value] {
    if let Some(arr) = output.as_array() {
        return arr;
    }
    ["images", "artifacts"]
        .iter()
        .find_map(|key| output.get(*key).and_then(|v| v.as_array()))
        .map(|arr| arr.as_slice())
        .unwrap_or(&[])
}

pub fn decode_artifacts(output: &Value) -> ArtifactBatch {
    let mut batch = ArtifactBatch::default();
    for (index, entry) in artifact_entries(output).iter().enumerate() {
        let (encoded, name) = match entry {
            Value::String(s) => (Some(s.as_str()), None),
            Value::Object(map) => {
                let name = map
                    .get("filename")
                    .or_else(|| map.get("name"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                match map.get("data") {
                    None | Some(Value::Null) => (None, name),
                    Some(Value::String(s)) => (Some(s.as_str()), name),
                    Some(other) => {
                        batch.failures.push(DriverError::ArtifactDecode {
                            index,
                            reason: format!("data field is not a string: {}", other),
                        });
                        continue;
                    }
                }
            }
            Value::Null => (None, None),
            other => {
                batch.failures.push(DriverError::ArtifactDecode {
                    index,
                    reason: format!("unexpected entry: {}", other),
                });
                continue;
            }
        };

        let payload = encoded.map(strip_data_uri).unwrap_or("");
        if payload.trim().is_empty() {
            tracing::warn!(index, "Artifact has no data, skipping");
            batch.skipped.push(index);
            continue;
        }

        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        match STANDARD.decode(compact.as_bytes()) {
            Ok(data) => {
                tracing::debug!(index, bytes = data.len(), "Decoded artifact");
                batch.artifacts.push(Artifact { index, name, data });
            }
            Err(e) => batch.failures.push(DriverError::ArtifactDecode { index, reason: e.to_string() }),
        }
    }
    batch
}

fn strip_data_uri(s: &str) -> &str {
    if s.starts_with("data:") {
        if let Some(pos) = s.find(";base64,") {
            return &s[pos + ";base64,".len()..];
        }
    }
    s
}
