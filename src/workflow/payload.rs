//! Loading workflows and input images, and building the job payload.
//!
//! The serverless worker expects
//! `{"input": {"workflow": {...}, "images": [{"name", "image"}]}}` where
//! `image` is the base64 file content.
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct InputImage {
    pub name: String,
    pub base64: String,
}

async fn read_graph(path: &Path) -> AppResult<Value> {
    let data = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Workflow(format!("Failed to read workflow file {}: {}", path.display(), e)))?;
    let raw: Value = serde_json::from_str(&data)
        .map_err(|e| AppError::Workflow(format!("Failed to parse workflow JSON: {}", e)))?;
    Ok(match raw.get("prompt") {
        Some(inner) => inner.clone(),
        None => raw,
    })
}

/// Read an API-format workflow, unwrapping a `{"prompt": {...}}` envelope.
pub async fn load_workflow(path: &Path) -> AppResult<Value> {
    let graph = read_graph(path).await?;
    if !is_api_graph(&graph) {
        return Err(AppError::Workflow(format!(
            "{} is not an API-format workflow (export it with \"Save (API)\")",
            path.display()
        )));
    }
    Ok(graph)
}

/// Read a workflow for inspection only; the editor export is accepted too.
pub async fn load_any_workflow(path: &Path) -> AppResult<Value> {
    let graph = read_graph(path).await?;
    if !is_api_graph(&graph) && !is_ui_graph(&graph) {
        return Err(AppError::Workflow(format!("{} is not a ComfyUI workflow", path.display())));
    }
    Ok(graph)
}

/// Editor export: a `nodes` array of `{"id", "type"}` entries.
pub fn is_ui_graph(graph: &Value) -> bool {
    graph.get("nodes").map_or(false, |n| n.is_array())
}

/// True if at least one entry looks like a node with a `class_type`.
pub fn is_api_graph(graph: &Value) -> bool {
    graph
        .as_object()
        .map_or(false, |obj| obj.values().any(|node| node.get("class_type").and_then(|ct| ct.as_str()).is_some()))
}

pub async fn load_input_image(path: &Path, name: Option<&str>) -> AppResult<InputImage> {
    let bytes = fs::read(path).await?;
    let name = match name {
        Some(n) => n.to_string(),
        None => path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input_image.png".to_string()),
    };
    Ok(InputImage { name, base64: STANDARD.encode(bytes) })
}

pub fn build_payload(workflow: Value, images: &[InputImage]) -> Value {
    let images: Vec<Value> = images
        .iter()
        .map(|img| json!({"name": img.name, "image": img.base64}))
        .collect();
    json!({"input": {"workflow": workflow, "images": images}})
}
