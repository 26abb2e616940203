//! In-place edits on a ComfyUI API-format workflow graph.
//!
//! The graph is an object keyed by node id; every node carries a
//! `class_type` and an `inputs` object. The read-only helpers at the bottom
//! also understand the editor ("UI") export, `{"nodes": [{"id", "type"}], "links"}`.
use serde_json::{json, Value};

/// Parse `KEY=VALUE` overrides where KEY is a dotted path like `17.inputs.provider`.
pub fn parse_set_pairs(items: &[String]) -> Result<Vec<(Vec<String>, Value)>, String> {
    items
        .iter()
        .map(|item| {
            let (key, raw) = item
                .split_once('=')
                .ok_or_else(|| format!("Invalid --set '{}', expected KEY=VALUE", item))?;
            if key.trim().is_empty() {
                return Err(format!("Invalid --set '{}', empty key", item));
            }
            let path = key.split('.').map(|p| p.trim().to_string()).collect();
            Ok((path, parse_value(raw)))
        })
        .collect()
}

/// JSON if it parses, otherwise a bool/number/string guess.
pub fn parse_value(src: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(src) {
        return v;
    }
    match src.to_ascii_lowercase().as_str() {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = src.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = src.parse::<f64>() {
        return json!(f);
    }
    Value::String(src.to_string())
}

/// Set the value at `path`. Every parent must already exist as an object.
pub fn apply_set_path(root: &mut Value, path: &[String], new_val: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut cur = root;
    for key in parents {
        match cur.get_mut(key.as_str()) {
            Some(next) if next.is_object() => cur = next,
            _ => return false,
        }
    }
    match cur.as_object_mut() {
        Some(map) => {
            map.insert(last.clone(), new_val);
            true
        }
        None => false,
    }
}

fn class_of(node: &Value) -> Option<&str> {
    node.get("class_type").and_then(|ct| ct.as_str())
}

/// Ids of nodes whose class matches `pred`, sorted numerically where possible.
pub fn node_ids_where(graph: &Value, pred: impl Fn(&str) -> bool) -> Vec<String> {
    let mut ids: Vec<String> = graph
        .as_object()
        .into_iter()
        .flat_map(|o| o.iter())
        .filter(|(_, node)| class_of(node).map_or(false, |ct| pred(ct)))
        .map(|(id, _)| id.clone())
        .collect();
    ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.clone()));
    ids
}

/// Set `inputs.<input>` on every node matching `pred`. Returns the touched ids.
pub fn set_input_where(graph: &mut Value, pred: impl Fn(&str) -> bool, input: &str, value: &Value) -> Vec<String> {
    let ids = node_ids_where(graph, pred);
    for id in &ids {
        if let Some(inputs) = graph
            .get_mut(id.as_str())
            .and_then(|n| n.get_mut("inputs"))
            .and_then(|i| i.as_object_mut())
        {
            inputs.insert(input.to_string(), value.clone());
        }
    }
    ids
}

/// Point every save node at `prefix`, overriding what the workflow had.
pub fn stamp_filename_prefix(graph: &mut Value, prefix: &str) -> Vec<String> {
    set_input_where(graph, |ct| ct.starts_with("SaveImage"), "filename_prefix", &Value::String(prefix.to_string()))
}

/// Set the execution provider on background-removal nodes (`*_RemoveBg`).
pub fn set_provider(graph: &mut Value, provider: &str) -> Vec<String> {
    set_input_where(graph, |ct| ct.ends_with("_RemoveBg"), "provider", &Value::String(provider.to_string()))
}

/// Make `LoadImage` nodes read the uploaded file `name`.
pub fn point_load_image(graph: &mut Value, name: &str) -> Vec<String> {
    set_input_where(graph, |ct| ct == "LoadImage", "image", &Value::String(name.to_string()))
}

/// `(id, class)` for every node, in id order. Accepts API or UI format.
pub fn node_classes(graph: &Value) -> Vec<(String, String)> {
    if let Some(nodes) = graph.get("nodes").and_then(|n| n.as_array()) {
        let mut classes: Vec<(String, String)> = nodes
            .iter()
            .filter_map(|node| {
                let id = match node.get("id")? {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let class = node.get("type")?.as_str()?.to_string();
                Some((id, class))
            })
            .collect();
        classes.sort_by_key(|(id, _)| (id.parse::<u64>().unwrap_or(u64::MAX), id.clone()));
        return classes;
    }
    node_ids_where(graph, |_| true)
        .into_iter()
        .filter_map(|id| {
            let class = class_of(graph.get(id.as_str())?)?.to_string();
            Some((id, class))
        })
        .collect()
}

/// Required classes that no node in the graph provides.
pub fn missing_classes(graph: &Value, required: &[String]) -> Vec<String> {
    let present: Vec<String> = node_classes(graph).into_iter().map(|(_, c)| c).collect();
    required
        .iter()
        .filter(|r| !present.iter().any(|c| c == *r))
        .cloned()
        .collect()
}
