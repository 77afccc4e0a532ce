//! Payloads for `richInspectVariables`.
//!
//! Values are rendered as an `application/json` tree that notebook front
//! ends show in their variable inspector. Standard containers are expanded
//! one level by evaluating `name[i]` for each element.

use crate::engine::DebugEngine;
use crate::{Error, Result};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Upper bound on elements evaluated for a single container.
pub const MAX_CONTAINER_ELEMENTS: usize = 256;

const CONTAINER_TYPES: &[&str] = &[
    "std::vector",
    "std::array",
    "std::list",
    "std::deque",
    "std::map",
    "std::set",
    "std::unordered_map",
    "std::unordered_set",
];

pub fn is_container_type(type_name: &str) -> bool {
    CONTAINER_TYPES.iter().any(|c| type_name.contains(c))
}

/// Element count from a summary such as `size=3` or `size = 3`.
pub fn container_size(value: &str) -> usize {
    let mut rest = value;
    while let Some(pos) = rest.find("size") {
        rest = &rest[pos + "size".len()..];
        let Some(after_eq) = rest.trim_start().strip_prefix('=') else {
            continue;
        };
        let digits: String = after_eq
            .trim_start()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(size) = digits.parse() {
            return size;
        }
    }
    0
}

/// Placeholder returned when nothing is stopped.
pub fn unavailable(name: &str) -> Value {
    json!({
        "data": {
            "application/json": {
                "type": "unavailable",
                "name": name,
                "message": "Variable not accessible - no active debugging session",
                "suggestions": [
                    "Set a breakpoint and run the program",
                    "Ensure the variable is in scope",
                    "Check if the program is currently stopped"
                ]
            }
        },
        "metadata": {
            "application/json": {
                "available": false,
                "reason": "no_stopped_threads"
            }
        }
    })
}

/// Evaluates `name` in `engine_frame` and renders it.
///
/// `client_frame` is echoed back so the front end can correlate the reply.
pub async fn inspect(
    engine: &dyn DebugEngine,
    name: &str,
    engine_frame: Option<i64>,
    client_frame: Option<i64>,
) -> Result<Value> {
    let value = engine
        .evaluate(name, engine_frame)
        .await
        .map_err(|e| Error::Engine(format!("Variable '{}' not found or not accessible: {}", name, e)))?;
    let type_name = value.type_name.unwrap_or_else(|| "unknown".to_string());

    let mut info = json!({
        "type": "variable",
        "name": name,
        "value": &value.result,
        "valueType": type_name,
        "frameId": client_frame,
        "timestamp": SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    });

    if is_container_type(&type_name) {
        let size = container_size(&value.result);
        info["isContainer"] = json!(true);
        info["size"] = json!(size);
        info["leaf"] = json!(false);
        info["hasChildren"] = json!(size > 0);
        info["children"] = Value::Array(container_children(engine, name, engine_frame, size).await);
        info["expanded"] = json!(false);
    } else {
        info["isContainer"] = json!(false);
        info["leaf"] = json!(true);
        info["hasChildren"] = json!(false);
    }

    let expandable = info["hasChildren"].clone();
    Ok(json!({
        "data": { "application/json": info },
        "metadata": {
            "application/json": {
                "version": "1.0",
                "renderer": "variable-inspector",
                "expandable": expandable,
                "rootVariable": name,
                "capabilities": {
                    "tree": true,
                    "search": true,
                    "filter": true,
                    "export": true
                }
            }
        }
    }))
}

async fn container_children(
    engine: &dyn DebugEngine,
    name: &str,
    engine_frame: Option<i64>,
    size: usize,
) -> Vec<Value> {
    let mut children = Vec::new();

    for index in 0..size.min(MAX_CONTAINER_ELEMENTS) {
        let expression = format!("{}[{}]", name, index);
        let element = match engine.evaluate(&expression, engine_frame).await {
            Ok(element) => element,
            Err(e) => {
                debug!("Skipping {}: {}", expression, e);
                continue;
            }
        };
        let element_type = element.type_name.unwrap_or_else(|| "unknown".to_string());

        let mut child = json!({
            "type": "element",
            "name": format!("[{}]", index),
            "value": &element.result,
            "valueType": element_type,
            "index": index,
            "leaf": true,
        });
        if is_container_type(&element_type) {
            child["leaf"] = json!(false);
            child["hasChildren"] = json!(true);
            child["size"] = json!(container_size(&element.result));
        }
        children.push(child);
    }

    children
}
