use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::sync::Arc;

use crate::error::ConnectorError;

/// Successful tool result: the data as structured content plus the same JSON as text
/// for hosts that only read content blocks.
pub fn structured_result<T: Serialize>(data: &T) -> Result<CallToolResult, ConnectorError> {
    let value = serde_json::to_value(data)?;

    // Convert to an object map; if it's not an object, wrap under a `data` key.
    let map: JsonMap<String, JsonValue> = match value {
        JsonValue::Object(m) => m,
        other => {
            let mut m = JsonMap::new();
            m.insert("data".to_string(), other);
            m
        }
    };
    let structured = JsonValue::Object(map);
    let text = serde_json::to_string_pretty(&structured)?;

    Ok(CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    })
}

/// The one place a [`ConnectorError`] becomes something the host sees.
pub fn tool_error_result(err: &ConnectorError) -> CallToolResult {
    let mut error = json!({
        "kind": err.code_str(),
        "message": err.public_message(),
    });
    if let Some(status) = err.status() {
        error["status"] = json!(status);
    }
    let text = format!("{}: {}", err.code_str(), err.public_message());

    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: Some(json!({ "error": error })),
        is_error: Some(true),
        meta: None,
    }
}

/// Tool input schemas are written as `json!` objects; anything else becomes an
/// empty schema rather than a panic.
pub fn input_schema(schema: JsonValue) -> Arc<JsonMap<String, JsonValue>> {
    match schema {
        JsonValue::Object(map) => Arc::new(map),
        _ => Arc::new(JsonMap::new()),
    }
}
