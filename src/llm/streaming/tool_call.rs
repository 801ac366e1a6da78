//! Reconstruction of tool calls embedded as `<tool_call>{...}</tool_call>` text
//!
//! Call ids are synthesized locally when the upstream does not provide one.
//! They are random and process-local: a retried request gets different ids.

use serde_json::Value;

use crate::llm::MessageFragment;

/// Id for a call reconstructed from embedded tags: `call_` + 16 hex chars
pub fn embedded_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..16])
}

/// Id for a native call whose upstream entry carried no id
pub fn native_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Upstream id if present and non-empty, otherwise a synthesized one
pub fn native_call_id_or(upstream: Option<&str>) -> String {
    match upstream {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => native_call_id(),
    }
}

/// Parse the text accumulated between `<tool_call>` and `</tool_call>`.
///
/// Returns `None` when the body is not JSON, or not an object with a string
/// `name`. The block is then dropped; nothing is emitted for it.
pub fn reconstruct_tool_call(body: &str) -> Option<MessageFragment> {
    let value: Value = match serde_json::from_str(body.trim()) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Dropping <tool_call> block with invalid JSON: {}", e);
            return None;
        }
    };

    let Some(object) = value.as_object() else {
        tracing::debug!("Dropping <tool_call> block: body is not a JSON object");
        return None;
    };

    let Some(name) = object.get("name").and_then(Value::as_str) else {
        tracing::debug!("Dropping <tool_call> block without a string name");
        return None;
    };
    let name = name.to_string();

    let arguments = object
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    Some(MessageFragment::ToolCall {
        id: embedded_call_id(),
        name,
        arguments: arguments.to_string(),
        index: None,
    })
}
