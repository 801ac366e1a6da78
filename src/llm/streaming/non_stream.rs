//! Decoding of one complete (non-streamed) chat completion body
//!
//! Produces the same fragment kinds as the streaming path so callers do not
//! care which transport mode was used.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::delta::{arguments_text, string_field, Envelope, ResponseMeta};
use super::tool_call::{native_call_id_or, reconstruct_tool_call};
use super::DecodeOptions;
use crate::llm::{LlmError, MessageFragment};

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think pattern"));

static TOOL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("valid tool_call pattern")
});

/// Assistant message of the first choice, read field by field
#[derive(Debug, Default)]
struct CompletionMessage {
    content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Vec<CompletionToolCall>,
}

impl CompletionMessage {
    fn from_value(value: &Value) -> Self {
        let tool_calls = value
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| serde_json::from_value(call.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            content: string_field(value, "content"),
            reasoning: string_field(value, "reasoning_content")
                .or_else(|| string_field(value, "reasoning")),
            tool_calls,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    id: Option<String>,
    function: Option<CompletionFunction>,
}

#[derive(Debug, Deserialize)]
struct CompletionFunction {
    name: Option<String>,
    arguments: Option<Value>,
}

/// Fragments and metadata decoded from one complete body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBody {
    pub fragments: Vec<MessageFragment>,
    pub meta: ResponseMeta,
}

/// Decode a complete response body
///
/// Fails with [`LlmError::Protocol`] only when the body as a whole is not a
/// chat completion object. Malformed tool-call blocks inside it are dropped.
pub fn decode_complete_body(body: &str, options: DecodeOptions) -> Result<DecodedBody, LlmError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| LlmError::Protocol(format!("Response body is not JSON: {}", e)))?;
    if !value.is_object() {
        return Err(LlmError::Protocol(
            "Response body is not a JSON object".to_string(),
        ));
    }
    let mut completion = Envelope::from_value(value);
    let mut decoded = DecodedBody::default();
    decoded.meta.observe_id(completion.id.take());
    decoded.meta.observe_usage(completion.usage.take());

    if let Some(message) = completion.take_choice_field("message") {
        decoded.fragments = decode_message(CompletionMessage::from_value(&message), options);
    }

    Ok(decoded)
}

fn decode_message(message: CompletionMessage, options: DecodeOptions) -> Vec<MessageFragment> {
    let CompletionMessage {
        content,
        reasoning,
        tool_calls,
    } = message;

    // Reasoning alone also selects the native branch, so content is never
    // tag-scanned once the body used a structured field.
    if reasoning.is_some() || !tool_calls.is_empty() {
        let mut out = Vec::new();
        if let Some(reasoning) = reasoning {
            out.push(MessageFragment::think(reasoning));
        }
        for (position, call) in tool_calls.into_iter().enumerate() {
            let Some(function) = call.function else {
                tracing::debug!("Dropping native tool call without a function");
                continue;
            };
            let Some(name) = function.name.filter(|n| !n.is_empty()) else {
                tracing::debug!("Dropping native tool call without a name");
                continue;
            };
            out.push(MessageFragment::ToolCall {
                id: native_call_id_or(call.id.as_deref()),
                name,
                arguments: arguments_text(function.arguments),
                index: Some(position),
            });
        }
        if let Some(content) = content {
            out.push(MessageFragment::text(content));
        }
        return out;
    }

    match content {
        Some(content) if options.embedded_tags => decode_embedded(&content),
        Some(content) => vec![MessageFragment::text(content)],
        None => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Block {
    Think,
    Tool,
}

/// Apply the tag grammar to a whole content string in one pass
///
/// Emits at most one `Think` (all thinking bodies joined by newlines), then
/// one `ToolCall` per valid block, then the remaining text. Blocks are taken
/// in order of their openers, so tags inside a tool call's JSON stay data.
pub fn decode_embedded(content: &str) -> Vec<MessageFragment> {
    let mut thinking = Vec::new();
    let mut calls = Vec::new();
    let mut remainder = String::new();

    let mut pos = 0;
    while pos < content.len() {
        let next = [
            (Block::Think, THINK_BLOCK.captures_at(content, pos)),
            (Block::Tool, TOOL_BLOCK.captures_at(content, pos)),
        ]
        .into_iter()
        .filter_map(|(block, caps)| {
            let caps = caps?;
            let (whole, body) = (caps.get(0)?, caps.get(1)?);
            Some((block, whole.range(), body.as_str()))
        })
        .min_by_key(|(_, whole, _)| whole.start);

        let Some((block, whole, body)) = next else {
            break;
        };
        remainder.push_str(&content[pos..whole.start]);
        match block {
            Block::Think => thinking.push(body),
            Block::Tool => calls.extend(reconstruct_tool_call(body)),
        }
        pos = whole.end;
    }
    remainder.push_str(&content[pos..]);

    let mut out = Vec::new();
    let thinking = thinking.join("\n");
    if !thinking.is_empty() {
        out.push(MessageFragment::think(thinking));
    }
    out.extend(calls);
    let remainder = remainder.trim();
    if !remainder.is_empty() {
        out.push(MessageFragment::text(remainder));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;

    fn decode(body: Value) -> DecodedBody {
        decode_complete_body(&body.to_string(), DecodeOptions::default()).unwrap()
    }

    fn with_content(content: &str) -> Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 5}
        })
    }

    #[test]
    fn test_plain_content_and_meta() {
        let decoded = decode(with_content("  hello  "));
        assert_eq!(decoded.fragments, vec![MessageFragment::text("hello")]);
        assert_eq!(decoded.meta.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(decoded.meta.usage, Some(TokenUsage::new(7, 5)));
    }

    #[test]
    fn test_embedded_think_tool_and_text() {
        let content = "<think>a</think>pre <tool_call>\n{\"name\":\"x\",\"arguments\":{\"a\":1}}\n</tool_call> post<think>b</think>";
        let decoded = decode(with_content(content));

        assert_eq!(decoded.fragments.len(), 3);
        assert_eq!(decoded.fragments[0], MessageFragment::think("a\nb"));
        match &decoded.fragments[1] {
            MessageFragment::ToolCall {
                name,
                arguments,
                index,
                ..
            } => {
                assert_eq!(name, "x");
                assert_eq!(arguments, "{\"a\":1}");
                assert_eq!(*index, None);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(decoded.fragments[2], MessageFragment::text("pre  post"));
    }

    #[test]
    fn test_invalid_tool_block_dropped_independently() {
        let content = "<tool_call>{broken</tool_call><tool_call>{\"name\":\"ok\"}</tool_call>done";
        let fragments = decode(with_content(content)).fragments;

        assert_eq!(fragments.len(), 2);
        assert!(matches!(&fragments[0], MessageFragment::ToolCall { name, .. } if name == "ok"));
        assert_eq!(fragments[1], MessageFragment::text("done"));
    }

    #[test]
    fn test_unterminated_tags_stay_text() {
        let fragments = decode(with_content("<think>never closed")).fragments;
        assert_eq!(fragments, vec![MessageFragment::text("<think>never closed")]);
    }

    #[test]
    fn test_native_fields_take_precedence() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "reasoning_content": "plan",
                "content": "<think>literal</think>",
                "tool_calls": [
                    {"id": "call_1", "function": {"name": "read", "arguments": "{\"p\":1}"}},
                    {"function": {"name": "ls", "arguments": {"d": "."}}}
                ]
            }}]
        });
        let fragments = decode(body).fragments;

        assert_eq!(fragments[0], MessageFragment::think("plan"));
        assert_eq!(
            fragments[1],
            MessageFragment::ToolCall {
                id: "call_1".into(),
                name: "read".into(),
                arguments: "{\"p\":1}".into(),
                index: Some(0),
            }
        );
        match &fragments[2] {
            MessageFragment::ToolCall {
                id,
                arguments,
                index,
                ..
            } => {
                assert_eq!(id.len(), 36);
                assert_eq!(arguments, "{\"d\":\".\"}");
                assert_eq!(*index, Some(1));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(fragments[3], MessageFragment::text("<think>literal</think>"));
    }

    #[test]
    fn test_think_tag_inside_tool_call_json_is_data() {
        let content = "<tool_call>{\"name\":\"echo\",\"arguments\":{\"s\":\"<think>x</think>\"}}</tool_call>";
        let fragments = decode(with_content(content)).fragments;

        assert_eq!(fragments.len(), 1);
        match &fragments[0] {
            MessageFragment::ToolCall { name, arguments, .. } => {
                assert_eq!(name, "echo");
                assert!(arguments.contains("<think>x</think>"));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_side_fields_keep_content() {
        let decoded = decode(serde_json::json!({
            "id": 5,
            "choices": [{"message": {"content": "still here", "tool_calls": null}}],
            "usage": {"prompt_tokens": null, "completion_tokens": 2}
        }));
        assert_eq!(decoded.fragments, vec![MessageFragment::text("still here")]);
        assert_eq!(decoded.meta.id.as_deref(), Some("5"));
        assert_eq!(decoded.meta.usage, Some(TokenUsage::new(0, 2)));
    }

    #[test]
    fn test_reasoning_without_tool_calls_leaves_tags_in_text() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "reasoning_content": "plan",
                "content": "<tool_call>{\"name\":\"ls\"}</tool_call>"
            }}]
        });
        assert_eq!(
            decode(body).fragments,
            vec![
                MessageFragment::think("plan"),
                MessageFragment::text("<tool_call>{\"name\":\"ls\"}</tool_call>"),
            ]
        );
    }

    #[test]
    fn test_embedded_tags_disabled() {
        let decoded = decode_complete_body(
            &with_content("<think>x</think>").to_string(),
            DecodeOptions {
                embedded_tags: false,
            },
        )
        .unwrap();
        assert_eq!(
            decoded.fragments,
            vec![MessageFragment::text("<think>x</think>")]
        );
    }

    #[test]
    fn test_missing_choices_yields_nothing() {
        let decoded = decode(serde_json::json!({"id": "r", "usage": {"prompt_tokens": 1}}));
        assert!(decoded.fragments.is_empty());
        assert_eq!(decoded.meta.usage, Some(TokenUsage::new(1, 0)));
    }

    #[test]
    fn test_non_object_body_is_protocol_error() {
        for body in ["[1,2]", "not json", "\"text\""] {
            let err = decode_complete_body(body, DecodeOptions::default()).unwrap_err();
            assert_eq!(err.kind(), crate::llm::ErrorKind::Protocol);
        }
    }
}
