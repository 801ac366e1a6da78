//! Per-frame delta classification and response metadata tracking

use serde::Deserialize;
use serde_json::Value;

use super::tag_parser::TagStreamParser;
use super::tool_call::native_call_id_or;
use crate::llm::{MessageFragment, TokenUsage};

// ============================================================================
// Wire types
// ============================================================================

/// Top-level fields of a frame or complete body
///
/// Each field is read on its own, so a side field of an unexpected shape
/// (a `null` counter, a numeric id) never costs the frame its content.
#[derive(Debug, Default)]
pub(crate) struct Envelope {
    pub id: Option<String>,
    pub usage: Option<WireUsage>,
    /// First entry of `choices`, still undecoded
    pub choice: Option<Value>,
}

impl Envelope {
    pub(crate) fn from_value(mut value: Value) -> Self {
        let id = match value.get("id") {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        let usage = value
            .get_mut("usage")
            .map(Value::take)
            .and_then(|usage| match serde_json::from_value(usage) {
                Ok(usage) => Some(usage),
                Err(e) => {
                    tracing::debug!(target: "llm", "Ignoring malformed usage: {}", e);
                    None
                }
            });
        let choice = value
            .get_mut("choices")
            .and_then(Value::as_array_mut)
            .filter(|choices| !choices.is_empty())
            .map(|choices| choices.swap_remove(0));
        Self { id, usage, choice }
    }

    /// Take `key` out of the first choice (`delta` or `message`)
    pub(crate) fn take_choice_field(&mut self, key: &str) -> Option<Value> {
        self.choice
            .as_mut()
            .and_then(|choice| choice.get_mut(key))
            .map(Value::take)
            .filter(Value::is_object)
    }
}

/// Non-empty string at `key`; any other shape reads as absent
pub(crate) fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Default)]
pub struct ChunkDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

impl ChunkDelta {
    /// Read a delta object field by field. A tool-call entry that does not
    /// decode is skipped on its own.
    pub fn from_value(value: &Value) -> Self {
        let tool_calls = value.get("tool_calls").and_then(Value::as_array).map(|calls| {
            calls
                .iter()
                .filter_map(|call| match serde_json::from_value(call.clone()) {
                    Ok(call) => Some(call),
                    Err(e) => {
                        tracing::debug!(target: "llm", "Skipping malformed tool call delta: {}", e);
                        None
                    }
                })
                .collect()
        });
        Self {
            content: string_field(value, "content"),
            reasoning_content: string_field(value, "reasoning_content"),
            reasoning: string_field(value, "reasoning"),
            tool_calls,
        }
    }

    /// Reasoning text, preferring `reasoning_content` over the `reasoning` alias
    fn reasoning_text(&mut self) -> Option<String> {
        self.reasoning_content
            .take()
            .filter(|s| !s.is_empty())
            .or_else(|| self.reasoning.take().filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<Value>,
}

/// `usage` object shared by streamed frames and complete bodies.
/// Missing and `null` counters both read as 0.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WireUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        let mut out = TokenUsage::new(
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
        );
        if let Some(total) = usage.total_tokens {
            out.total_tokens = total;
        }
        out
    }
}

/// Argument payloads are usually strings; anything else is kept as its JSON text.
pub(crate) fn arguments_text(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

// ============================================================================
// Usage / identity
// ============================================================================

/// Response id and token usage, last write wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub id: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl ResponseMeta {
    pub(crate) fn observe_id(&mut self, id: Option<String>) {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            self.id = Some(id);
        }
    }

    pub(crate) fn observe_usage(&mut self, usage: Option<WireUsage>) {
        if let Some(usage) = usage {
            self.usage = Some(usage.into());
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Routes each delta either straight to fragments (native dialect) or through
/// the tag parser (embedded dialect).
///
/// The first structured reasoning or tool-call field flips the response to
/// native for good: later content is plain text even if it looks like a tag.
#[derive(Debug)]
pub struct DeltaClassifier {
    tags: TagStreamParser,
    embedded_tags: bool,
    native_seen: bool,
}

impl DeltaClassifier {
    pub fn new(embedded_tags: bool) -> Self {
        Self {
            tags: TagStreamParser::new(),
            embedded_tags,
            native_seen: false,
        }
    }

    /// Whether a native reasoning or tool-call field has been seen
    pub fn native_seen(&self) -> bool {
        self.native_seen
    }

    pub fn classify(&mut self, mut delta: ChunkDelta) -> Vec<MessageFragment> {
        let mut out = Vec::new();

        if let Some(reasoning) = delta.reasoning_text() {
            self.mark_native(&mut out);
            out.push(MessageFragment::think(reasoning));
        }

        for (position, call) in delta.tool_calls.take().unwrap_or_default().into_iter().enumerate() {
            self.mark_native(&mut out);
            let index = call.index.unwrap_or(position);
            let function = call.function.unwrap_or_default();
            let arguments = arguments_text(function.arguments);

            match function.name.filter(|name| !name.is_empty()) {
                Some(name) => out.push(MessageFragment::ToolCall {
                    id: native_call_id_or(call.id.as_deref()),
                    name,
                    arguments,
                    index: Some(index),
                }),
                None if !arguments.is_empty() => out.push(MessageFragment::ToolCallArguments {
                    index,
                    delta: arguments,
                }),
                None => {}
            }
        }

        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            if self.native_seen || !self.embedded_tags {
                out.push(MessageFragment::text(content));
            } else {
                out.extend(self.tags.process(&content));
            }
        }

        out
    }

    /// Drain the tag parser at stream end. No-op once the response went native.
    pub fn finish(&mut self) -> Vec<MessageFragment> {
        if self.native_seen || !self.embedded_tags {
            return Vec::new();
        }
        self.tags.flush()
    }

    fn mark_native(&mut self, out: &mut Vec<MessageFragment>) {
        if self.native_seen {
            return;
        }
        self.native_seen = true;
        // Text still held back by the retention window belongs before the
        // first native fragment.
        if self.embedded_tags {
            out.extend(self.tags.flush());
        }
    }
}
