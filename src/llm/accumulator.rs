//! Folding a fragment sequence into one assistant turn

use futures::StreamExt;

use crate::llm::streaming::ToolCallTracker;
use crate::llm::{LlmError, LlmResponse, MessageFragment, ResponseStream, TokenUsage};

/// Accumulates fragments of one response into an [`LlmResponse`]
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    /// Accumulated text content
    pub text: String,
    /// Accumulated thinking content
    pub thinking: String,
    tools: ToolCallTracker,
    /// Token usage (if provided at end)
    pub usage: Option<TokenUsage>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one fragment and accumulate its content
    pub fn process(&mut self, fragment: &MessageFragment) {
        match fragment {
            MessageFragment::Text { text } => self.text.push_str(text),
            MessageFragment::Think { think } => self.thinking.push_str(think),
            MessageFragment::ToolCall { .. } | MessageFragment::ToolCallArguments { .. } => {
                self.tools.observe(fragment)
            }
        }
    }

    pub fn set_usage(&mut self, usage: Option<TokenUsage>) {
        self.usage = usage;
    }

    /// Build the final LlmResponse, tool calls in emission order
    pub fn build(self) -> LlmResponse {
        let tool_calls = self.tools.into_calls();

        if tool_calls.is_empty() {
            LlmResponse::Text {
                text: self.text,
                usage: self.usage,
            }
        } else if self.text.trim().is_empty() {
            LlmResponse::ToolCalls {
                calls: tool_calls,
                usage: self.usage,
            }
        } else {
            LlmResponse::Mixed {
                text: Some(self.text),
                tool_calls,
                usage: self.usage,
            }
        }
    }
}

/// Drain a response stream into one turn, calling `on_fragment` as fragments arrive
///
/// Returns the folded response and the accumulated thinking text.
pub async fn collect_turn<F>(
    mut stream: ResponseStream,
    mut on_fragment: F,
) -> Result<(LlmResponse, String), LlmError>
where
    F: FnMut(&MessageFragment),
{
    let mut turn = TurnAccumulator::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        on_fragment(&fragment);
        turn.process(&fragment);
    }
    turn.set_usage(stream.usage().cloned());
    let thinking = std::mem::take(&mut turn.thinking);
    Ok((turn.build(), thinking))
}

/// Running token totals for a session
///
/// Owned by whoever drives the conversation and passed along explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUsage {
    pub turns: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl SessionUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished turn. Turns without usage still count.
    pub fn record(&mut self, usage: Option<&TokenUsage>) {
        self.turns += 1;
        if let Some(usage) = usage {
            self.input_tokens += u64::from(usage.input_tokens);
            self.output_tokens += u64::from(usage.output_tokens);
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::streaming::DecodeOptions;
    use crate::llm::ResponseMode;

    #[test]
    fn test_text_only_turn() {
        let mut turn = TurnAccumulator::new();
        turn.process(&MessageFragment::think("plan"));
        turn.process(&MessageFragment::text("Hel"));
        turn.process(&MessageFragment::text("lo"));
        assert_eq!(turn.thinking, "plan");

        let response = turn.build();
        assert_eq!(response.text(), Some("Hello"));
        assert!(response.tool_calls().is_empty());
    }

    #[test]
    fn test_mixed_turn_keeps_call_order() {
        let mut turn = TurnAccumulator::new();
        turn.process(&MessageFragment::text("Reading both files."));
        for (index, name) in ["first", "second"].iter().enumerate() {
            turn.process(&MessageFragment::ToolCall {
                id: format!("call_{index}"),
                name: name.to_string(),
                arguments: String::new(),
                index: Some(index),
            });
        }
        turn.process(&MessageFragment::ToolCallArguments {
            index: 1,
            delta: "{}".into(),
        });
        turn.process(&MessageFragment::ToolCallArguments {
            index: 0,
            delta: "{\"a\":1}".into(),
        });
        turn.set_usage(Some(TokenUsage::new(10, 4)));

        let response = turn.build();
        assert!(matches!(response, LlmResponse::Mixed { .. }));
        let calls = response.tool_calls();
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[0].arguments, "{\"a\":1}");
        assert_eq!(calls[1].arguments, "{}");
        assert_eq!(response.usage().map(|u| u.total_tokens), Some(14));
    }

    #[test]
    fn test_whitespace_text_with_calls_is_tool_calls() {
        let mut turn = TurnAccumulator::new();
        turn.process(&MessageFragment::text("\n"));
        turn.process(&MessageFragment::ToolCall {
            id: "call_x".into(),
            name: "ls".into(),
            arguments: "{}".into(),
            index: None,
        });
        assert!(matches!(turn.build(), LlmResponse::ToolCalls { .. }));
    }

    #[tokio::test]
    async fn test_collect_turn_reports_usage_and_fragments() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"<think>why</think>because\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n"
        );
        let stream =
            ResponseStream::from_body(body, ResponseMode::Streaming, DecodeOptions::default());

        let mut seen = 0;
        let (response, thinking) = collect_turn(stream, |_| seen += 1).await.unwrap();
        assert!(seen >= 2);
        assert_eq!(thinking, "why");
        assert_eq!(response.text(), Some("because"));
        assert_eq!(response.usage(), Some(&TokenUsage::new(5, 2)));
    }

    #[test]
    fn test_session_usage_accumulates() {
        let mut session = SessionUsage::new();
        session.record(Some(&TokenUsage::new(10, 2)));
        session.record(None);
        session.record(Some(&TokenUsage::new(5, 3)));

        assert_eq!(session.turns, 3);
        assert_eq!(session.input_tokens, 15);
        assert_eq!(session.output_tokens, 5);
        assert_eq!(session.total_tokens(), 20);
    }
}
