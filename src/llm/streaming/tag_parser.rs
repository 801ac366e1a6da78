//! Streaming parser for reasoning and tool calls embedded as inline tags
//!
//! Some backends do not decompose their output: reasoning arrives wrapped in
//! `<think>...</think>` and tool calls as `<tool_call>{json}</tool_call>`
//! inside the plain content field. Deltas can cut a delimiter anywhere, so the
//! parser always withholds a short tail of unclassified text until the next
//! delivery (or `flush`) proves it is not the start of a delimiter.

use crate::llm::MessageFragment;

use super::tool_call::reconstruct_tool_call;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const TOOL_OPEN: &str = "<tool_call>";
const TOOL_CLOSE: &str = "</tool_call>";

/// Characters withheld at the end of the buffer in `Normal` and `InThink`.
///
/// One less than the longest delimiter, so any partial delimiter fits.
pub const RETENTION_CHARS: usize = TOOL_CLOSE.len() - 1;

/// Which region of the text the parser is currently inside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Normal,
    InThink,
    InTool,
}

/// Splits streamed content into text, thinking and reconstructed tool calls.
#[derive(Debug, Default)]
pub struct TagStreamParser {
    state: ParserState,
    /// Arrived text not yet classified
    pending: String,
    /// Raw text of the open `<tool_call>` region. Never emitted piecemeal.
    tool_buffer: String,
}

impl TagStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed one content delta and return whatever can be safely emitted.
    pub fn process(&mut self, chunk: &str) -> Vec<MessageFragment> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();

        loop {
            match self.state {
                ParserState::Normal => {
                    if let Some((idx, tag_len, next)) = find_opener(&self.pending) {
                        if idx > 0 {
                            out.push(MessageFragment::text(&self.pending[..idx]));
                        }
                        self.pending.drain(..idx + tag_len);
                        self.state = next;
                        continue;
                    }

                    if let Some(text) = take_unretained(&mut self.pending) {
                        out.push(MessageFragment::text(text));
                    }
                    break;
                }
                ParserState::InThink => {
                    if let Some(idx) = self.pending.find(THINK_CLOSE) {
                        if idx > 0 {
                            out.push(MessageFragment::think(&self.pending[..idx]));
                        }
                        self.pending.drain(..idx + THINK_CLOSE.len());
                        self.state = ParserState::Normal;
                        continue;
                    }

                    if let Some(think) = take_unretained(&mut self.pending) {
                        out.push(MessageFragment::think(think));
                    }
                    break;
                }
                ParserState::InTool => {
                    // Resume the closer search just before the previous end so a
                    // delimiter cut between deliveries is still seen.
                    let mut scan_from = self
                        .tool_buffer
                        .len()
                        .saturating_sub(TOOL_CLOSE.len() - 1);
                    while !self.tool_buffer.is_char_boundary(scan_from) {
                        scan_from -= 1;
                    }
                    self.tool_buffer.push_str(&self.pending);
                    self.pending.clear();

                    let Some(rel) = self.tool_buffer[scan_from..].find(TOOL_CLOSE) else {
                        break;
                    };
                    let idx = scan_from + rel;
                    self.pending = self.tool_buffer.split_off(idx + TOOL_CLOSE.len());
                    self.tool_buffer.truncate(idx);
                    let body = std::mem::take(&mut self.tool_buffer);
                    self.state = ParserState::Normal;

                    if let Some(call) = reconstruct_tool_call(&body) {
                        out.push(call);
                    }
                }
            }
        }

        out
    }

    /// Emit everything still buffered. Call once when the content ends.
    ///
    /// An unterminated `<think>` region is surfaced as thinking. An
    /// unterminated `<tool_call>` region is surfaced as plain text rather than
    /// dropped, because there is no later chance to recover it.
    pub fn flush(&mut self) -> Vec<MessageFragment> {
        let pending = std::mem::take(&mut self.pending);
        let state = std::mem::take(&mut self.state);

        match state {
            ParserState::Normal if !pending.is_empty() => vec![MessageFragment::text(pending)],
            ParserState::InThink if !pending.is_empty() => vec![MessageFragment::think(pending)],
            ParserState::InTool => {
                let mut salvage = std::mem::take(&mut self.tool_buffer);
                salvage.push_str(&pending);
                if salvage.is_empty() {
                    return Vec::new();
                }
                tracing::warn!(
                    "Stream ended inside an unterminated <tool_call>; emitting {} bytes as text",
                    salvage.len()
                );
                vec![MessageFragment::text(salvage)]
            }
            _ => Vec::new(),
        }
    }
}

/// Earliest complete opener: (byte index, delimiter length, state it opens)
fn find_opener(s: &str) -> Option<(usize, usize, ParserState)> {
    let think = s.find(THINK_OPEN);
    let tool = s.find(TOOL_OPEN);
    match (think, tool) {
        (Some(a), Some(b)) if b < a => Some((b, TOOL_OPEN.len(), ParserState::InTool)),
        (Some(a), _) => Some((a, THINK_OPEN.len(), ParserState::InThink)),
        (None, Some(b)) => Some((b, TOOL_OPEN.len(), ParserState::InTool)),
        (None, None) => None,
    }
}

/// Remove and return everything except the last `RETENTION_CHARS` characters.
fn take_unretained(buffer: &mut String) -> Option<String> {
    let (cut, _) = buffer.char_indices().rev().nth(RETENTION_CHARS - 1)?;
    if cut == 0 {
        return None;
    }
    let rest = buffer.split_off(cut);
    Some(std::mem::replace(buffer, rest))
}
