//! Response decoding for the chat-completions wire format
//!
//! This module turns raw transport bytes into an ordered sequence of
//! [`MessageFragment`]s:
//! - [`SseDecoder`] splits bytes into `data:` lines and recognizes `[DONE]`
//! - [`StreamDecoder`] decodes each frame and routes its delta through the
//!   [`DeltaClassifier`], tracking id and usage on the way
//! - [`non_stream`] does the same for one complete JSON body

mod delta;
pub mod non_stream;
mod tag_parser;
mod tool_call;
mod tool_tracker;

pub use delta::{DeltaClassifier, ResponseMeta};
pub use tag_parser::{ParserState, TagStreamParser, RETENTION_CHARS};
pub use tool_call::{embedded_call_id, native_call_id, reconstruct_tool_call};
pub use tool_tracker::ToolCallTracker;

use crate::llm::{raw_log, MessageFragment};

use delta::{ChunkDelta, Envelope};

/// Literal payload that ends an event stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Decoder switches that do not depend on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Scan plain content for `<think>` / `<tool_call>` regions. Dialects
    /// that always decompose their output can turn this off.
    pub embedded_tags: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            embedded_tags: true,
        }
    }
}

/// One meaningful line of an event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` line, prefix stripped
    Data(String),
    /// The terminator sentinel
    Done,
}

/// Server-Sent Events line decoder
///
/// Buffers incoming bytes and extracts complete `data:` lines. Handles edge
/// cases like:
/// - Lines split across multiple chunks
/// - Multiple lines in a single chunk
/// - Multi-byte characters split across chunks (bytes are only decoded once
///   the whole line has arrived)
/// - Final line without trailing newline
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create a new SSE decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Push incoming bytes and extract every complete line
    ///
    /// Blank lines and lines without a `data:` prefix are dropped.
    /// Incomplete lines remain buffered for the next `push()` or `finish()`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(line) = parse_line(&self.buffer[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        lines
    }

    /// Flush any remaining buffered content
    ///
    /// Call this when the transport ends to extract a final line that had no
    /// trailing newline.
    pub fn finish(&mut self) -> Vec<SseLine> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseLine> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let payload = line.strip_prefix("data:")?.trim();
    if payload == DONE_SENTINEL {
        Some(SseLine::Done)
    } else {
        Some(SseLine::Data(payload.to_string()))
    }
}

/// Incremental decoder for one streamed response
///
/// Synchronous core of the streaming path: feed it transport bytes, get
/// fragments back. Once the terminator is seen every later byte is ignored.
#[derive(Debug)]
pub struct StreamDecoder {
    sse: SseDecoder,
    classifier: DeltaClassifier,
    meta: ResponseMeta,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            sse: SseDecoder::new(),
            classifier: DeltaClassifier::new(options.embedded_tags),
            meta: ResponseMeta::default(),
            finished: false,
        }
    }

    /// Response id and usage observed so far
    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    /// True once the terminator was seen or `finish` was called
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<MessageFragment> {
        if self.finished {
            return Vec::new();
        }
        let lines = self.sse.push(bytes);
        self.handle_lines(lines)
    }

    /// Signal the end of the transport and drain everything still buffered
    pub fn finish(&mut self) -> Vec<MessageFragment> {
        if self.finished {
            return Vec::new();
        }
        let lines = self.sse.finish();
        let mut out = self.handle_lines(lines);
        if !self.finished {
            out.extend(self.terminate());
        }
        out
    }

    fn handle_lines(&mut self, lines: Vec<SseLine>) -> Vec<MessageFragment> {
        let mut out = Vec::new();
        for line in lines {
            match line {
                SseLine::Done => {
                    out.extend(self.terminate());
                    break;
                }
                SseLine::Data(payload) => {
                    raw_log::append_raw_line(&payload);
                    self.handle_payload(&payload, &mut out);
                }
            }
        }
        out
    }

    fn handle_payload(&mut self, payload: &str, out: &mut Vec<MessageFragment>) {
        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Skipping undecodable stream frame: {}", e);
                return;
            }
        };

        let mut frame = Envelope::from_value(value);
        self.meta.observe_id(frame.id.take());
        self.meta.observe_usage(frame.usage.take());

        // Frames without choices are keepalives or usage-only trailers.
        if let Some(delta) = frame.take_choice_field("delta") {
            out.extend(self.classifier.classify(ChunkDelta::from_value(&delta)));
        }
    }

    fn terminate(&mut self) -> Vec<MessageFragment> {
        self.finished = true;
        self.classifier.finish()
    }
}
