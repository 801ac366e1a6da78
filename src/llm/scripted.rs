//! Replay provider serving captured response bodies
//!
//! Each `generate` call returns the next scripted body (the last one repeats
//! once the script is exhausted), decoded by the same [`ResponseStream`] as a
//! live response. Bodies can be cut into small transport chunks to exercise
//! boundary handling without a server.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use serde_json::Value;

use super::{
    ChatProvider, DecodeOptions, LlmError, Message, ResponseMode, ResponseStream, ToolDefinition,
};

/// Guess the framing of a captured body: SSE bodies start with a `data:` line
pub fn detect_mode(body: &[u8]) -> ResponseMode {
    let text = String::from_utf8_lossy(body);
    let first = text.lines().map(str::trim).find(|line| !line.is_empty());
    match first {
        Some(line) if line.starts_with("data:") => ResponseMode::Streaming,
        _ => ResponseMode::Complete,
    }
}

/// What the provider saw on one `generate` call
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedRequest {
    pub system_prompt: String,
    pub tool_names: Vec<String>,
    pub history_len: usize,
}

pub struct ScriptedProvider {
    model: String,
    bodies: Vec<Bytes>,
    turn: AtomicUsize,
    chunk_size: Option<usize>,
    options: DecodeOptions,
    requests: Mutex<Vec<ScriptedRequest>>,
}

impl ScriptedProvider {
    pub fn new(bodies: Vec<Bytes>) -> Self {
        Self {
            model: "scripted".to_string(),
            bodies,
            turn: AtomicUsize::new(0),
            chunk_size: None,
            options: DecodeOptions::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load a single captured body from disk
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let body = std::fs::read(path)
            .with_context(|| format!("Failed to read scripted response {}", path.display()))?;
        Ok(Self::new(vec![Bytes::from(body)]))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Deliver bodies in transport chunks of at most `size` bytes
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<ScriptedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_body(&self) -> Option<Bytes> {
        let turn = self.turn.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .get(turn)
            .or_else(|| self.bodies.last())
            .cloned()
    }

    fn chunks(&self, body: Bytes) -> Vec<Result<Bytes, LlmError>> {
        match self.chunk_size {
            Some(size) => body
                .chunks(size)
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect(),
            None => vec![Ok(body)],
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn model_parameters(&self) -> Value {
        serde_json::json!({
            "bodies": self.bodies.len(),
            "chunk_size": self.chunk_size,
        })
    }

    async fn generate(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        history: &[Message],
    ) -> Result<ResponseStream, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(ScriptedRequest {
                system_prompt: system_prompt.to_string(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
                history_len: history.len(),
            });
        }

        let body = self
            .next_body()
            .ok_or_else(|| LlmError::Protocol("Scripted provider has no responses".to_string()))?;
        let mode = detect_mode(&body);
        tracing::debug!(
            target: "llm",
            bytes = body.len(),
            mode = ?mode,
            "Replaying scripted response"
        );

        let source = stream::iter(self.chunks(body)).boxed();
        Ok(ResponseStream::new(source, mode, self.options))
    }
}
