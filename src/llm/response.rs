//! The fragment stream handed to callers for one upstream response
//!
//! [`ResponseStream`] owns the transport byte stream and pulls from it only
//! when the consumer asks for the next fragment. Dropping it, or reaching the
//! end of the response, drops the transport and releases the connection.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};

use crate::llm::streaming::non_stream::decode_complete_body;
use crate::llm::streaming::{DecodeOptions, ResponseMeta, StreamDecoder};
use crate::llm::{raw_log, LlmError, MessageFragment, TokenUsage};

/// Raw transport bytes of one response
pub type ByteStream = BoxStream<'static, Result<Bytes, LlmError>>;

/// How the upstream body is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Server-Sent Events, one `data:` frame per delta
    Streaming,
    /// One JSON chat completion object
    Complete,
}

enum Decoder {
    Streaming(StreamDecoder),
    Complete {
        body: Vec<u8>,
        options: DecodeOptions,
        meta: ResponseMeta,
    },
}

/// Lazy, single-pass sequence of [`MessageFragment`]s for one response
///
/// `id()` and `usage()` may be partially populated mid-stream and are final
/// once the stream has returned `None`.
pub struct ResponseStream {
    source: Option<ByteStream>,
    decoder: Decoder,
    pending: VecDeque<MessageFragment>,
    finished: bool,
}

impl ResponseStream {
    pub fn new(source: ByteStream, mode: ResponseMode, options: DecodeOptions) -> Self {
        let decoder = match mode {
            ResponseMode::Streaming => Decoder::Streaming(StreamDecoder::new(options)),
            ResponseMode::Complete => Decoder::Complete {
                body: Vec::new(),
                options,
                meta: ResponseMeta::default(),
            },
        };
        Self {
            source: Some(source),
            decoder,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Decode an already captured body, delivered as a single transport chunk
    pub fn from_body(body: impl Into<Bytes>, mode: ResponseMode, options: DecodeOptions) -> Self {
        let chunk: Result<Bytes, LlmError> = Ok(body.into());
        Self::new(stream::iter([chunk]).boxed(), mode, options)
    }

    pub fn mode(&self) -> ResponseMode {
        match self.decoder {
            Decoder::Streaming(_) => ResponseMode::Streaming,
            Decoder::Complete { .. } => ResponseMode::Complete,
        }
    }

    pub fn meta(&self) -> &ResponseMeta {
        match &self.decoder {
            Decoder::Streaming(decoder) => decoder.meta(),
            Decoder::Complete { meta, .. } => meta,
        }
    }

    /// Upstream response id, if one was observed
    pub fn id(&self) -> Option<&str> {
        self.meta().id.as_deref()
    }

    /// Token usage, if the upstream reported any
    pub fn usage(&self) -> Option<&TokenUsage> {
        self.meta().usage.as_ref()
    }

    /// True once decoding is complete. Buffered fragments may still be pending.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn absorb(&mut self, bytes: &[u8]) {
        match &mut self.decoder {
            Decoder::Streaming(decoder) => {
                self.pending.extend(decoder.push(bytes));
                if decoder.is_finished() {
                    // Terminator seen; nothing after it is read.
                    self.source = None;
                    self.finished = true;
                }
            }
            Decoder::Complete { body, .. } => body.extend_from_slice(bytes),
        }
    }

    fn end_of_transport(&mut self) -> Result<(), LlmError> {
        self.source = None;
        self.finished = true;
        match &mut self.decoder {
            Decoder::Streaming(decoder) => {
                self.pending.extend(decoder.finish());
                Ok(())
            }
            Decoder::Complete {
                body,
                options,
                meta,
            } => {
                let body = std::mem::take(body);
                let text = String::from_utf8(body).map_err(|e| {
                    LlmError::Protocol(format!("Response body is not valid UTF-8: {}", e))
                })?;
                raw_log::append_raw_body(&text);
                let decoded = decode_complete_body(&text, *options)?;
                *meta = decoded.meta;
                self.pending.extend(decoded.fragments);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("mode", &self.mode())
            .field("meta", self.meta())
            .field("pending", &self.pending.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Stream for ResponseStream {
    type Item = Result<MessageFragment, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(fragment) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(fragment)));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            let Some(source) = this.source.as_mut() else {
                if let Err(e) = this.end_of_transport() {
                    return Poll::Ready(Some(Err(e)));
                }
                continue;
            };

            match source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.absorb(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    tracing::debug!("Response transport failed: {}", e);
                    this.source = None;
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    if let Err(e) = this.end_of_transport() {
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
