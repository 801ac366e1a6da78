//! Typed errors for LLM operations
//!
//! Fatal failures of one request are classified into four kinds so callers can
//! decide on retries without string matching. The decoder itself never retries.
//! Per-frame and per-tool-call-block problems are not errors at all; they are
//! skipped inside the decoder.

use thiserror::Error;

/// Broad failure category of an [`LlmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Timeout,
    Status,
    Protocol,
}

/// LLM request/decode errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Host unreachable, connection reset, or the body stream broke mid-read
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request or a body read exceeded the configured timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Upstream answered with a non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be understood as a whole
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Connection(_) => ErrorKind::Connection,
            LlmError::Timeout(_) => ErrorKind::Timeout,
            LlmError::Status { .. } => ErrorKind::Status,
            LlmError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Check if retrying the same request could plausibly succeed.
    ///
    /// Advisory only; retry policy belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Connection(_) | LlmError::Timeout(_) => true,
            LlmError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            LlmError::Protocol(_) => false,
        }
    }

    /// Build a status error from an HTTP status code and response text
    pub fn from_http_status(status: reqwest::StatusCode, body: String) -> Self {
        LlmError::Status {
            status: status.as_u16(),
            body,
        }
    }

    /// Convert network/connection errors into typed LlmError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_http_status(status, e.to_string())
        } else if e.is_body() || e.is_decode() {
            // Body read failures surface while streaming; the connection is gone either way.
            LlmError::Connection(format!("Error reading response body: {}", e))
        } else {
            LlmError::Connection(e.to_string())
        }
    }
}
