//! Optional raw wire log (debug-only)
//!
//! When enabled (via `loam --debug-log <path>`), every raw `data:` payload and
//! complete response body is appended to the given file as JSONL. The file is
//! opened once when the path is set. Writes are synchronous and happen on the
//! task polling the response, so keep this off outside debugging.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

static RAW_LOG: OnceLock<Mutex<Option<File>>> = OnceLock::new();

fn cell() -> &'static Mutex<Option<File>> {
    RAW_LOG.get_or_init(|| Mutex::new(None))
}

/// Configure the raw log path. Use `None` to disable.
///
/// A file that cannot be opened leaves the log disabled.
pub fn set_raw_log_path(path: Option<PathBuf>) {
    let file = path.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!("Cannot open raw log {}: {}", path.display(), e);
                None
            }
        }
    });
    if let Ok(mut guard) = cell().lock() {
        *guard = file;
    }
}

fn write_entry(entry: serde_json::Value) {
    let Ok(mut guard) = cell().lock() else {
        return;
    };
    if let Some(file) = guard.as_mut() {
        let _ = writeln!(file, "{}", entry);
    }
}

/// Append one raw stream payload (best-effort)
pub fn append_raw_line(line: &str) {
    write_entry(serde_json::json!({
        "type": "frame",
        "raw": line,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }));
}

/// Append one complete (non-streamed) response body (best-effort)
pub fn append_raw_body(body: &str) {
    write_entry(serde_json::json!({
        "type": "body",
        "raw": body,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }));
}

/// Log a structured request event
pub fn log_request(provider: &str, model: &str, messages_count: usize, has_tools: bool) {
    write_entry(serde_json::json!({
        "type": "request",
        "provider": provider,
        "model": model,
        "messages_count": messages_count,
        "has_tools": has_tools,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }));

    tracing::debug!(
        target: "llm",
        provider = provider,
        model = model,
        messages = messages_count,
        has_tools = has_tools,
        "LLM request"
    );
}
