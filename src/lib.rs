//! loam: coding-agent CLI core
//!
//! This library provides:
//! - A decoder turning chat-completions responses (streamed or complete) into
//!   ordered text, thinking and tool-call fragments
//! - Tolerance for servers that embed `<think>` / `<tool_call>` tags in content
//! - An HTTP provider for OpenAI-compatible servers and a replay provider
//! - CLI commands to chat with a server or decode a captured response

pub mod config;
pub mod llm;
pub mod transport;

pub use config::Config;
