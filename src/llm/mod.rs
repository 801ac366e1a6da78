//! LLM providers and response decoding

use crate::config::{Config, ProviderKind};

mod accumulator;
mod error;
mod openai_compat;
pub mod raw_log;
mod response;
mod scripted;
pub mod streaming;
mod types;

pub use accumulator::{collect_turn, SessionUsage, TurnAccumulator};
pub use error::{ErrorKind, LlmError};
pub use openai_compat::{
    ChatTemplateKwargs, OpenAiCompatProvider, ProviderConfig, ThinkingEffort, DEFAULT_BASE_URL,
    DEFAULT_MODEL, DEFAULT_TIMEOUT,
};
pub use response::{ByteStream, ResponseMode, ResponseStream};
pub use scripted::{detect_mode, ScriptedProvider, ScriptedRequest};
pub use streaming::{DecodeOptions, ResponseMeta, ToolCallTracker};
pub use types::*;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Trait for chat providers
///
/// One implementation per wire dialect, chosen when the provider is built.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Model identifier sent upstream
    fn model_name(&self) -> &str;

    /// Parameters of the model configuration, for tracing
    fn model_parameters(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Send one request and return the decoded fragment stream
    ///
    /// Connection, timeout and status failures are returned here. Failures
    /// while reading the body surface as an `Err` item on the stream.
    async fn generate(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        history: &[Message],
    ) -> std::result::Result<ResponseStream, LlmError>;
}

/// Create the provider selected by `provider.kind`
pub fn create_provider(config: &Config) -> Result<Box<dyn ChatProvider>> {
    let settings = &config.provider;
    match settings.kind {
        ProviderKind::OpenaiCompat => {
            let provider = OpenAiCompatProvider::new(settings.to_provider_config())?;
            tracing::info!(
                "Using {} at {} (model {})",
                provider.name(),
                provider.config().base_url(),
                provider.model_name()
            );
            Ok(Box::new(provider))
        }
        ProviderKind::Scripted => {
            let path = settings
                .script
                .as_deref()
                .context("provider.script must point at a captured response for the scripted provider")?;
            let mut provider = ScriptedProvider::from_file(path)?
                .with_model(settings.model.clone())
                .with_decode_options(DecodeOptions {
                    embedded_tags: settings.embedded_tags,
                });
            if let Some(size) = settings.script_chunk_size {
                provider = provider.with_chunk_size(size);
            }
            tracing::info!("Using scripted provider with {}", path.display());
            Ok(Box::new(provider))
        }
    }
}
