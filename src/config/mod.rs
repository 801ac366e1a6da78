//! Configuration management for loam
//!
//! Read from `config.toml` in the platform config directory. Every section
//! and field has a default, so an absent or partial file is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::{ChatTemplateKwargs, ProviderConfig, ThinkingEffort};

/// Environment variable overriding `provider.api_key`
pub const API_KEY_ENV: &str = "LOAM_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSettings,
    pub agent: AgentConfig,
}

/// Which provider implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    OpenaiCompat,
    Scripted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub stream: bool,
    pub timeout_secs: u64,
    /// Scan content for `<think>` / `<tool_call>` tags
    pub embedded_tags: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingEffort>,
    /// Passed through at the top level of every request
    pub generation: serde_json::Map<String, serde_json::Value>,
    pub chat_template_kwargs: ChatTemplateKwargs,
    /// Captured response replayed by the scripted provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_chunk_size: Option<usize>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenaiCompat,
            base_url: crate::llm::DEFAULT_BASE_URL.to_string(),
            model: crate::llm::DEFAULT_MODEL.to_string(),
            api_key: None,
            stream: true,
            timeout_secs: crate::llm::DEFAULT_TIMEOUT.as_secs(),
            embedded_tags: true,
            thinking: None,
            generation: serde_json::Map::new(),
            chat_template_kwargs: ChatTemplateKwargs::default(),
            script: None,
            script_chunk_size: None,
        }
    }
}

impl ProviderSettings {
    /// API key from the environment, falling back to the file
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        let config = ProviderConfig::new()
            .with_base_url(self.base_url.clone())
            .with_model(self.model.clone())
            .with_api_key(self.resolved_api_key())
            .with_streaming(self.stream)
            .with_timeout(Duration::from_secs(self.timeout_secs.max(1)))
            .with_embedded_tags(self.embedded_tags)
            .with_generation_params(self.generation.clone())
            .with_chat_template_kwargs(self.chat_template_kwargs.clone());
        match self.thinking {
            Some(effort) => config.with_thinking(effort),
            None => config,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful coding assistant.".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "loam") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }
}
