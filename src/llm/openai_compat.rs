//! Provider for servers speaking the OpenAI chat-completions dialect
//!
//! Targets local inference engines (the default base URL is a local server)
//! but works against any endpoint exposing `/v1/chat/completions`. Whether the
//! server decomposes reasoning and tool calls into structured fields or embeds
//! them as tags in the content is handled by the decoder, not here.
//!
//! SECURITY: the API key is only sent to the configured endpoint.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    raw_log, ByteStream, ChatProvider, ContentPart, DecodeOptions, LlmError, Message,
    MessageContent, ResponseMode, ResponseStream, Role, ToolDefinition,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:44468";
pub const DEFAULT_MODEL: &str = "current";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// Configuration Types
// ============================================================================

/// Requested reasoning depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingEffort {
    Off,
    Low,
    Medium,
    High,
}

impl ThinkingEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingEffort::Off => "off",
            ThinkingEffort::Low => "low",
            ThinkingEffort::Medium => "medium",
            ThinkingEffort::High => "high",
        }
    }
}

impl FromStr for ThinkingEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(ThinkingEffort::Off),
            "low" => Ok(ThinkingEffort::Low),
            "medium" => Ok(ThinkingEffort::Medium),
            "high" => Ok(ThinkingEffort::High),
            other => Err(format!(
                "unknown thinking effort '{}' (expected off, low, medium or high)",
                other
            )),
        }
    }
}

/// Server-side chat template switches, sent as `chat_template_kwargs`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTemplateKwargs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

impl ChatTemplateKwargs {
    pub fn is_empty(&self) -> bool {
        self.enable_thinking.is_none() && self.reasoning_effort.is_none()
    }

    /// Fields set in `other` replace ours
    fn merged(&self, other: &ChatTemplateKwargs) -> Self {
        Self {
            enable_thinking: other.enable_thinking.or(self.enable_thinking),
            reasoning_effort: other
                .reasoning_effort
                .clone()
                .or_else(|| self.reasoning_effort.clone()),
        }
    }
}

/// Immutable provider configuration
///
/// Every `with_*` method leaves `self` untouched and returns a changed copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    stream: bool,
    timeout: Duration,
    embedded_tags: bool,
    thinking: Option<ThinkingEffort>,
    generation: Map<String, Value>,
    chat_template_kwargs: ChatTemplateKwargs,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "openai_compat".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            stream: true,
            timeout: DEFAULT_TIMEOUT,
            embedded_tags: true,
            thinking: None,
            generation: Map::new(),
            chat_template_kwargs: ChatTemplateKwargs::default(),
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn thinking(&self) -> Option<ThinkingEffort> {
        self.thinking
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            embedded_tags: self.embedded_tags,
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn with_base_url(&self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..self.clone()
        }
    }

    pub fn with_api_key(&self, api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            ..self.clone()
        }
    }

    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    pub fn with_streaming(&self, stream: bool) -> Self {
        Self {
            stream,
            ..self.clone()
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    pub fn with_embedded_tags(&self, embedded_tags: bool) -> Self {
        Self {
            embedded_tags,
            ..self.clone()
        }
    }

    pub fn with_thinking(&self, effort: ThinkingEffort) -> Self {
        Self {
            thinking: Some(effort),
            ..self.clone()
        }
    }

    /// Merge opaque generation parameters (temperature, max_tokens, ...)
    pub fn with_generation_params(&self, params: Map<String, Value>) -> Self {
        let mut generation = self.generation.clone();
        generation.extend(params);
        Self {
            generation,
            ..self.clone()
        }
    }

    pub fn with_chat_template_kwargs(&self, kwargs: ChatTemplateKwargs) -> Self {
        Self {
            chat_template_kwargs: self.chat_template_kwargs.merged(&kwargs),
            ..self.clone()
        }
    }

    /// Template kwargs as sent: configured values plus the thinking effort
    fn effective_template_kwargs(&self) -> ChatTemplateKwargs {
        match self.thinking {
            Some(effort) if effort != ThinkingEffort::Off => {
                self.chat_template_kwargs.merged(&ChatTemplateKwargs {
                    enable_thinking: Some(true),
                    reasoning_effort: Some(effort.as_str().to_string()),
                })
            }
            _ => self.chat_template_kwargs.clone(),
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

fn role_name(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert history to wire messages. Reasoning parts are not sent back.
fn convert_message(msg: &Message) -> WireMessage {
    let role = role_name(&msg.role);
    match &msg.content {
        MessageContent::Text(text) => WireMessage {
            role,
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: msg.tool_call_id.clone(),
        },
        MessageContent::Parts(parts) => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text: t } => text.push_str(t),
                    ContentPart::Think { .. } => {}
                    ContentPart::ToolUse { id, name, input } => tool_calls.push(WireToolCall {
                        id: id.clone(),
                        call_type: "function",
                        function: WireFunctionCall {
                            name: name.clone(),
                            arguments: input.to_string(),
                        },
                    }),
                }
            }

            WireMessage {
                role,
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty() && msg.role == Role::Assistant)
                    .then_some(tool_calls),
                tool_call_id: msg.tool_call_id.clone(),
            }
        }
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            tool_type: "function",
            function: WireFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

// ============================================================================
// Provider
// ============================================================================

/// Chat-completions provider
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Connection(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url)
    }

    /// Build the JSON request body
    ///
    /// Generation parameters are merged at the top level after the standard
    /// fields; `chat_template_kwargs` is added last.
    pub fn build_request_body(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        history: &[Message],
    ) -> Result<Value, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(convert_message(&Message::system(system_prompt)));
        }
        messages.extend(history.iter().map(convert_message));

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: self.config.stream,
            tools: (!tools.is_empty()).then(|| convert_tools(tools)),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        let mut body = serde_json::to_value(&request)
            .map_err(|e| LlmError::Protocol(format!("Failed to encode request: {}", e)))?;
        if let Value::Object(fields) = &mut body {
            fields.extend(self.config.generation.clone());

            let kwargs = self.config.effective_template_kwargs();
            if !kwargs.is_empty() {
                let kwargs = serde_json::to_value(&kwargs).map_err(|e| {
                    LlmError::Protocol(format!("Failed to encode chat_template_kwargs: {}", e))
                })?;
                fields.insert("chat_template_kwargs".to_string(), kwargs);
            }
        }
        Ok(body)
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_connect() {
            LlmError::Connection(format!(
                "Failed to connect to {}: {}",
                self.config.base_url, e
            ))
        } else {
            LlmError::from_network_error(e)
        }
    }
}

/// Body of a failed request, bounded by `limit` so a stalled server cannot
/// hold up the error
async fn read_error_body<F>(read: F, limit: Duration) -> String
where
    F: std::future::Future<Output = reqwest::Result<String>>,
{
    match tokio::time::timeout(limit, read).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::debug!(target: "llm", "Failed to read error body: {}", e);
            format!("<error body unreadable: {}>", e)
        }
        Err(_) => format!(
            "<error body not received within {} seconds>",
            limit.as_secs()
        ),
    }
}

/// Body bytes with an idle timeout between chunks
fn transport_stream(response: reqwest::Response, idle: Duration) -> ByteStream {
    let body: BoxStream<'static, reqwest::Result<bytes::Bytes>> = response.bytes_stream().boxed();
    stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(body))),
            Ok(Some(Err(e))) => Some((Err(LlmError::from_network_error(e)), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(LlmError::Timeout(format!(
                    "No data received for {} seconds",
                    idle.as_secs()
                ))),
                None,
            )),
        }
    })
    .boxed()
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn model_parameters(&self) -> Value {
        let mut params = serde_json::json!({ "base_url": self.config.base_url });
        if let Some(effort) = self.config.thinking {
            params["thinking_effort"] = Value::String(effort.as_str().to_string());
        }
        params
    }

    async fn generate(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        history: &[Message],
    ) -> Result<ResponseStream, LlmError> {
        let body = self.build_request_body(system_prompt, tools, history)?;

        tracing::info!(
            target: "llm",
            provider = %self.config.name,
            model = %self.config.model,
            messages = history.len(),
            tools = tools.len(),
            stream = self.config.stream,
            "Sending chat request"
        );
        raw_log::log_request(
            &self.config.name,
            &self.config.model,
            history.len(),
            !tools.is_empty(),
        );

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.config.timeout, request.send())
            .await
            .map_err(|_| {
                LlmError::Timeout(format!(
                    "No response from {} within {} seconds",
                    self.config.base_url,
                    self.config.timeout.as_secs()
                ))
            })?
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = read_error_body(response.text(), self.config.timeout).await;
            tracing::warn!(target: "llm", status = status.as_u16(), "Chat request failed");
            return Err(LlmError::from_http_status(status, text));
        }

        let mode = if self.config.stream {
            ResponseMode::Streaming
        } else {
            ResponseMode::Complete
        };
        Ok(ResponseStream::new(
            transport_stream(response, self.config.timeout),
            mode,
            self.config.decode_options(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(config: ProviderConfig) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(config).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::new();
        assert_eq!(config.base_url(), "http://localhost:44468");
        assert_eq!(config.model(), "current");
        assert!(config.is_streaming());
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.decode_options().embedded_tags);
    }

    #[test]
    fn test_with_methods_leave_original_untouched() {
        let base = ProviderConfig::new();
        let changed = base
            .with_model("qwen")
            .with_streaming(false)
            .with_thinking(ThinkingEffort::High)
            .with_base_url("http://gpu-box:8000/");

        assert_eq!(base, ProviderConfig::new());
        assert_eq!(changed.model(), "qwen");
        assert!(!changed.is_streaming());
        assert_eq!(changed.thinking(), Some(ThinkingEffort::High));
        assert_eq!(changed.base_url(), "http://gpu-box:8000");
    }

    #[test]
    fn test_generation_params_merge() {
        let mut first = Map::new();
        first.insert("temperature".into(), serde_json::json!(0.2));
        first.insert("max_tokens".into(), serde_json::json!(512));
        let mut second = Map::new();
        second.insert("temperature".into(), serde_json::json!(0.7));

        let config = ProviderConfig::new()
            .with_generation_params(first)
            .with_generation_params(second);
        let body = provider(config).build_request_body("", &[], &[]).unwrap();

        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn test_request_body_shape() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let history = vec![Message::user("hi")];
        let body = provider(ProviderConfig::new())
            .build_request_body("be brief", &tools, &history)
            .unwrap();

        assert_eq!(body["model"], "current");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert_eq!(body["tool_choice"], "auto");
        assert!(body.get("chat_template_kwargs").is_none());
    }

    #[test]
    fn test_no_tools_omits_tool_choice() {
        let body = provider(ProviderConfig::new())
            .build_request_body("", &[], &[Message::user("x")])
            .unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_thinking_effort_sets_template_kwargs() {
        let config = ProviderConfig::new()
            .with_chat_template_kwargs(ChatTemplateKwargs {
                enable_thinking: Some(false),
                reasoning_effort: None,
            })
            .with_thinking(ThinkingEffort::Medium);
        let body = provider(config).build_request_body("", &[], &[]).unwrap();

        assert_eq!(body["chat_template_kwargs"]["enable_thinking"], true);
        assert_eq!(body["chat_template_kwargs"]["reasoning_effort"], "medium");
    }

    #[test]
    fn test_thinking_off_keeps_configured_kwargs() {
        let config = ProviderConfig::new()
            .with_chat_template_kwargs(ChatTemplateKwargs {
                enable_thinking: Some(false),
                reasoning_effort: None,
            })
            .with_thinking(ThinkingEffort::Off);
        let body = provider(config).build_request_body("", &[], &[]).unwrap();

        assert_eq!(
            body["chat_template_kwargs"],
            serde_json::json!({"enable_thinking": false})
        );
    }

    #[test]
    fn test_assistant_parts_become_tool_calls() {
        let history = vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![
                    ContentPart::Think {
                        think: "private".into(),
                    },
                    ContentPart::Text {
                        text: "Let me look.".into(),
                    },
                    ContentPart::ToolUse {
                        id: "call_1".into(),
                        name: "ls".into(),
                        input: serde_json::json!({"dir": "."}),
                    },
                ]),
                tool_call_id: None,
            },
            Message::tool_result("call_1", "a.rs"),
        ];
        let body = provider(ProviderConfig::new())
            .build_request_body("", &[], &history)
            .unwrap();

        let assistant = &body["messages"][0];
        assert_eq!(assistant["content"], "Let me look.");
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "ls");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            "{\"dir\":\".\"}"
        );
        assert!(!body.to_string().contains("private"));
        assert_eq!(body["messages"][1]["role"], "tool");
        assert_eq!(body["messages"][1]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_model_parameters() {
        let plain = provider(ProviderConfig::new());
        assert_eq!(
            plain.model_parameters(),
            serde_json::json!({"base_url": "http://localhost:44468"})
        );

        let thinking = provider(ProviderConfig::new().with_thinking(ThinkingEffort::Low));
        assert_eq!(thinking.model_parameters()["thinking_effort"], "low");
    }

    #[test]
    fn test_thinking_effort_parse() {
        assert_eq!("HIGH".parse::<ThinkingEffort>(), Ok(ThinkingEffort::High));
        assert_eq!("off".parse::<ThinkingEffort>(), Ok(ThinkingEffort::Off));
        assert!("extreme".parse::<ThinkingEffort>().is_err());
    }

    #[tokio::test]
    async fn test_error_body_read_is_bounded() {
        let body = read_error_body(
            async { Ok("model not loaded".to_string()) },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(body, "model not loaded");

        let stalled = read_error_body(
            std::future::pending::<reqwest::Result<String>>(),
            Duration::from_millis(20),
        )
        .await;
        assert!(stalled.contains("not received"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let config = ProviderConfig::new()
            .with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(5));
        let err = provider(config)
            .generate("", &[], &[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::llm::ErrorKind::Connection | crate::llm::ErrorKind::Timeout
        ));
    }
}
