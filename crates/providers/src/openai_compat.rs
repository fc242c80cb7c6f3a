//! OpenAI-compatible provider implementation (blocking strategy).
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, Groq, Ollama, vLLM, and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Single request/response chat completions
//! - Tool use / function calling, including legacy `function_call`
//! - 429 retry with capped exponential backoff honoring `Retry-After`
//! - Recovery of tool calls written as plain text

use std::time::Duration;

use async_trait::async_trait;
use folio_core::error::ProviderError;
use folio_core::message::{ContentBlock, Message, Role};
use folio_core::provider::*;
use folio_core::tool::ToolInput;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::anthropic::{build_client, error_from_response, transport_error};
use crate::recovery::recover_tool_calls;
use crate::retry::{RetryPolicy, with_retry};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider with a 120 s request timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: build_client(Duration::from_secs(120)),
            retry: RetryPolicy::default(),
        }
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Convert the transcript to OpenAI chat messages.
    ///
    /// Thinking blocks are dropped. A user message's tool results become
    /// `tool` messages, ahead of any text it carries.
    fn to_api_messages(system: Option<&str>, messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::new();
        if let Some(system) = system {
            out.push(ApiMessage::text("system", system));
        }

        for msg in messages {
            let text = msg.text();
            match msg.role {
                Role::User => {
                    for block in &msg.content {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = block
                        {
                            out.push(ApiMessage {
                                role: "tool".into(),
                                content: Some(content.clone()),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id.clone()),
                            });
                        }
                    }
                    if !text.is_empty() {
                        out.push(ApiMessage::text("user", &text));
                    }
                }
                Role::Assistant => {
                    let tool_calls: Vec<ApiToolCall> = msg
                        .content
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolUse { id, name, input } => Some(ApiToolCall {
                                id: id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: name.clone(),
                                    arguments: serde_json::Value::String(
                                        serde_json::Value::Object(input.clone()).to_string(),
                                    ),
                                },
                            }),
                            _ => None,
                        })
                        .collect();
                    if text.is_empty() && tool_calls.is_empty() {
                        continue;
                    }
                    out.push(ApiMessage {
                        role: "assistant".into(),
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
            }
        }
        out
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(request.system.as_deref(), &request.messages),
            "max_tokens": request.max_tokens,
            "stream": false,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    async fn send_once(
        &self,
        body: &serde_json::Value,
    ) -> std::result::Result<ApiResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&text).map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
        })
    }
}

/// Map a chat-completions `finish_reason` onto [`StopReason`].
pub fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    match reason {
        Some("tool_calls" | "function_call") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("stop") | None if has_tool_calls => StopReason::ToolUse,
        Some("stop") | None => StopReason::EndTurn,
        Some(other) => StopReason::Other(other.to_string()),
    }
}

/// Tool arguments arrive as a JSON-encoded string (or, from some servers, an
/// object). Anything unparseable becomes `{}`.
fn parse_arguments(tool_name: &str, arguments: &serde_json::Value) -> ToolInput {
    match arguments {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::String(s) => crate::sse::parse_tool_input(tool_name, s),
        serde_json::Value::Null => ToolInput::new(),
        _ => {
            warn!(tool = tool_name, "Tool arguments are neither string nor object, using {{}}");
            ToolInput::new()
        }
    }
}

/// Turn one decoded response into the canonical [`TurnResponse`], running
/// text recovery when the model did not use structured tool calls.
pub(crate) fn to_turn_response(
    response: ApiResponse,
    known_tools: &[&str],
) -> std::result::Result<TurnResponse, ProviderError> {
    let usage = response
        .usage
        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

    let mut calls: Vec<(String, String, ToolInput)> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let input = parse_arguments(&tc.function.name, &tc.function.arguments);
            (tc.id, tc.function.name, input)
        })
        .collect();
    if let Some(fc) = choice.message.function_call {
        let input = parse_arguments(&fc.name, &fc.arguments);
        calls.push((String::new(), fc.name, input));
    }

    let mut text = choice.message.content.unwrap_or_default();
    let mut stop_reason = map_finish_reason(choice.finish_reason.as_deref(), !calls.is_empty());

    if calls.is_empty()
        && let Some(recovery) = recover_tool_calls(&text, known_tools)
    {
        info!(
            count = recovery.calls.len(),
            "Rewriting text tool calls as tool_use blocks"
        );
        for (n, call) in recovery.calls.into_iter().enumerate() {
            let id = format!("recovered_{}_{}", n, &uuid::Uuid::new_v4().simple().to_string()[..8]);
            calls.push((id, call.name, call.input));
        }
        text = recovery.residual;
        stop_reason = StopReason::ToolUse;
    }

    let mut content = Vec::with_capacity(calls.len() + 1);
    if !text.trim().is_empty() {
        content.push(ContentBlock::Text { text });
    }
    for (id, name, input) in calls {
        content.push(ContentBlock::ToolUse { id, name, input });
    }

    Ok(TurnResponse {
        content,
        stop_reason,
        usage,
    })
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: false,
            thinking: false,
        }
    }

    async fn call(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::build_body(&request);
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let api_response = with_retry(self.retry, |attempt| {
            if attempt > 1 {
                debug!(provider = %self.name, attempt, "Retrying completion request");
            }
            self.send_once(&body)
        })
        .await?;

        let known: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        let response = to_turn_response(api_response, &known)?;

        // the whole turn is already here; deliver the text, then the result
        let (tx, rx) = mpsc::channel(2);
        let text = response.text();
        if !text.is_empty() {
            let _ = tx.send(Ok(ProviderChunk::TextDelta { text })).await;
        }
        let _ = tx.send(Ok(ProviderChunk::Completed { response })).await;
        Ok(rx)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default)]
    function_call: Option<ApiFunction>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
