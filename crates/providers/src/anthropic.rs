//! Anthropic native provider implementation (streaming strategy).
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Incremental SSE streaming assembled by [`BlockAssembler`]
//! - Extended thinking, with signed thinking blocks replayed verbatim
//! - Timer-driven keep-alive chunks while a long tool input is buffering

use std::time::Duration;

use async_trait::async_trait;
use folio_core::error::ProviderError;
use folio_core::message::{ContentBlock, Message, Role};
use folio_core::provider::*;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::retry::parse_retry_after;
use crate::sse::{BlockAssembler, SseData, SseLineBuffer, parse_data_line};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    /// Budget tokens for extended thinking; `None` disables it.
    thinking_budget: Option<u32>,
    keepalive: Duration,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with a 120 s request timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: build_client(Duration::from_secs(120)),
            thinking_budget: None,
            keepalive: Duration::from_secs(15),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable extended thinking.
    pub fn with_extended_thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    /// Whole-request timeout, including the time spent streaming the body.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    /// Convert the transcript to Anthropic API messages.
    ///
    /// Thinking blocks are only replayed when thinking is enabled, and only
    /// with their signature; empty messages are skipped.
    fn to_api_messages(messages: &[Message], keep_thinking: bool) -> Vec<AnthropicMessage<'_>> {
        messages
            .iter()
            .filter_map(|msg| {
                let content: Vec<&ContentBlock> = msg
                    .content
                    .iter()
                    .filter(|b| match b {
                        ContentBlock::Thinking { signature, .. } => {
                            keep_thinking && signature.is_some()
                        }
                        ContentBlock::Text { text } => !text.is_empty(),
                        _ => true,
                    })
                    .collect();
                if content.is_empty() {
                    return None;
                }
                Some(AnthropicMessage {
                    role: match msg.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content,
                })
            })
            .collect()
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool<'_>> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.input_schema,
            })
            .collect()
    }

    fn build_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let thinking = request.thinking_budget.or(self.thinking_budget);
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages, thinking.is_some()),
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        if let Some(ref sys) = request.system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        match thinking {
            // the API rejects a custom temperature while thinking is on
            Some(budget) => {
                body["thinking"] = serde_json::json!({
                    "type": "enabled",
                    "budget_tokens": budget
                });
            }
            None => {
                if let Some(t) = request.temperature {
                    body["temperature"] = serde_json::json!(t);
                }
            }
        }

        body
    }
}

/// HTTP client shared by both wire strategies.
pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Translate a non-success HTTP response into a provider error.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    warn!(status, body = %body, "Provider returned error");

    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after,
            message: body,
        },
        401 | 403 => ProviderError::AuthenticationFailed(body),
        404 => ProviderError::ModelNotFound(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    ProviderError::from_transport(e.to_string(), e.is_timeout())
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            thinking: true,
        }
    }

    async fn call(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "no Anthropic API key (set FOLIO_API_KEY or ANTHROPIC_API_KEY)".into(),
            ));
        }

        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let (tx, rx) = mpsc::channel(64);
        let keepalive = self.keepalive;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(transport_error));

        tokio::spawn(pump_events(Box::pin(bytes), tx, keepalive));

        Ok(rx)
    }
}

/// Drive one SSE body to completion, forwarding chunks as they assemble.
///
/// Always ends by sending either `Completed` or a single error, unless the
/// receiver goes away first.
pub(crate) async fn pump_events<S, B>(
    mut byte_stream: S,
    tx: mpsc::Sender<std::result::Result<ProviderChunk, ProviderError>>,
    keepalive: Duration,
) where
    S: Stream<Item = std::result::Result<B, ProviderError>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut lines = SseLineBuffer::new();
    let mut assembler = BlockAssembler::new();

    // ticks at half the interval; the elapsed checks below enforce the rate
    let mut ticker = tokio::time::interval((keepalive / 2).max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tool_open_since: Option<Instant> = None;
    let mut last_keepalive: Option<Instant> = None;

    'read: loop {
        tokio::select! {
            next = byte_stream.next() => {
                let bytes = match next {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    None => break 'read,
                };

                for line in lines.push(bytes.as_ref()) {
                    match handle_line(&line, &mut assembler) {
                        Ok(LineOutcome::Forward(chunk)) => {
                            if matches!(chunk, ProviderChunk::ToolUseStarted { .. }) {
                                tool_open_since = Some(Instant::now());
                                last_keepalive = None;
                            }
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Ok(LineOutcome::Nothing) => {}
                        Ok(LineOutcome::Done) => break 'read,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
                if assembler.is_finished() {
                    break 'read;
                }
            }
            _ = ticker.tick() => {
                let Some((tool_name, buffered_bytes)) = assembler.open_tool() else {
                    tool_open_since = None;
                    continue;
                };
                let Some(since) = tool_open_since else {
                    continue;
                };
                let due = since.elapsed() >= keepalive
                    && last_keepalive.is_none_or(|t| t.elapsed() >= keepalive);
                if !due {
                    continue;
                }
                trace!(tool = tool_name, buffered_bytes, "Emitting keep-alive");
                let chunk = ProviderChunk::KeepAlive {
                    tool_name: tool_name.to_string(),
                    buffered_bytes,
                    elapsed_ms: since.elapsed().as_millis() as u64,
                };
                last_keepalive = Some(Instant::now());
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        }
    }

    if !assembler.is_finished()
        && let Some(line) = lines.finish()
        && let Err(e) = handle_line(&line, &mut assembler)
    {
        let _ = tx.send(Err(e)).await;
        return;
    }

    if !assembler.is_finished() {
        debug!("Stream ended without message_stop, completing with assembled blocks");
    }
    let response = assembler.finish();
    let _ = tx.send(Ok(ProviderChunk::Completed { response })).await;
}

enum LineOutcome {
    Forward(ProviderChunk),
    Nothing,
    Done,
}

fn handle_line(
    line: &str,
    assembler: &mut BlockAssembler,
) -> std::result::Result<LineOutcome, ProviderError> {
    match parse_data_line(line) {
        Some(SseData::Done) => Ok(LineOutcome::Done),
        Some(SseData::Event(event)) => Ok(assembler
            .handle(&event)?
            .map_or(LineOutcome::Nothing, LineOutcome::Forward)),
        None => Ok(LineOutcome::Nothing),
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: Vec<&'a ContentBlock>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}
