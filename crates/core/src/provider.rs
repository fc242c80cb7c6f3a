//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a transcript to an LLM and report the result
//! back as a stream of [`ProviderChunk`]s that always ends in exactly one
//! [`ProviderChunk::Completed`] carrying the canonical [`TurnResponse`].
//!
//! Implementations: Anthropic Messages API (incremental SSE streaming) and
//! OpenAI-compatible chat completions (single blocking response).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{ContentBlock, Message};
use crate::tool::ToolInvocation;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,

    /// System instructions, sent out-of-band from the transcript
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The transcript snapshot
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Extended-thinking budget, for providers that support it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
///
/// The schema is handed to the provider verbatim; validating inputs against
/// it is the tool's job, not the orchestrator's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// Why the provider ended a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    /// Truncated at the output token limit
    MaxTokens,
    Other(String),
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another call's usage into this one.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// The canonical result of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    pub stop_reason: StopReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TurnResponse {
    /// Concatenated text of all `text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// The `tool_use` blocks as invocations, in order.
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// A single item in a provider's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderChunk {
    /// Partial assistant text
    TextDelta { text: String },

    /// Partial reasoning trace
    ThinkingDelta { thinking: String },

    /// A tool-use block opened; its input is still accumulating
    ToolUseStarted { id: String, name: String },

    /// Synthetic liveness signal while a long tool input is still buffering
    KeepAlive {
        tool_name: String,
        buffered_bytes: usize,
        elapsed_ms: u64,
    },

    /// The final, fully assembled response. Always the last chunk.
    Completed { response: TurnResponse },
}

/// What a provider can do, used to pick request shape and transcript filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Emits incremental deltas rather than a single final chunk
    pub streaming: bool,
    /// Accepts and returns `thinking` blocks
    pub thinking: bool,
}

/// Stream of chunks produced by one provider call.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<ProviderChunk, ProviderError>>;

/// The core Provider trait.
///
/// Both wire strategies implement this; the orchestrator calls `call()`
/// without knowing which one it holds.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openrouter").
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Send a request and get a stream of chunks ending in `Completed`.
    async fn call(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError>;
}

/// Drain a chunk stream down to its final [`TurnResponse`].
pub async fn collect_turn(
    mut rx: ChunkReceiver,
) -> std::result::Result<TurnResponse, ProviderError> {
    while let Some(chunk) = rx.recv().await {
        if let ProviderChunk::Completed { response } = chunk? {
            return Ok(response);
        }
    }
    Err(ProviderError::StreamInterrupted(
        "stream closed before the response completed".into(),
    ))
}
