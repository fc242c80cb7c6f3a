//! Shared test helpers: a scripted provider and a scripted tool executor.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use folio_core::error::ProviderError;
use folio_core::message::ContentBlock;
use folio_core::provider::{
    ChunkReceiver, Provider, ProviderCapabilities, ProviderChunk, ProviderRequest, StopReason,
    TurnResponse, Usage,
};
use folio_core::tool::{ExecContext, ToolExecutor, ToolInput, ToolInvocation, ToolResult};
use tokio::sync::mpsc;

use crate::stream_event::AgentEvent;

/// A provider that replays canned turns in call order, streaming each
/// turn's text as one delta before the completed response.
///
/// Every request is recorded. Calls past the end of the script fail.
pub struct ScriptedProvider {
    turns: Mutex<Vec<TurnResponse>>,
    failure: Option<ProviderError>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<TurnResponse>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().rev().collect()),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The `n`th request received (0-based).
    pub fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            thinking: true,
        }
    }

    async fn call(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let Some(response) = self.turns.lock().unwrap().pop() else {
            return Err(ProviderError::MalformedResponse("script exhausted".into()));
        };

        let (tx, rx) = mpsc::channel(4);
        let text = response.text();
        if !text.is_empty() {
            tx.send(Ok(ProviderChunk::TextDelta { text })).await.unwrap();
        }
        tx.send(Ok(ProviderChunk::Completed { response })).await.unwrap();
        Ok(rx)
    }
}

/// A tool executor with per-tool delays and failures that records the
/// order invocations started and finished in.
///
/// Successful results have output `"{name}:{id}"`.
#[derive(Default)]
pub struct ScriptedExecutor {
    delays: HashMap<String, Duration>,
    failures: HashMap<String, String>,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    inputs: Mutex<Vec<ToolInput>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.delays.insert(tool.into(), delay);
        self
    }

    pub fn with_failure(mut self, tool: &str, error: &str) -> Self {
        self.failures.insert(tool.into(), error.into());
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<ToolInput> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: &ToolInvocation, _ctx: &ExecContext) -> ToolResult {
        self.started.lock().unwrap().push(invocation.id.clone());
        self.inputs.lock().unwrap().push(invocation.input.clone());
        if let Some(delay) = self.delays.get(&invocation.name) {
            tokio::time::sleep(*delay).await;
        }
        self.finished.lock().unwrap().push(invocation.id.clone());

        match self.failures.get(&invocation.name) {
            Some(error) => ToolResult::err(error.clone()),
            None => ToolResult::ok(format!("{}:{}", invocation.name, invocation.id)),
        }
    }
}

pub fn invocation(id: &str, name: &str) -> ToolInvocation {
    ToolInvocation {
        id: id.into(),
        name: name.into(),
        input: ToolInput::new(),
    }
}

pub fn tool_use(id: &str, name: &str, input: serde_json::Value) -> ContentBlock {
    ContentBlock::ToolUse {
        id: id.into(),
        name: name.into(),
        input: input.as_object().cloned().unwrap_or_default(),
    }
}

pub fn text_turn(text: &str, stop_reason: StopReason) -> TurnResponse {
    TurnResponse {
        content: if text.is_empty() {
            vec![]
        } else {
            vec![ContentBlock::text(text)]
        },
        stop_reason,
        usage: Some(Usage::new(10, 5)),
    }
}

/// A `tool_use` turn, optionally led by text.
pub fn tool_turn(text: &str, tool_uses: Vec<ContentBlock>) -> TurnResponse {
    let mut turn = text_turn(text, StopReason::ToolUse);
    turn.content.extend(tool_uses);
    turn
}

pub trait TurnExt {
    fn with_stop(self, stop_reason: StopReason) -> TurnResponse;
}

impl TurnExt for TurnResponse {
    fn with_stop(mut self, stop_reason: StopReason) -> TurnResponse {
        self.stop_reason = stop_reason;
        self
    }
}

/// Drain a run's events until the stream closes.
pub async fn collect_events(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
