//! The agent orchestration loop.
//!
//! One run owns its transcript and drives it turn by turn:
//!
//! 1. **Check the budget**: past the iteration cap, say so and finish
//! 2. **Call the provider** with the transcript, forwarding text/thinking
//! 3. **No tool calls**: let the governor finish or inject a correction
//! 4. **Tool calls**: append the assistant turn, dispatch, append results
//! 5. **Yield** to the scheduler and go again
//!
//! Events reach the caller through an `mpsc` channel fed by a background
//! task. Dropping the receiver cancels the run at its next emission or
//! iteration boundary; a dispatch already in flight is awaited first.

use std::sync::Arc;

use async_trait::async_trait;
use folio_config::{AppConfig, LimitsConfig};
use folio_core::error::ProviderError;
use folio_core::message::{ContentBlock, Message, RunId, Transcript};
use folio_core::provider::{
    Provider, ProviderChunk, ProviderRequest, ToolDefinition, TurnResponse, Usage,
};
use folio_core::tool::{ExecContext, ToolExecutor, ToolInvocation, ToolRegistry, ToolResult};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{
    SPAWN_AGENT_TOOL, SubAgentRunner, ToolDispatcher, normalize_tool_uses, result_blocks,
};
use crate::errors::user_facing_message;
use crate::governor::{IterationGovernor, IterationState, TextTurnDecision, ToolTurnDecision};
use crate::stream_event::AgentEvent;

/// Iteration budgets for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    pub max_iterations: usize,
    pub subagent_max_iterations: usize,
    pub max_quality_assessments: usize,
    pub max_truncation_retries: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for RunLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            subagent_max_iterations: config.subagent_max_iterations,
            max_quality_assessments: config.max_quality_assessments,
            max_truncation_retries: config.max_truncation_retries,
        }
    }
}

/// Per-request model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            system_prompt: None,
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Why a run stopped early.
#[derive(Debug)]
enum Halt {
    /// The caller dropped the event receiver.
    Cancelled,
    Provider(ProviderError),
}

/// Mutable state of one run, owned by the task driving it.
struct Run {
    id: RunId,
    transcript: Transcript,
    appended_from: usize,
    state: IterationState,
    usage: Option<Usage>,
    tool_calls_made: usize,
}

impl Run {
    fn appended(&self) -> Vec<Message> {
        self.transcript.since(self.appended_from).to_vec()
    }
}

/// Drives tool-using conversations against one provider.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    dispatcher: ToolDispatcher,
    tools: Vec<ToolDefinition>,
    settings: RunSettings,
    limits: RunLimits,
    build_tools: Vec<String>,
    subagents: bool,
    depth: usize,
}

impl Orchestrator {
    /// Create an orchestrator over an executor and the tool definitions the
    /// model is offered. Sub-agents are enabled.
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        let dispatch = folio_config::DispatchConfig::default();
        Self {
            provider,
            dispatcher: ToolDispatcher::new(executor, &dispatch.producer_tools),
            tools,
            settings: RunSettings::default(),
            limits: RunLimits::default(),
            build_tools: dispatch.build_tools,
            subagents: true,
            depth: 0,
        }
    }

    /// Create an orchestrator offering and executing every tool in `registry`.
    pub fn with_registry(provider: Arc<dyn Provider>, registry: ToolRegistry) -> Self {
        let tools = registry.definitions();
        Self::new(provider, Arc::new(registry), tools)
    }

    /// Apply limits, model settings and the dispatch partition from config.
    pub fn configured(mut self, config: &AppConfig) -> Self {
        self.settings = RunSettings::from_config(config);
        self.limits = RunLimits::from(&config.limits);
        self.dispatcher = ToolDispatcher::new(
            self.dispatcher.executor(),
            &config.dispatch.producer_tools,
        );
        self.build_tools = config.dispatch.build_tools.clone();
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_subagents(mut self, enabled: bool) -> Self {
        self.subagents = enabled;
        self
    }

    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }

    /// Tool definitions sent to the model: the configured tools, plus
    /// `spawn_agent` when sub-agents are enabled.
    pub fn offered_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .tools
            .iter()
            .filter(|t| t.name != SPAWN_AGENT_TOOL)
            .cloned()
            .collect();
        if self.subagents {
            tools.push(spawn_agent_definition());
        }
        tools
    }

    /// The orchestrator a `spawn_agent` call runs: smaller budget, no
    /// `spawn_agent`, no further sub-agents.
    fn child(&self) -> Orchestrator {
        let mut child = self.clone();
        child.tools.retain(|t| t.name != SPAWN_AGENT_TOOL);
        child.subagents = false;
        child.depth = self.depth + 1;
        child.limits.max_iterations = self.limits.subagent_max_iterations;
        child
    }

    /// Start a run over `transcript`. Events arrive on the returned receiver
    /// and always end with exactly one `done` or `error`.
    pub fn run(&self, transcript: Transcript) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel::<AgentEvent>(128);
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(transcript, tx).await;
        });
        rx
    }

    async fn drive(self, transcript: Transcript, tx: mpsc::Sender<AgentEvent>) {
        let mut run = Run {
            id: RunId::new(),
            appended_from: transcript.len(),
            transcript,
            state: IterationState::new(self.limits.max_iterations),
            usage: None,
            tool_calls_made: 0,
        };
        info!(
            run_id = %run.id,
            depth = self.depth,
            provider = self.provider.name(),
            max_iterations = self.limits.max_iterations,
            "Starting agent run"
        );

        let final_event = match self.run_loop(&mut run, &tx).await {
            Ok(()) => AgentEvent::Done {
                iterations: run.state.iteration,
                tool_calls_made: run.tool_calls_made,
                usage: run.usage,
                messages: run.appended(),
            },
            Err(Halt::Provider(e)) => {
                warn!(run_id = %run.id, error = %e, "Agent run failed");
                AgentEvent::Error {
                    message: user_facing_message(&e),
                    messages: run.appended(),
                }
            }
            Err(Halt::Cancelled) => {
                info!(
                    run_id = %run.id,
                    iteration = run.state.iteration,
                    "Event receiver dropped, run cancelled"
                );
                return;
            }
        };

        info!(
            run_id = %run.id,
            outcome = final_event.event_type(),
            iterations = run.state.iteration,
            tool_calls = run.tool_calls_made,
            "Agent run finished"
        );
        let _ = tx.send(final_event).await;
    }

    async fn run_loop(&self, run: &mut Run, tx: &mpsc::Sender<AgentEvent>) -> Result<(), Halt> {
        let governor = IterationGovernor::new(&self.limits, self.build_tools.clone());
        let tools = self.offered_tools();

        if let Err(ids) = run.transcript.validate_for_replay() {
            warn!(run_id = %run.id, unanswered = ?ids, "Transcript has unanswered tool_use blocks");
        }

        loop {
            if tx.is_closed() {
                return Err(Halt::Cancelled);
            }

            if governor.limit_reached(&run.state) {
                warn!(run_id = %run.id, max = run.state.max_iterations, "Iteration limit reached");
                let notice = format!(
                    "Stopped after reaching the limit of {} iterations. Send another message to continue.",
                    run.state.max_iterations
                );
                emit(tx, AgentEvent::Text {
                    text: notice.clone(),
                })
                .await?;
                run.transcript.push(Message::assistant_text(notice));
                return Ok(());
            }

            run.state.iteration += 1;
            debug!(
                run_id = %run.id,
                iteration = run.state.iteration,
                depth = self.depth,
                "Agent iteration"
            );

            let response = self.call_provider(run, &tools, tx).await?;
            if let Some(usage) = &response.usage {
                run.usage.get_or_insert_with(Usage::default).add(usage);
            }
            let stop_reason = response.stop_reason;
            let (content, invocations) = normalize_tool_uses(response.content);

            if invocations.is_empty() {
                let text: String = content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if !content.is_empty() {
                    run.transcript.push(Message::assistant(content));
                }
                let has_tools = !tools.is_empty();
                match governor.on_text_turn(&mut run.state, &stop_reason, &text, has_tools) {
                    TextTurnDecision::Correct(message) => {
                        run.transcript.push(Message::user_text(message));
                    }
                    TextTurnDecision::Finish => return Ok(()),
                }
            } else {
                run.transcript.push(Message::assistant(content));

                for inv in &invocations {
                    emit(tx, self.requested_event(inv)).await?;
                }

                let ctx = ExecContext {
                    run_id: run.id.clone(),
                    depth: self.depth,
                    iteration: run.state.iteration,
                };
                let runner: Option<&dyn SubAgentRunner> = if self.subagents {
                    Some(self)
                } else {
                    None
                };
                let results = self.dispatcher.execute(&invocations, &ctx, runner).await;
                run.tool_calls_made += invocations.len();

                let decision =
                    governor.on_tool_turn(&mut run.state, &stop_reason, &invocations, &results);
                let mut blocks = result_blocks(&invocations, &results);
                if let ToolTurnDecision::Continue {
                    follow_up: Some(text),
                } = &decision
                {
                    blocks.push(ContentBlock::text(text.clone()));
                }
                run.transcript.push(Message::tool_results(blocks));

                for (inv, result) in invocations.iter().zip(results) {
                    emit(tx, completed_event(inv, result)).await?;
                }

                if decision == ToolTurnDecision::Finish {
                    return Ok(());
                }
            }

            tokio::task::yield_now().await;
        }
    }

    /// One provider round trip. Text and thinking deltas are forwarded as
    /// they arrive.
    async fn call_provider(
        &self,
        run: &Run,
        tools: &[ToolDefinition],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<TurnResponse, Halt> {
        let messages = if self.provider.capabilities().thinking {
            run.transcript.messages().to_vec()
        } else {
            run.transcript.without_thinking()
        };
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            system: self.settings.system_prompt.clone(),
            messages,
            tools: tools.to_vec(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            thinking_budget: None,
        };

        let mut chunks = self.provider.call(request).await.map_err(Halt::Provider)?;
        while let Some(chunk) = chunks.recv().await {
            match chunk.map_err(Halt::Provider)? {
                ProviderChunk::TextDelta { text } => {
                    if !text.is_empty() {
                        emit(tx, AgentEvent::Text { text }).await?;
                    }
                }
                ProviderChunk::ThinkingDelta { thinking } => {
                    if !thinking.is_empty() {
                        emit(tx, AgentEvent::Thinking { thinking }).await?;
                    }
                }
                ProviderChunk::ToolUseStarted { id, name } => {
                    debug!(run_id = %run.id, id = %id, tool = %name, "Model started a tool call");
                }
                ProviderChunk::KeepAlive {
                    tool_name,
                    buffered_bytes,
                    elapsed_ms,
                } => {
                    trace!(
                        run_id = %run.id,
                        tool = %tool_name,
                        buffered_bytes,
                        elapsed_ms,
                        "Tool input still streaming"
                    );
                }
                ProviderChunk::Completed { response } => return Ok(response),
            }
        }
        Err(Halt::Provider(ProviderError::StreamInterrupted(
            "provider stream closed before the response completed".into(),
        )))
    }

    fn requested_event(&self, inv: &ToolInvocation) -> AgentEvent {
        if inv.name == SPAWN_AGENT_TOOL {
            AgentEvent::AgentSpawn {
                id: inv.id.clone(),
                task: inv
                    .input
                    .get("task")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                depth: self.depth + 1,
            }
        } else {
            AgentEvent::ToolCall {
                id: inv.id.clone(),
                name: inv.name.clone(),
                input: inv.input.clone(),
            }
        }
    }
}

#[async_trait]
impl SubAgentRunner for Orchestrator {
    async fn run_subagent(&self, invocation: &ToolInvocation, ctx: &ExecContext) -> ToolResult {
        let Some(task) = invocation
            .input
            .get("task")
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
        else {
            return ToolResult::err("spawn_agent requires a non-empty 'task'");
        };
        let context = invocation.input.get("context").and_then(|v| v.as_str());

        let mut prompt = task.to_string();
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(context);
        }

        info!(
            parent_run = %ctx.run_id,
            id = %invocation.id,
            depth = self.depth + 1,
            "Spawning sub-agent"
        );
        let mut events = self
            .child()
            .run(Transcript::from(vec![Message::user_text(prompt)]));

        let mut output = String::new();
        let mut after_text = false;
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Text { text } => {
                    if !after_text && !output.is_empty() {
                        output.push_str("\n\n");
                    }
                    output.push_str(&text);
                    after_text = true;
                }
                AgentEvent::Done { .. } => return ToolResult::ok(output.trim().to_string()),
                AgentEvent::Error { message, .. } => {
                    return ToolResult {
                        success: false,
                        output: (!output.is_empty()).then_some(output),
                        error: Some(format!("Sub-agent failed: {message}")),
                    };
                }
                _ => after_text = false,
            }
        }
        ToolResult::err("Sub-agent ended without a result")
    }
}

fn completed_event(inv: &ToolInvocation, result: ToolResult) -> AgentEvent {
    if inv.name == SPAWN_AGENT_TOOL {
        AgentEvent::AgentResult {
            id: inv.id.clone(),
            success: result.success,
            output: result.output.unwrap_or_default(),
            error: result.error,
        }
    } else {
        AgentEvent::ToolResult {
            id: inv.id.clone(),
            name: inv.name.clone(),
            success: result.success,
            output: result.output,
            error: result.error,
        }
    }
}

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), Halt> {
    tx.send(event).await.map_err(|_| Halt::Cancelled)
}

/// Definition of the sub-agent tool offered to top-level runs.
pub fn spawn_agent_definition() -> ToolDefinition {
    ToolDefinition {
        name: SPAWN_AGENT_TOOL.into(),
        description: "Delegate an independent sub-task to a sub-agent. Sub-agents run in \
                      parallel, use the same project tools (but cannot spawn agents \
                      themselves) and return their final text. Give each a self-contained task."
            .into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What the sub-agent must do"
                },
                "context": {
                    "type": "string",
                    "description": "Background the sub-agent needs, such as file names or decisions made so far"
                }
            },
            "required": ["task"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::{HALLUCINATION_CORRECTIVE, QUALITY_FOLLOW_UP, TRUNCATION_CORRECTIVE};
    use crate::test_helpers::{
        ScriptedExecutor, ScriptedProvider, TurnExt, collect_events, text_turn, tool_turn,
        tool_use,
    };
    use folio_core::message::Role;
    use folio_core::provider::StopReason;
    use std::time::Duration;

    fn defs(names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .map(|n| ToolDefinition {
                name: n.to_string(),
                description: format!("{n} tool"),
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect()
    }

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        executor: Arc<ScriptedExecutor>,
    ) -> Orchestrator {
        Orchestrator::new(
            provider,
            executor,
            defs(&["write_file", "compile_latex", "search_files", "read_file"]),
        )
        .with_limits(RunLimits {
            max_iterations: 6,
            subagent_max_iterations: 3,
            max_quality_assessments: 1,
            max_truncation_retries: 1,
        })
    }

    fn start() -> Transcript {
        Transcript::from(vec![Message::user_text("Write a one-page report")])
    }

    fn types(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[tokio::test]
    async fn single_text_turn_yields_text_then_done() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn(
            "Here is a plan.",
            StopReason::EndTurn,
        )]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(types(&events), vec!["text", "done"]);
        assert_eq!(provider.calls(), 1);
        match events.last().unwrap() {
            AgentEvent::Done {
                iterations,
                tool_calls_made,
                messages,
                ..
            } => {
                assert_eq!(*iterations, 1);
                assert_eq!(*tool_calls_made, 0);
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].text(), "Here is a plan.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_turn_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(
                "Searching.",
                vec![tool_use("t1", "search_files", serde_json::json!({"query": "intro"}))],
            ),
            text_turn("Found it.", StopReason::EndTurn),
        ]));
        let executor = Arc::new(ScriptedExecutor::new());
        let events = collect_events(orchestrator(provider.clone(), executor).run(start())).await;

        assert_eq!(
            types(&events),
            vec!["text", "tool_call", "tool_result", "text", "done"]
        );
        let AgentEvent::Done { messages, tool_calls_made, .. } = events.last().unwrap() else {
            panic!("expected done");
        };
        assert_eq!(*tool_calls_made, 1);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert!(Transcript::from(messages.clone()).validate_for_replay().is_ok());

        // the second request carried the tool result
        let second = provider.request(1);
        assert_eq!(second.messages.len(), 3);
        assert!(matches!(
            &second.messages[2].content[0],
            ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "t1"
        ));
    }

    #[tokio::test]
    async fn tool_results_keep_request_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(
                "",
                vec![
                    tool_use("a", "write_file", serde_json::json!({"path": "main.tex"})),
                    tool_use("b", "compile_latex", serde_json::json!({"path": "main.tex"})),
                    tool_use("c", "search_files", serde_json::json!({"query": "x"})),
                ],
            ),
            text_turn("Done.", StopReason::EndTurn),
        ]));
        let executor = Arc::new(
            ScriptedExecutor::new()
                .with_failure("compile_latex", "missing \\end{document}")
                .with_delay("write_file", Duration::from_millis(20))
                .with_delay("compile_latex", Duration::from_millis(1))
                .with_delay("search_files", Duration::from_millis(40)),
        );
        let events = collect_events(orchestrator(provider.clone(), executor).run(start())).await;

        let result_ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["a", "b", "c"]);

        let second = provider.request(1);
        let ids: Vec<&str> = second.messages[2]
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn every_tool_call_precedes_its_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(
                "",
                vec![
                    tool_use("w", "write_file", serde_json::json!({})),
                    tool_use("r", "read_file", serde_json::json!({})),
                ],
            ),
            tool_turn("", vec![tool_use("s", "search_files", serde_json::json!({}))]),
            text_turn("ok", StopReason::EndTurn),
        ]));
        let events = collect_events(
            orchestrator(provider, Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        for (pos, event) in events.iter().enumerate() {
            if let AgentEvent::ToolResult { id, .. } = event {
                let call_pos = events
                    .iter()
                    .position(|e| matches!(e, AgentEvent::ToolCall { id: cid, .. } if cid == id))
                    .unwrap();
                assert!(call_pos < pos);
            }
        }
    }

    #[tokio::test]
    async fn truncation_is_corrected_once_then_done() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_turn("\\section{Intro", StopReason::MaxTokens),
            text_turn("\\section{Intro}", StopReason::MaxTokens),
        ]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(types(&events), vec!["text", "text", "done"]);
        assert_eq!(provider.calls(), 2);
        let second = provider.request(1);
        assert_eq!(second.messages.last().unwrap().text(), TRUNCATION_CORRECTIVE);
    }

    #[tokio::test]
    async fn hallucination_corrected_at_most_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_turn("I have updated main.tex.", StopReason::EndTurn),
            text_turn("I have updated main.tex, really.", StopReason::EndTurn),
        ]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(types(&events), vec!["text", "text", "done"]);
        assert_eq!(provider.calls(), 2);
        let correctives = provider
            .request(1)
            .messages
            .iter()
            .filter(|m| m.text() == HALLUCINATION_CORRECTIVE)
            .count();
        assert_eq!(correctives, 1);
    }

    #[tokio::test]
    async fn empty_tool_input_is_passed_through_to_executor() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn("", vec![tool_use("w", "write_file", serde_json::json!({}))]),
            text_turn("ok", StopReason::EndTurn),
        ]));
        let executor = Arc::new(ScriptedExecutor::new());
        let events = collect_events(orchestrator(provider, executor.clone()).run(start())).await;

        assert_eq!(events.last().unwrap().event_type(), "done");
        assert!(executor.inputs()[0].is_empty());
    }

    #[tokio::test]
    async fn iteration_limit_ends_with_notice_and_done() {
        let turns = (0..10)
            .map(|i| {
                tool_turn(
                    "",
                    vec![tool_use(&format!("r{i}"), "read_file", serde_json::json!({}))],
                )
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(turns));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new()))
                .with_limits(RunLimits {
                    max_iterations: 3,
                    ..RunLimits::default()
                })
                .run(start()),
        )
        .await;

        assert_eq!(provider.calls(), 3);
        let n = events.len();
        assert!(matches!(
            &events[n - 2],
            AgentEvent::Text { text } if text.contains("limit of 3 iterations")
        ));
        assert!(matches!(&events[n - 1], AgentEvent::Done { iterations: 3, .. }));
        assert!(!events.iter().any(|e| e.event_type() == "error"));
    }

    #[tokio::test]
    async fn provider_failure_is_single_error_event() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::ApiError {
            status_code: 529,
            message: "overloaded_error: Overloaded".into(),
        }));
        let events = collect_events(
            orchestrator(provider, Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(types(&events), vec!["error"]);
        let AgentEvent::Error { message, .. } = &events[0] else {
            panic!("expected error");
        };
        assert!(message.contains("overloaded"));
    }

    #[tokio::test]
    async fn quality_round_follows_successful_build() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(
                "",
                vec![tool_use("c1", "compile_latex", serde_json::json!({"path": "main.tex"}))],
            )
            .with_stop(StopReason::EndTurn),
            text_turn("Looks good.", StopReason::EndTurn),
        ]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(events.last().unwrap().event_type(), "done");
        assert_eq!(provider.calls(), 2);
        let results_msg = &provider.request(1).messages[2];
        assert!(matches!(&results_msg.content[0], ContentBlock::ToolResult { .. }));
        assert!(matches!(
            &results_msg.content[1],
            ContentBlock::Text { text } if text == QUALITY_FOLLOW_UP
        ));
    }

    #[tokio::test]
    async fn summary_after_quality_round_finishes_without_correction() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(
                "",
                vec![tool_use("c1", "compile_latex", serde_json::json!({"path": "main.tex"}))],
            ),
            text_turn(
                "I have fixed the spacing. The document compiled successfully.",
                StopReason::EndTurn,
            ),
            text_turn("unused", StopReason::EndTurn),
        ]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(types(&events), vec!["tool_call", "tool_result", "text", "done"]);
        assert_eq!(provider.calls(), 2);
        let AgentEvent::Done { messages, .. } = events.last().unwrap() else {
            panic!("expected done");
        };
        assert!(messages.iter().all(|m| m.text() != HALLUCINATION_CORRECTIVE));
    }

    #[tokio::test]
    async fn end_turn_after_tools_finishes_without_quality_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn("", vec![tool_use("w1", "write_file", serde_json::json!({}))])
                .with_stop(StopReason::EndTurn),
        ]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(types(&events), vec!["tool_call", "tool_result", "done"]);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn subagent_gets_restricted_tools_and_reports_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(
                "Delegating.",
                vec![tool_use(
                    "s1",
                    SPAWN_AGENT_TOOL,
                    serde_json::json!({"task": "Draft the abstract", "context": "Topic: graphs"}),
                )],
            ),
            // child turn
            text_turn("Abstract drafted.", StopReason::EndTurn),
            // parent resumes
            text_turn("All done.", StopReason::EndTurn),
        ]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert_eq!(
            types(&events),
            vec!["text", "agent_spawn", "agent_result", "text", "done"]
        );
        assert!(matches!(
            &events[2],
            AgentEvent::AgentResult { success: true, output, .. } if output == "Abstract drafted."
        ));

        let parent_tools: Vec<String> =
            provider.request(0).tools.iter().map(|t| t.name.clone()).collect();
        assert!(parent_tools.contains(&SPAWN_AGENT_TOOL.to_string()));

        let child = provider.request(1);
        assert!(child.tools.iter().all(|t| t.name != SPAWN_AGENT_TOOL));
        assert_eq!(child.messages.len(), 1);
        let prompt = child.messages[0].text();
        assert!(prompt.starts_with("Draft the abstract"));
        assert!(prompt.contains("Topic: graphs"));

        let parent_resume = provider.request(2);
        assert!(matches!(
            &parent_resume.messages[2].content[0],
            ContentBlock::ToolResult { content, .. } if content == "Abstract drafted."
        ));
    }

    #[tokio::test]
    async fn subagent_without_task_fails_result_not_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn("", vec![tool_use("s1", SPAWN_AGENT_TOOL, serde_json::json!({}))]),
            text_turn("ok", StopReason::EndTurn),
        ]));
        let events = collect_events(
            orchestrator(provider.clone(), Arc::new(ScriptedExecutor::new())).run(start()),
        )
        .await;

        assert!(matches!(&events[1], AgentEvent::AgentResult { success: false, .. }));
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn child_never_offers_spawn_agent() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut tools = defs(&["write_file"]);
        tools.push(spawn_agent_definition());
        let parent = Orchestrator::new(provider, Arc::new(ScriptedExecutor::new()), tools);
        assert_eq!(
            parent
                .offered_tools()
                .iter()
                .filter(|t| t.name == SPAWN_AGENT_TOOL)
                .count(),
            1
        );
        let child = parent.child();
        assert!(child.offered_tools().iter().all(|t| t.name != SPAWN_AGENT_TOOL));
        assert_eq!(child.limits().max_iterations, parent.limits().subagent_max_iterations);
    }

    #[tokio::test]
    async fn dropping_receiver_lets_dispatched_writes_finish() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn("", vec![tool_use("w", "write_file", serde_json::json!({}))]),
            text_turn("never reached", StopReason::EndTurn),
        ]));
        let executor = Arc::new(
            ScriptedExecutor::new().with_delay("write_file", Duration::from_millis(50)),
        );
        let mut rx = orchestrator(provider.clone(), executor.clone()).run(start());

        // wait for the tool call, then walk away
        loop {
            match rx.recv().await {
                Some(AgentEvent::ToolCall { .. }) => break,
                Some(_) => continue,
                None => panic!("stream ended early"),
            }
        }
        drop(rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(executor.finished(), vec!["w"]);
        assert_eq!(provider.calls(), 1);
    }
}
