//! Tool dispatcher — runs one turn's tool invocations under the ordering
//! policy and hands results back in request order.
//!
//! Phases, each fully parallel, each finishing before the next starts:
//! 1. producers (tools whose effects later tools consume, e.g. `write_file`)
//! 2. every other tool
//! 3. `spawn_agent` invocations, via the sub-agent path

use std::collections::HashSet;

use async_trait::async_trait;
use folio_core::message::ContentBlock;
use folio_core::tool::{ExecContext, ToolExecutor, ToolInvocation, ToolResult};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the tool that delegates a sub-task to a sub-agent.
pub const SPAWN_AGENT_TOOL: &str = "spawn_agent";

/// Runs `spawn_agent` invocations. Implemented by the orchestrator.
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    async fn run_subagent(&self, invocation: &ToolInvocation, ctx: &ExecContext) -> ToolResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Producer,
    Consumer,
    SubAgent,
}

/// Executes tool invocations against an executor.
#[derive(Clone)]
pub struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
    producers: HashSet<String>,
}

impl ToolDispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>, producer_tools: &[String]) -> Self {
        Self {
            executor,
            producers: producer_tools.iter().cloned().collect(),
        }
    }

    pub fn executor(&self) -> Arc<dyn ToolExecutor> {
        Arc::clone(&self.executor)
    }

    fn phase_of(&self, invocation: &ToolInvocation) -> Phase {
        if invocation.name == SPAWN_AGENT_TOOL {
            Phase::SubAgent
        } else if self.producers.contains(&invocation.name) {
            Phase::Producer
        } else {
            Phase::Consumer
        }
    }

    /// Execute every invocation exactly once. The returned results are
    /// index-aligned with `invocations`, whatever order they completed in.
    ///
    /// Without a `subagents` runner, `spawn_agent` invocations fail.
    pub async fn execute(
        &self,
        invocations: &[ToolInvocation],
        ctx: &ExecContext,
        subagents: Option<&dyn SubAgentRunner>,
    ) -> Vec<ToolResult> {
        let mut results: Vec<Option<ToolResult>> = vec![None; invocations.len()];

        for phase in [Phase::Producer, Phase::Consumer, Phase::SubAgent] {
            let batch: Vec<usize> = (0..invocations.len())
                .filter(|&i| self.phase_of(&invocations[i]) == phase)
                .collect();
            if batch.is_empty() {
                continue;
            }
            debug!(
                run_id = %ctx.run_id,
                phase = ?phase,
                count = batch.len(),
                "Dispatching tool phase"
            );

            let futures = batch.iter().map(|&i| {
                let invocation = &invocations[i];
                async move {
                    let result = match phase {
                        Phase::SubAgent => match subagents {
                            Some(runner) => runner.run_subagent(invocation, ctx).await,
                            None => {
                                warn!(
                                    run_id = %ctx.run_id,
                                    "spawn_agent requested where sub-agents are disabled"
                                );
                                ToolResult::err("Sub-agents are not available in this context")
                            }
                        },
                        _ => self.executor.execute(invocation, ctx).await,
                    };
                    (i, result)
                }
            });

            for (i, result) in join_all(futures).await {
                results[i] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| ToolResult::err("Tool was not executed")))
            .collect()
    }
}

/// Normalize the `tool_use` blocks of one assistant turn so ids are
/// non-empty and unique: empty ids get a generated one, later duplicates of
/// an id are dropped. Returns the cleaned blocks and the invocations.
pub fn normalize_tool_uses(
    content: Vec<ContentBlock>,
) -> (Vec<ContentBlock>, Vec<ToolInvocation>) {
    let mut seen = HashSet::new();
    let mut blocks = Vec::with_capacity(content.len());
    let mut invocations = Vec::new();

    for block in content {
        match block {
            ContentBlock::ToolUse { id, name, input } => {
                let id = if id.trim().is_empty() {
                    format!("toolu_{}", uuid::Uuid::new_v4().simple())
                } else {
                    id
                };
                if !seen.insert(id.clone()) {
                    warn!(id = %id, tool = %name, "Dropping duplicate tool_use id");
                    continue;
                }
                invocations.push(ToolInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                blocks.push(ContentBlock::ToolUse { id, name, input });
            }
            other => blocks.push(other),
        }
    }
    (blocks, invocations)
}

/// Build the `tool_result` blocks for a turn, in request order.
pub fn result_blocks(invocations: &[ToolInvocation], results: &[ToolResult]) -> Vec<ContentBlock> {
    invocations
        .iter()
        .zip(results)
        .map(|(inv, res)| ContentBlock::ToolResult {
            tool_use_id: inv.id.clone(),
            content: res.content_for_model(),
            is_error: !res.success,
        })
        .collect()
}
