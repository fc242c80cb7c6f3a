//! Iteration governor — per-turn policy for the orchestration loop.
//!
//! Decides, for a turn without tool calls, whether the model was cut off,
//! claimed work it never did, or is genuinely finished. After a turn with
//! tool calls it decides whether a quality self-assessment round follows.
//! All counters live in [`IterationState`], owned by the run.

use folio_core::provider::StopReason;
use folio_core::tool::{ToolInvocation, ToolResult};
use tracing::{debug, info};

use crate::orchestrator::RunLimits;

pub const TRUNCATION_CORRECTIVE: &str = "Your previous response was cut off because it hit the \
output token limit. Continue, but be more compact: split large files into several smaller \
write_file calls and avoid repeating content you already wrote.";

pub const HALLUCINATION_CORRECTIVE: &str = "You described changes as if they were done, but you \
did not call any tool, so nothing in the project changed. Call the tools now to actually make \
the changes, or say plainly that no change is needed.";

pub const QUALITY_FOLLOW_UP: &str = "The document compiled successfully. Before finishing, review \
the result critically: check structure, formatting, consistency and anything the request asked \
for that is still missing. If you find problems, fix them with the tools and compile again. If \
everything is in order, reply with a short summary and do not call any tool.";

/// Phrases a model uses when it claims to have acted. Checked against the
/// tail of a tool-free turn that does not directly follow a successful build.
const CLAIMED_ACTION_PHRASES: &[&str] = &[
    "i've updated",
    "i have updated",
    "i've created",
    "i have created",
    "i've written",
    "i have written",
    "i've added",
    "i have added",
    "i've fixed",
    "i have fixed",
    "i've compiled",
    "i have compiled",
    "i've saved",
    "i have saved",
    "i've modified",
    "i have modified",
    "changes have been applied",
    "the file has been updated",
    "atualizei",
    "criei",
    "escrevi",
    "adicionei",
    "corrigi",
    "compilei",
    "salvei",
    "modifiquei",
    "as alterações foram aplicadas",
];

/// Only this much of the turn's trailing text is inspected.
const CLAIM_WINDOW_CHARS: usize = 600;

/// Per-run counters. Created at run start, mutated only by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationState {
    pub iteration: usize,
    pub max_iterations: usize,
    pub quality_assessments: usize,
    pub truncation_retries: usize,
    pub hallucination_corrected: bool,
    /// The latest tool turn included a successful build tool.
    pub last_build_succeeded: bool,
}

impl IterationState {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            quality_assessments: 0,
            truncation_retries: 0,
            hallucination_corrected: false,
            last_build_succeeded: false,
        }
    }
}

/// Outcome for a turn with no tool calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextTurnDecision {
    /// Append this user message and run another turn.
    Correct(String),
    /// The run is finished.
    Finish,
}

/// Outcome after the tools of a turn ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTurnDecision {
    Continue { follow_up: Option<String> },
    Finish,
}

#[derive(Debug, Clone)]
pub struct IterationGovernor {
    max_truncation_retries: usize,
    max_quality_assessments: usize,
    build_tools: Vec<String>,
}

impl IterationGovernor {
    pub fn new(limits: &RunLimits, build_tools: Vec<String>) -> Self {
        Self {
            max_truncation_retries: limits.max_truncation_retries,
            max_quality_assessments: limits.max_quality_assessments,
            build_tools,
        }
    }

    pub fn limit_reached(&self, state: &IterationState) -> bool {
        state.iteration >= state.max_iterations
    }

    /// Classify a turn that requested no tools.
    ///
    /// `tools_available` gates the hallucination check: a model with no
    /// tools cannot be blamed for not calling one.
    pub fn on_text_turn(
        &self,
        state: &mut IterationState,
        stop_reason: &StopReason,
        text: &str,
        tools_available: bool,
    ) -> TextTurnDecision {
        if *stop_reason == StopReason::MaxTokens {
            if state.truncation_retries < self.max_truncation_retries {
                state.truncation_retries += 1;
                info!(
                    iteration = state.iteration,
                    retry = state.truncation_retries,
                    "Response truncated at token limit, asking for a compact retry"
                );
                return TextTurnDecision::Correct(TRUNCATION_CORRECTIVE.into());
            }
            debug!("Truncation retries exhausted");
            return TextTurnDecision::Finish;
        }

        // A summary after a verified build describes work the tools really did
        if tools_available
            && !state.hallucination_corrected
            && !state.last_build_succeeded
            && claims_unperformed_action(text)
        {
            state.hallucination_corrected = true;
            info!(
                iteration = state.iteration,
                "Model claimed an action without calling a tool, correcting once"
            );
            return TextTurnDecision::Correct(HALLUCINATION_CORRECTIVE.into());
        }

        TextTurnDecision::Finish
    }

    /// Decide what follows a turn whose tools have run. `invocations` and
    /// `results` are index-aligned.
    pub fn on_tool_turn(
        &self,
        state: &mut IterationState,
        stop_reason: &StopReason,
        invocations: &[ToolInvocation],
        results: &[ToolResult],
    ) -> ToolTurnDecision {
        let built = invocations
            .iter()
            .zip(results)
            .any(|(inv, res)| res.success && self.build_tools.iter().any(|b| *b == inv.name));
        state.last_build_succeeded = built;

        if built && state.quality_assessments < self.max_quality_assessments {
            state.quality_assessments += 1;
            info!(
                iteration = state.iteration,
                round = state.quality_assessments,
                "Build succeeded, requesting quality self-assessment"
            );
            return ToolTurnDecision::Continue {
                follow_up: Some(QUALITY_FOLLOW_UP.into()),
            };
        }

        if *stop_reason == StopReason::EndTurn {
            ToolTurnDecision::Finish
        } else {
            ToolTurnDecision::Continue { follow_up: None }
        }
    }
}

/// Heuristic: does the trailing text claim work was done?
pub fn claims_unperformed_action(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let tail: String = {
        let count = lowered.chars().count();
        lowered
            .chars()
            .skip(count.saturating_sub(CLAIM_WINDOW_CHARS))
            .collect()
    };
    CLAIMED_ACTION_PHRASES.iter().any(|p| tail.contains(p))
}
