//! The agent orchestration loop for Folio.
//!
//! A run follows a **Call → Govern → Dispatch** cycle:
//!
//! 1. **Call** the provider with the transcript, streaming text as it arrives
//! 2. **Govern** tool-free turns: finish, or correct truncation / claimed work
//! 3. **Dispatch** requested tools in ordered parallel phases, sub-agents last
//! 4. **Append** the results and loop until done or out of iterations
//!
//! The caller sees only the [`AgentEvent`] stream.

pub mod dispatcher;
pub mod errors;
pub mod governor;
pub mod orchestrator;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::{SPAWN_AGENT_TOOL, SubAgentRunner, ToolDispatcher};
pub use errors::user_facing_message;
pub use governor::{IterationGovernor, IterationState};
pub use orchestrator::{Orchestrator, RunLimits, RunSettings, spawn_agent_definition};
pub use stream_event::AgentEvent;
