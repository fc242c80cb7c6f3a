//! # Folio Core
//!
//! Domain types, traits, and error definitions for the Folio agent driver.
//! This crate has **no transport dependencies** — it defines the model that
//! the provider, tool, and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their respective
//! crates:
//! - [`Provider`] — one LLM wire protocol behind a canonical [`TurnResponse`]
//! - [`Tool`] / [`ToolExecutor`] — the opaque side-effecting boundary
//!
//! The transcript ([`Transcript`]) is plain data; whoever owns it is the only
//! one allowed to mutate it.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{ContentBlock, Message, Role, RunId, Transcript};
pub use provider::{
    ChunkReceiver, Provider, ProviderCapabilities, ProviderChunk, ProviderRequest, StopReason,
    ToolDefinition, TurnResponse, Usage, collect_turn,
};
pub use tool::{
    ExecContext, Tool, ToolExecutor, ToolInput, ToolInvocation, ToolRegistry, ToolResult,
};
