//! LLM provider strategies for Folio.
//!
//! Both strategies implement the `folio_core::Provider` trait and produce
//! the same `TurnResponse`. The router picks one from configuration.

pub mod anthropic;
pub mod openai_compat;
pub mod recovery;
pub mod retry;
pub mod router;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use recovery::{RecoveredCall, Recovery, recover_tool_calls};
pub use retry::{RetryPolicy, with_retry};
pub use router::build_from_config;
