//! Error types for the Folio domain.
//!
//! Provider and tool failures each get their own enum; [`Error`] wraps them
//! for callers that just want one type to propagate with `?`.

use thiserror::Error;

/// Any failure a Folio library call can return.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Transport and protocol failures raised by a provider adapter.
///
/// Only [`ProviderError::RateLimited`] is retried (by the blocking strategy);
/// every other variant terminates the run with a single `error` event.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Map a `reqwest`-style transport failure description onto a variant.
    ///
    /// Adapters call this with `is_timeout` taken from the transport error so
    /// that request-level timeouts surface as [`ProviderError::Timeout`].
    pub fn from_transport(message: impl Into<String>, is_timeout: bool) -> Self {
        let message = message.into();
        if is_timeout {
            Self::Timeout(message)
        } else {
            Self::Network(message)
        }
    }
}

/// Why a tool refused or could not start. The registry turns these into
/// failed [`ToolResult`](crate::tool::ToolResult)s for the model.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("{tool_name} refused: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
