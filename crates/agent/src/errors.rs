//! Turning provider failures into messages a user can act on.

use folio_core::error::ProviderError;

/// Substring rules, checked in order against the lowercased error text.
/// Context-length comes before the status-code rules so token counts that
/// happen to contain "429" are not mistaken for rate limiting.
const RULES: &[(&[&str], &str)] = &[
    (
        &["credit", "billing", "insufficient_quota", "payment", "quota exceeded"],
        "The AI provider account has run out of credits. Check the provider's billing settings.",
    ),
    (
        &[
            "context length",
            "context_length",
            "maximum context",
            "prompt is too long",
            "too long",
        ],
        "The conversation is too long for the model's context window. Start a new conversation or shorten the input.",
    ),
    (
        &["rate limit", "rate_limit", "too many requests", "status: 429"],
        "The AI provider is rate limiting requests. Wait a moment and try again.",
    ),
    (
        &[
            "authentication",
            "invalid x-api-key",
            "invalid api key",
            "incorrect api key",
            "unauthorized",
            "status: 401",
        ],
        "The AI provider rejected the API key. Check the configured key.",
    ),
    (
        &["model not found", "model_not_found", "not_found_error", "does not exist"],
        "The configured model was not found. Check the model name.",
    ),
    (
        &["overloaded", "status: 529", "status: 503", "service unavailable"],
        "The AI provider is overloaded right now. Try again in a few minutes.",
    ),
];

/// Classify a provider error into a short user-facing message, falling back
/// to the raw error text.
pub fn user_facing_message(error: &ProviderError) -> String {
    match error {
        ProviderError::Timeout(_) => {
            return "The AI provider took too long to respond. Try again, or ask for a smaller change."
                .into();
        }
        ProviderError::NotConfigured(_) => {
            return "No API key is configured for the AI provider. Set FOLIO_API_KEY or add api_key to the config file."
                .into();
        }
        _ => {}
    }

    let raw = error.to_string();
    let lowered = raw.to_lowercase();
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
        .map(|(_, message)| (*message).to_string())
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status_code: u16, message: &str) -> ProviderError {
        ProviderError::ApiError {
            status_code,
            message: message.into(),
        }
    }

    #[test]
    fn billing() {
        let msg = user_facing_message(&api(400, "Your credit balance is too low"));
        assert!(msg.contains("credits"));
        let msg = user_facing_message(&api(429, "insufficient_quota: You exceeded your quota"));
        assert!(msg.contains("credits"));
    }

    #[test]
    fn rate_limit() {
        let msg = user_facing_message(&ProviderError::RateLimited {
            retry_after_secs: Some(3),
            message: "slow down".into(),
        });
        assert!(msg.contains("rate limiting"));
    }

    #[test]
    fn invalid_auth() {
        let msg = user_facing_message(&ProviderError::AuthenticationFailed(
            "invalid x-api-key".into(),
        ));
        assert!(msg.contains("API key"));
    }

    #[test]
    fn model_not_found() {
        let msg = user_facing_message(&ProviderError::ModelNotFound("claude-9".into()));
        assert!(msg.contains("model was not found"));
    }

    #[test]
    fn context_too_long_beats_numeric_status_match() {
        let msg = user_facing_message(&api(
            400,
            "invalid_request_error: prompt is too long: 204291 tokens > 200000 maximum",
        ));
        assert!(msg.contains("context window"));
    }

    #[test]
    fn overloaded() {
        let msg = user_facing_message(&api(529, "overloaded_error: Overloaded"));
        assert!(msg.contains("overloaded"));
    }

    #[test]
    fn timeout_variant() {
        let msg = user_facing_message(&ProviderError::Timeout("operation timed out".into()));
        assert!(msg.contains("too long to respond"));
    }

    #[test]
    fn falls_back_to_raw_message() {
        let err = ProviderError::Network("connection refused".into());
        assert_eq!(user_facing_message(&err), "Network error: connection refused");
    }
}
