//! Strategy selection — builds the one provider a run talks to from config.

use std::sync::Arc;
use std::time::Duration;

use folio_config::{AppConfig, ProviderKind};
use folio_core::provider::Provider;
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::RetryPolicy;

/// Build the provider strategy named by `[provider].kind`.
///
/// A missing API key is not an error here; the provider reports
/// `NotConfigured` on its first call.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let provider = &config.provider;
    let api_key = provider.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!(provider = %provider.display_name(), "No API key configured");
    }
    let timeout = Duration::from_secs(provider.request_timeout_secs);
    let base_url = provider.effective_base_url();

    info!(
        kind = %provider.kind,
        provider = %provider.display_name(),
        model = %provider.model,
        base_url = %base_url,
        "Selected provider strategy"
    );

    match provider.kind {
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(api_key)
                .with_name(provider.display_name())
                .with_base_url(base_url)
                .with_request_timeout(timeout)
                .with_keepalive(Duration::from_secs(provider.keepalive_secs.max(1)));
            if let Some(budget) = provider.thinking_budget {
                p = p.with_extended_thinking(budget);
            }
            Arc::new(p)
        }
        ProviderKind::OpenaiCompat => {
            if provider.thinking_budget.is_some() {
                warn!("thinking_budget is ignored by the openai_compat strategy");
            }
            Arc::new(
                OpenAiCompatProvider::new(provider.display_name(), base_url, api_key)
                    .with_request_timeout(timeout)
                    .with_retry_policy(RetryPolicy::from_config(&config.retry)),
            )
        }
    }
}
