//! `folio check` — Load and validate configuration.

use std::path::Path;

use folio_config::AppConfig;

use super::load_config;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Folio configuration check");
    println!("=========================\n");

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config error: {e}");
            return Err(e.into());
        }
    };

    for line in summary(&config) {
        println!("  {line}");
    }

    println!();
    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key — set FOLIO_API_KEY or provider.api_key");
    }
    Ok(())
}

/// What a run would use, one line per setting.
fn summary(config: &AppConfig) -> Vec<String> {
    let p = &config.provider;
    let l = &config.limits;
    vec![
        format!(
            "Provider:   {} ({}, {})",
            p.display_name(),
            p.kind,
            p.effective_base_url()
        ),
        format!("Model:      {} (max_tokens {})", p.model, p.max_tokens),
        format!(
            "Limits:     {} iterations, {} per sub-agent, {} quality rounds, {} truncation retries",
            l.max_iterations,
            l.subagent_max_iterations,
            l.max_quality_assessments,
            l.max_truncation_retries
        ),
        format!(
            "Retry:      {} attempts, {}-{} ms backoff",
            config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
        ),
        format!(
            "Dispatch:   producers [{}], build [{}]",
            config.dispatch.producer_tools.join(", "),
            config.dispatch.build_tools.join(", ")
        ),
        format!("Compiler:   {}", config.compiler.url),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_provider_and_limits() {
        let lines = summary(&AppConfig::default());
        assert!(lines[0].contains("anthropic"));
        assert!(lines[0].contains("https://api.anthropic.com"));
        assert!(lines[2].contains("25 iterations"));
        assert!(lines[4].contains("write_file"));
    }
}
