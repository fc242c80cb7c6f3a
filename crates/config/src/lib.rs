//! Configuration loading, validation, and management for Folio.
//!
//! Loads configuration from `~/.folio/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.folio/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider selection and request defaults
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Rate-limit retry policy for the blocking strategy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-run iteration bounds
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Tool ordering classes
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// LaTeX compiler service
    #[serde(default)]
    pub compiler: CompilerConfig,
}

/// Which wire protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API with incremental SSE streaming
    #[default]
    Anthropic,
    /// Any OpenAI-compatible chat completions endpoint, single blocking response
    OpenaiCompat,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenaiCompat => write!(f, "openai_compat"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai_compat" | "openai" | "openrouter" => Ok(Self::OpenaiCompat),
            other => Err(ConfigError::ValidationError(format!(
                "unknown provider kind '{other}' (expected 'anthropic' or 'openai_compat')"
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Display name used in logs (defaults to the kind)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Overrides the kind's default endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Enables extended thinking on the streaming strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Keep-alive interval while a tool input is still streaming
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_keepalive_secs() -> u64 {
    15
}

impl ProviderConfig {
    /// The configured name, or the kind's name.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.kind.to_string())
    }

    /// The endpoint to call, falling back to the kind's public API.
    pub fn effective_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match self.kind {
                ProviderKind::Anthropic => "https://api.anthropic.com".into(),
                ProviderKind::OpenaiCompat => "https://api.openai.com/v1".into(),
            },
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            name: None,
            api_key: None,
            base_url: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            thinking_budget: None,
            request_timeout_secs: default_request_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("thinking_budget", &self.thinking_budget)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("keepalive_secs", &self.keepalive_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_subagent_max_iterations")]
    pub subagent_max_iterations: usize,

    /// Self-assessment rounds after a successful build
    #[serde(default = "default_max_quality_assessments")]
    pub max_quality_assessments: usize,

    /// Compact-retry corrections after a truncated turn
    #[serde(default = "default_max_truncation_retries")]
    pub max_truncation_retries: usize,
}

fn default_max_iterations() -> usize {
    25
}
fn default_subagent_max_iterations() -> usize {
    8
}
fn default_max_quality_assessments() -> usize {
    2
}
fn default_max_truncation_retries() -> usize {
    2
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            subagent_max_iterations: default_subagent_max_iterations(),
            max_quality_assessments: default_max_quality_assessments(),
            max_truncation_retries: default_max_truncation_retries(),
        }
    }
}

/// Declares which tools must finish before the rest of a turn runs, and
/// which tools count as a successful build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_producer_tools")]
    pub producer_tools: Vec<String>,

    #[serde(default = "default_build_tools")]
    pub build_tools: Vec<String>,
}

fn default_producer_tools() -> Vec<String> {
    vec!["write_file".into()]
}
fn default_build_tools() -> Vec<String> {
    vec!["compile_latex".into()]
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            producer_tools: default_producer_tools(),
            build_tools: default_build_tools(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default = "default_compiler_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default = "default_compiler_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_compiler_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_compiler_timeout_secs() -> u64 {
    90
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            url: default_compiler_url(),
            auth_token: None,
            timeout_secs: default_compiler_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for CompilerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerConfig")
            .field("url", &self.url)
            .field("auth_token", &redact(&self.auth_token))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.folio/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `FOLIO_API_KEY`, then `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`
    ///   depending on the provider kind
    /// - `FOLIO_PROVIDER`, `FOLIO_MODEL`, `FOLIO_BASE_URL`
    /// - `FOLIO_COMPILER_URL`, `FOLIO_COMPILER_TOKEN`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(kind) = non_empty("FOLIO_PROVIDER") {
            self.provider.kind = kind.parse()?;
        }
        if let Some(model) = non_empty("FOLIO_MODEL") {
            self.provider.model = model;
        }
        if let Some(url) = non_empty("FOLIO_BASE_URL") {
            self.provider.base_url = Some(url);
        }

        let vendor_key = match self.provider.kind {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenaiCompat => "OPENAI_API_KEY",
        };
        if let Some(key) = non_empty("FOLIO_API_KEY") {
            self.provider.api_key = Some(key);
        } else if self.provider.api_key.is_none() {
            self.provider.api_key = non_empty(vendor_key);
        }

        if let Some(url) = non_empty("FOLIO_COMPILER_URL") {
            self.compiler.url = url;
        }
        if let Some(token) = non_empty("FOLIO_COMPILER_TOKEN") {
            self.compiler.auth_token = Some(token);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".folio")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.provider.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.provider.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "provider.max_tokens must be > 0".into(),
            ));
        }
        if let Some(budget) = self.provider.thinking_budget
            && budget >= self.provider.max_tokens
        {
            return Err(ConfigError::ValidationError(format!(
                "provider.thinking_budget ({budget}) must be less than provider.max_tokens ({})",
                self.provider.max_tokens
            )));
        }
        if self.limits.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_iterations must be >= 1".into(),
            ));
        }
        if self.limits.subagent_max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "limits.subagent_max_iterations must be >= 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
        assert_eq!(config.provider.request_timeout_secs, 120);
        assert_eq!(config.limits.max_iterations, 25);
        assert_eq!(config.dispatch.producer_tools, vec!["write_file"]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.retry.max_delay_ms, config.retry.max_delay_ms);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = Some(5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.limits.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn thinking_budget_must_fit_under_max_tokens() {
        let mut config = AppConfig::default();
        config.provider.max_tokens = 8192;
        config.provider.thinking_budget = Some(8192);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("thinking_budget"));

        config.provider.thinking_budget = Some(4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_retry_delays_rejected() {
        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[provider]
kind = "openai_compat"
base_url = "https://openrouter.ai/api/v1/"
model = "deepseek/deepseek-chat"

[dispatch]
producer_tools = ["write_file", "append_file"]
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::OpenaiCompat);
        assert_eq!(
            config.provider.effective_base_url(),
            "https://openrouter.ai/api/v1"
        );
        assert_eq!(config.dispatch.producer_tools.len(), 2);
        assert_eq!(config.dispatch.build_tools, vec!["compile_latex"]);
        assert_eq!(config.limits.subagent_max_iterations, 8);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[provider\nkind = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("from-file".into());
        config
            .apply_env(env(&[
                ("FOLIO_PROVIDER", "openai_compat"),
                ("FOLIO_MODEL", "gpt-4o"),
                ("FOLIO_API_KEY", "from-env"),
                ("FOLIO_COMPILER_URL", "http://compiler:8000"),
            ]))
            .unwrap();
        assert_eq!(config.provider.kind, ProviderKind::OpenaiCompat);
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.compiler.url, "http://compiler:8000");
    }

    #[test]
    fn vendor_key_follows_provider_kind() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("ANTHROPIC_API_KEY", "sk-ant"),
                ("OPENAI_API_KEY", "sk-openai"),
            ]))
            .unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-ant"));
    }

    #[test]
    fn unknown_provider_kind_rejected() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env(&[("FOLIO_PROVIDER", "gemini")])).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        config.compiler.auth_token = Some("tok-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("tok-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[provider]"));
        assert!(toml_str.contains("compile_latex"));
        assert!(toml_str.contains("max_iterations = 25"));
    }
}
