//! `folio run` — Run one task against a project and print the event stream.

use std::io::Write;
use std::path::{Path, PathBuf};

use folio_agent::{AgentEvent, Orchestrator, RunSettings, SPAWN_AGENT_TOOL};
use folio_core::message::{Message, Transcript};
use folio_providers::build_from_config;
use folio_tools::{Project, project_registry};

use super::load_config;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Folio, an assistant that works on LaTeX \
projects. Use the tools to inspect and edit files in the project, and compile the document \
after changing it. Paths are relative to the project root. Keep the user's existing \
structure and macros unless asked to change them.";

pub struct RunOptions {
    pub message: String,
    pub project: PathBuf,
    pub json: bool,
    pub max_iterations: Option<usize>,
    pub disable_tools: Vec<String>,
    pub subagents: bool,
    pub system: Option<String>,
}

pub async fn run(
    config_path: Option<&Path>,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if let Some(max) = options.max_iterations {
        config.limits.max_iterations = max;
        config.validate()?;
    }

    if !config.has_api_key() {
        tracing::warn!(
            provider = %config.provider.display_name(),
            "No API key configured; requests will likely be rejected"
        );
    }

    if !options.project.is_dir() {
        return Err(format!("Project directory not found: {}", options.project.display()).into());
    }
    let project = Project::new(options.project.canonicalize()?);

    let disabled = &options.disable_tools;
    let registry = project_registry(&project, &config.compiler)
        .filtered(|name| !disabled.iter().any(|d| d == name));
    let subagents = options.subagents && !disabled.iter().any(|d| d == SPAWN_AGENT_TOOL);

    let settings = RunSettings {
        system_prompt: Some(
            options
                .system
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        ),
        ..RunSettings::from_config(&config)
    };

    let provider = build_from_config(&config);
    let orchestrator = Orchestrator::with_registry(provider, registry)
        .configured(&config)
        .with_settings(settings)
        .with_subagents(subagents);

    tracing::info!(
        project = %project.root().display(),
        model = %config.provider.model,
        tools = orchestrator.offered_tools().len(),
        "Starting run"
    );

    let mut transcript = Transcript::new();
    transcript.push(Message::user_text(options.message));
    let mut events = orchestrator.run(transcript);

    let mut renderer = Renderer::default();
    let mut failure = None;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        if options.json {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        } else {
            write!(stdout, "{}", renderer.render(&event))?;
        }
        stdout.flush()?;

        if let AgentEvent::Error { message, .. } = &event {
            failure = Some(message.clone());
        }
        if event.is_terminal() {
            break;
        }
    }

    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

/// Turns events into terminal output. Text streams inline; every other
/// event gets its own line.
#[derive(Default)]
struct Renderer {
    mid_line: bool,
}

impl Renderer {
    fn render(&mut self, event: &AgentEvent) -> String {
        let line = match event {
            AgentEvent::Text { text } => {
                if !text.is_empty() {
                    self.mid_line = !text.ends_with('\n');
                }
                return text.clone();
            }
            AgentEvent::Thinking { .. } => return String::new(),
            AgentEvent::ToolCall { name, input, .. } => {
                let args = serde_json::to_string(input).unwrap_or_default();
                format!("🔧 {name} {}", truncate(&args, 80))
            }
            AgentEvent::ToolResult {
                name,
                success: true,
                ..
            } => format!("   ✅ {name}"),
            AgentEvent::ToolResult { name, error, .. } => {
                format!("   ❌ {name}: {}", error.as_deref().unwrap_or("failed"))
            }
            AgentEvent::AgentSpawn { task, .. } => {
                format!("🤖 Sub-agent: {}", truncate(task, 80))
            }
            AgentEvent::AgentResult { success: true, .. } => "   ✅ Sub-agent finished".into(),
            AgentEvent::AgentResult { error, .. } => format!(
                "   ❌ Sub-agent failed: {}",
                error.as_deref().unwrap_or("unknown error")
            ),
            AgentEvent::Error { message, .. } => format!("❌ {message}"),
            AgentEvent::Done {
                iterations,
                tool_calls_made,
                usage,
                ..
            } => {
                let tokens = usage
                    .map(|u| format!(", {} tokens", u.total_tokens))
                    .unwrap_or_default();
                format!("✨ Done: {iterations} iterations, {tool_calls_made} tool calls{tokens}")
            }
        };

        let prefix = if std::mem::take(&mut self.mid_line) {
            "\n"
        } else {
            ""
        };
        format!("{prefix}{line}\n")
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
