//! Tool trait — the abstraction over side-effecting operations.
//!
//! The orchestrator never looks inside a tool: it hands a [`ToolInvocation`]
//! to a [`ToolExecutor`] and gets a [`ToolResult`] back. Failures are values,
//! not errors, so the model can see them and self-correct.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::message::RunId;
use crate::provider::ToolDefinition;

/// Schema-less tool input as received from the model.
pub type ToolInput = serde_json::Map<String, serde_json::Value>;

/// A request to execute a tool. Identity is `id`, unique within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Call ID (matches the model's tool_use id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Input object
    #[serde(default)]
    pub input: ToolInput,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// The string fed back to the model as `tool_result` content.
    pub fn content_for_model(&self) -> String {
        if self.success {
            self.output.clone().unwrap_or_default()
        } else {
            let error = self.error.as_deref().unwrap_or("unknown error");
            match self.output.as_deref() {
                Some(output) if !output.is_empty() => format!("Error: {error}\n{output}"),
                _ => format!("Error: {error}"),
            }
        }
    }
}

/// Ambient information handed to every tool execution.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    /// The run that requested the tool
    pub run_id: RunId,

    /// 0 for the top-level run, 1 for sub-agents
    pub depth: usize,

    /// Orchestrator iteration that produced the invocation
    pub iteration: usize,
}

/// A single named tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "write_file", "compile_latex").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(
        &self,
        input: &ToolInput,
        ctx: &ExecContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// The opaque execution boundary the dispatcher talks to.
///
/// Implementations must never panic on unknown names or bad input; they
/// report those as failed results.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: &ToolInvocation, ctx: &ExecContext) -> ToolResult;
}

/// A registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::from(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions, sorted by name so requests are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// A copy holding only the tools `keep` accepts. Tools are shared, not cloned.
    pub fn filtered(&self, keep: impl Fn(&str) -> bool) -> ToolRegistry {
        ToolRegistry {
            tools: self
                .tools
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, invocation: &ToolInvocation, ctx: &ExecContext) -> ToolResult {
        let Some(tool) = self.tools.get(&invocation.name) else {
            tracing::warn!(tool = %invocation.name, "Model requested an unknown tool");
            return ToolResult::err(ToolError::NotFound(invocation.name.clone()).to_string());
        };
        match tool.execute(&invocation.input, ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %invocation.name, error = %e, "Tool execution failed");
                ToolResult::err(e.to_string())
            }
        }
    }
}
