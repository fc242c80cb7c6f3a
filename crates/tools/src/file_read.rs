//! File read tool — read a project file.

use async_trait::async_trait;
use folio_core::error::ToolError;
use folio_core::tool::{ExecContext, Tool, ToolInput, ToolResult};

use crate::project::{Project, required_str};

/// Files larger than this are truncated in the tool output.
const MAX_READ_BYTES: usize = 256 * 1024;

pub struct ReadFileTool {
    project: Project,
}

impl ReadFileTool {
    pub fn new(project: Project) -> Self {
        Self { project }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the project."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project root"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        input: &ToolInput,
        _ctx: &ExecContext,
    ) -> Result<ToolResult, ToolError> {
        let path = required_str(input, "path")?;
        let full = self.project.resolve_for(self.name(), path)?;

        match tokio::fs::read_to_string(&full).await {
            Ok(mut content) => {
                if content.len() > MAX_READ_BYTES {
                    let mut cut = MAX_READ_BYTES;
                    while !content.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    content.truncate(cut);
                    content.push_str("\n[... truncated]");
                }
                Ok(ToolResult::ok(content))
            }
            Err(e) => Ok(ToolResult::err(format!("Failed to read {path}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: serde_json::Value) -> ToolInput {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tex"), "\\documentclass{article}").unwrap();

        let tool = ReadFileTool::new(Project::new(dir.path()));
        let result = tool
            .execute(&input(serde_json::json!({"path": "main.tex"})), &ExecContext::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("\\documentclass{article}"));
    }

    #[tokio::test]
    async fn missing_file_is_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(Project::new(dir.path()));
        let result = tool
            .execute(&input(serde_json::json!({"path": "nope.tex"})), &ExecContext::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("nope.tex"));
    }

    #[tokio::test]
    async fn traversal_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(Project::new(dir.path()));
        let result = tool
            .execute(
                &input(serde_json::json!({"path": "../etc/passwd"})),
                &ExecContext::default(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(Project::new(dir.path()));
        let result = tool.execute(&ToolInput::new(), &ExecContext::default()).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
