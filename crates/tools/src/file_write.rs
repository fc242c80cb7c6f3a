//! File write tool — create or overwrite a project file.

use async_trait::async_trait;
use folio_core::error::ToolError;
use folio_core::tool::{ExecContext, Tool, ToolInput, ToolResult};
use tracing::debug;

use crate::project::{Project, required_str};

pub struct WriteFileTool {
    project: Project,
}

impl WriteFileTool {
    pub fn new(project: Project) -> Self {
        Self { project }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a project file. Creates the file and any missing parent \
         directories, overwrites it if it exists."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "The full file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: &ToolInput, ctx: &ExecContext) -> Result<ToolResult, ToolError> {
        let path = required_str(input, "path")?;
        let content = required_str(input, "content")?;
        let full = self.project.resolve_for(self.name(), path)?;

        if let Some(parent) = full.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolResult::err(format!("Failed to create directory: {e}")));
        }

        match tokio::fs::write(&full, content).await {
            Ok(()) => {
                debug!(run_id = %ctx.run_id, path, bytes = content.len(), "Wrote project file");
                Ok(ToolResult::ok(format!(
                    "Successfully wrote {} bytes to {path}",
                    content.len()
                )))
            }
            Err(e) => Ok(ToolResult::err(format!("Failed to write {path}: {e}"))),
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
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(Project::new(dir.path()));
        let result = tool
            .execute(
                &input(serde_json::json!({"path": "main.tex", "content": "Hello from test!"})),
                &ExecContext::default(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.unwrap().contains("16 bytes"));
        let content = std::fs::read_to_string(dir.path().join("main.tex")).unwrap();
        assert_eq!(content, "Hello from test!");
    }

    #[tokio::test]
    async fn creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(Project::new(dir.path()));
        let result = tool
            .execute(
                &input(serde_json::json!({"path": "chapters/one/intro.tex", "content": "x"})),
                &ExecContext::default(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert!(dir.path().join("chapters/one/intro.tex").exists());
    }

    #[tokio::test]
    async fn overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tex"), "old content").unwrap();
        let tool = WriteFileTool::new(Project::new(dir.path()));
        tool.execute(
            &input(serde_json::json!({"path": "main.tex", "content": "new content"})),
            &ExecContext::default(),
        )
        .await
        .unwrap();
        let content = std::fs::read_to_string(dir.path().join("main.tex")).unwrap();
        assert_eq!(content, "new content");
    }

    #[tokio::test]
    async fn missing_content_argument() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(Project::new(dir.path()));
        let result = tool
            .execute(&input(serde_json::json!({"path": "main.tex"})), &ExecContext::default())
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn absolute_path_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(Project::new(dir.path()));
        let result = tool
            .execute(
                &input(serde_json::json!({"path": "/etc/crontab", "content": "malicious"})),
                &ExecContext::default(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
