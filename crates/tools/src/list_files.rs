//! Directory listing and the shared project walker.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use folio_core::error::ToolError;
use folio_core::tool::{ExecContext, Tool, ToolInput, ToolResult};

use crate::project::Project;

const MAX_LISTED_FILES: usize = 500;

/// Collect regular files under `start`, depth-first, skipping hidden
/// entries. Stops after `limit` files. Result is sorted.
pub(crate) async fn walk_files(start: &Path, limit: usize) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![start.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
                if files.len() >= limit {
                    files.sort();
                    return Ok(files);
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

pub struct ListFilesTool {
    project: Project,
}

impl ListFilesTool {
    pub fn new(project: Project) -> Self {
        Self { project }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List every file in the project, one relative path per line."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _input: &ToolInput,
        _ctx: &ExecContext,
    ) -> Result<ToolResult, ToolError> {
        let files = match walk_files(self.project.root(), MAX_LISTED_FILES).await {
            Ok(files) => files,
            Err(e) => return Ok(ToolResult::err(format!("Failed to list project: {e}"))),
        };
        if files.is_empty() {
            return Ok(ToolResult::ok("(project is empty)"));
        }

        let mut listing: Vec<String> = files
            .iter()
            .map(|p| self.project.relative_display(p))
            .collect();
        if listing.len() >= MAX_LISTED_FILES {
            listing.push(format!("[... listing capped at {MAX_LISTED_FILES} files]"));
        }
        Ok(ToolResult::ok(listing.join("\n")))
    }
}
