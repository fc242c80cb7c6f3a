//! Case-insensitive line search across project files.

use async_trait::async_trait;
use folio_core::error::ToolError;
use folio_core::tool::{ExecContext, Tool, ToolInput, ToolResult};

use crate::list_files::walk_files;
use crate::project::{Project, required_str};

const MAX_MATCHES: usize = 100;
const MAX_SCANNED_FILES: usize = 2000;
const MAX_LINE_CHARS: usize = 200;

pub struct SearchFilesTool {
    project: Project,
}

impl SearchFilesTool {
    pub fn new(project: Project) -> Self {
        Self { project }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search project files for a case-insensitive text match. Returns \
         `path:line: text` for each matching line."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Optional file or directory to restrict the search to"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        input: &ToolInput,
        _ctx: &ExecContext,
    ) -> Result<ToolResult, ToolError> {
        let query = required_str(input, "query")?;
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'query' must not be empty".into()));
        }
        let needle = query.to_lowercase();

        let start = match input.get("path").and_then(|v| v.as_str()) {
            Some(path) if !path.trim().is_empty() && path.trim() != "." => {
                self.project.resolve_for(self.name(), path)?
            }
            _ => self.project.root().to_path_buf(),
        };

        let files = if start.is_file() {
            vec![start]
        } else {
            match walk_files(&start, MAX_SCANNED_FILES).await {
                Ok(files) => files,
                Err(e) => return Ok(ToolResult::err(format!("Failed to search: {e}"))),
            }
        };

        let mut matches = Vec::new();
        'files: for file in &files {
            // binary or unreadable files are skipped
            let Ok(content) = tokio::fs::read_to_string(file).await else {
                continue;
            };
            for (n, line) in content.lines().enumerate() {
                if line.to_lowercase().contains(&needle) {
                    let text: String = line.trim().chars().take(MAX_LINE_CHARS).collect();
                    matches.push(format!(
                        "{}:{}: {}",
                        self.project.relative_display(file),
                        n + 1,
                        text
                    ));
                    if matches.len() >= MAX_MATCHES {
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            return Ok(ToolResult::ok(format!("No matches for '{query}'")));
        }
        if matches.len() >= MAX_MATCHES {
            matches.push(format!("[... results capped at {MAX_MATCHES} matches]"));
        }
        Ok(ToolResult::ok(matches.join("\n")))
    }
}
