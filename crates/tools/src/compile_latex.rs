//! LaTeX compile tool — sends a project's `.tex` source to the compiler
//! service and stores the returned PDF next to it.
//!
//! Wire contract: `POST {url}/compile` with `{"latex_source": ...}` and an
//! optional bearer token; the reply is
//! `{success, pdf_base64?, pdf_size_bytes?, error?, warnings?}`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use folio_config::CompilerConfig;
use folio_core::error::ToolError;
use folio_core::tool::{ExecContext, Tool, ToolInput, ToolResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::project::{Project, required_str};

#[derive(Debug, Serialize)]
struct CompileRequest<'a> {
    latex_source: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompileResponse {
    success: bool,
    #[serde(default)]
    pdf_base64: Option<String>,
    #[serde(default)]
    pdf_size_bytes: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

pub struct CompileLatexTool {
    project: Project,
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl CompileLatexTool {
    pub fn new(project: Project, config: &CompilerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            project,
            url: config.url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
            client,
        }
    }

    async fn request(&self, source: &str) -> Result<CompileResponse, String> {
        let mut req = self
            .client
            .post(format!("{}/compile", self.url))
            .json(&CompileRequest {
                latex_source: source,
            });
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                "Compiler service timed out".to_string()
            } else {
                format!("Compiler service unreachable: {e}")
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Compiler service returned HTTP {status}: {body}"));
        }
        response
            .json::<CompileResponse>()
            .await
            .map_err(|e| format!("Invalid compiler response: {e}"))
    }
}

#[async_trait]
impl Tool for CompileLatexTool {
    fn name(&self) -> &str {
        "compile_latex"
    }

    fn description(&self) -> &str {
        "Compile a LaTeX file of the project to PDF. On failure returns the compiler's \
         error log so the source can be fixed."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The .tex file to compile, relative to the project root"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: &ToolInput, ctx: &ExecContext) -> Result<ToolResult, ToolError> {
        let path = required_str(input, "path")?;
        let source_path = self.project.resolve_for(self.name(), path)?;

        let source = match tokio::fs::read_to_string(&source_path).await {
            Ok(s) => s,
            Err(e) => return Ok(ToolResult::err(format!("Failed to read {path}: {e}"))),
        };
        debug!(run_id = %ctx.run_id, path, bytes = source.len(), "Submitting LaTeX source");

        let response = match self.request(&source).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::err(e)),
        };

        if !response.success {
            let log = response.error.unwrap_or_else(|| "unknown compiler error".into());
            info!(run_id = %ctx.run_id, path, "LaTeX compilation failed");
            return Ok(ToolResult {
                success: false,
                output: Some(log),
                error: Some(format!("Compilation of {path} failed")),
            });
        }

        let Some(encoded) = response.pdf_base64 else {
            return Ok(ToolResult::err("Compiler reported success but returned no PDF"));
        };
        let pdf = match STANDARD.decode(encoded.trim()) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(ToolResult::err(format!(
                    "Compiler returned invalid PDF data: {e}"
                )));
            }
        };

        let pdf_path = source_path.with_extension("pdf");
        if let Err(e) = tokio::fs::write(&pdf_path, &pdf).await {
            return Ok(ToolResult::err(format!("Failed to write PDF: {e}")));
        }

        let size = response.pdf_size_bytes.unwrap_or(pdf.len() as u64);
        let mut output = format!(
            "Compiled {path} successfully: {} ({size} bytes)",
            self.project.relative_display(&pdf_path)
        );
        if let Some(warnings) = response.warnings.filter(|w| !w.is_empty()) {
            output.push_str(&format!("\nWarnings ({}):", warnings.len()));
            for w in warnings {
                output.push_str("\n- ");
                output.push_str(&w);
            }
        }
        info!(run_id = %ctx.run_id, path, size, "LaTeX compilation succeeded");
        Ok(ToolResult::ok(output))
    }
}
