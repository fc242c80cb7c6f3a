//! Built-in tools for a LaTeX project directory.
//!
//! Every tool is sandboxed to one project root: paths are relative,
//! absolute paths and `..` traversal are refused.

pub mod compile_latex;
pub mod file_read;
pub mod file_write;
pub mod list_files;
pub mod project;
pub mod search_files;

use folio_config::CompilerConfig;
use folio_core::tool::ToolRegistry;

pub use compile_latex::CompileLatexTool;
pub use file_read::ReadFileTool;
pub use file_write::WriteFileTool;
pub use list_files::ListFilesTool;
pub use project::{PathError, Project};
pub use search_files::SearchFilesTool;

/// Create a registry with every project tool.
pub fn project_registry(project: &Project, compiler: &CompilerConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ReadFileTool::new(project.clone())));
    registry.register(Box::new(WriteFileTool::new(project.clone())));
    registry.register(Box::new(ListFilesTool::new(project.clone())));
    registry.register(Box::new(SearchFilesTool::new(project.clone())));
    registry.register(Box::new(CompileLatexTool::new(project.clone(), compiler)));
    registry
}
