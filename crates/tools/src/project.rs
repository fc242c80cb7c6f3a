//! Project-root sandbox shared by every file tool.
//!
//! Tool paths are always relative to the project directory. Absolute paths
//! and any `..` component are rejected before the filesystem is touched.

use std::path::{Component, Path, PathBuf};

use folio_core::error::ToolError;
use folio_core::tool::ToolInput;

/// Errors from resolving a model-supplied path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,

    #[error("Absolute paths are not allowed: {0}")]
    Absolute(String),

    #[error("Path traversal detected: {0}")]
    Traversal(String),
}

/// A LaTeX project directory the tools operate inside.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path to a location under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, PathError> {
        let normalized = relative.trim().replace('\\', "/");
        if normalized.is_empty() {
            return Err(PathError::Empty);
        }
        let path = Path::new(&normalized);
        if path.is_absolute() || normalized.starts_with('/') {
            return Err(PathError::Absolute(relative.into()));
        }

        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => return Err(PathError::Traversal(relative.into())),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute(relative.into()));
                }
            }
        }
        Ok(resolved)
    }

    /// Display form of an absolute path under the root, using `/` separators.
    pub fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Resolve, mapping failures onto the tool error taxonomy.
    pub(crate) fn resolve_for(
        &self,
        tool_name: &str,
        relative: &str,
    ) -> Result<PathBuf, ToolError> {
        self.resolve(relative).map_err(|e| ToolError::PermissionDenied {
            tool_name: tool_name.into(),
            reason: e.to_string(),
        })
    }
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(input: &'a ToolInput, key: &str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_nested_relative_paths() {
        let project = Project::new("/work/thesis");
        assert_eq!(
            project.resolve("chapters/./intro.tex").unwrap(),
            PathBuf::from("/work/thesis/chapters/intro.tex")
        );
    }

    #[test]
    fn rejects_absolute_paths() {
        let project = Project::new("/work/thesis");
        assert!(matches!(project.resolve("/etc/passwd"), Err(PathError::Absolute(_))));
    }

    #[test]
    fn rejects_traversal() {
        let project = Project::new("/work/thesis");
        assert!(matches!(
            project.resolve("chapters/../../secret.tex"),
            Err(PathError::Traversal(_))
        ));
        assert!(matches!(project.resolve(".."), Err(PathError::Traversal(_))));
        assert!(matches!(
            project.resolve("..\\outside.tex"),
            Err(PathError::Traversal(_))
        ));
    }

    #[test]
    fn rejects_empty() {
        let project = Project::new("/work/thesis");
        assert_eq!(project.resolve("  "), Err(PathError::Empty));
    }

    #[test]
    fn relative_display_strips_root() {
        let project = Project::new("/work/thesis");
        let path = project.resolve("figures/plot.pdf").unwrap();
        assert_eq!(project.relative_display(&path), "figures/plot.pdf");
    }
}
