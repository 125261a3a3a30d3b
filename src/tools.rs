//! Runtime tool path resolution
//!
//! For each external program the bootstrap invokes (migration tool, service
//! interpreter), we:
//! 1. Check for an environment variable `{TOOL}_BIN` (e.g., `ALEMBIC_BIN`)
//! 2. Fall back to PATH-based lookup if the envvar is not set
//!
//! Programs given as a path (containing `/`) are used verbatim.

use std::env;
use std::path::PathBuf;

/// Environment variable name that overrides the path of `tool`
///
/// Non-alphanumeric characters become underscores, so `uvicorn-worker`
/// maps to `UVICORN_WORKER_BIN`.
pub fn tool_env_var(tool: &str) -> String {
    let name: String = tool
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_BIN", name)
}

/// Get the path to an external tool
///
/// Returns the value of `{TOOL}_BIN` when set and non-empty, otherwise the
/// tool name itself, which relies on PATH.
pub fn get_tool_path(tool: &str) -> String {
    if tool.contains('/') {
        return tool.to_string();
    }
    env::var(tool_env_var(tool))
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| tool.to_string())
}

/// Resolve a program to an executable file, or `None` if it cannot be found
pub fn find_executable(program: &str) -> Option<PathBuf> {
    which::which(get_tool_path(program)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_env_var() {
        assert_eq!(tool_env_var("alembic"), "ALEMBIC_BIN");
        assert_eq!(tool_env_var("uvicorn-worker"), "UVICORN_WORKER_BIN");
        assert_eq!(tool_env_var("python3.12"), "PYTHON3_12_BIN");
    }

    #[test]
    fn test_get_tool_path_fallback() {
        assert_eq!(
            get_tool_path("definitely-not-a-real-bootstrap-tool"),
            "definitely-not-a-real-bootstrap-tool"
        );
    }

    #[test]
    fn test_get_tool_path_keeps_explicit_paths() {
        assert_eq!(get_tool_path("/usr/local/bin/alembic"), "/usr/local/bin/alembic");
        assert_eq!(get_tool_path("./venv/bin/python"), "./venv/bin/python");
    }

    #[test]
    fn test_find_executable() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("definitely-not-a-real-bootstrap-tool").is_none());
    }
}
