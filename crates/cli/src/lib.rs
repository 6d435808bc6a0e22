use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod commands;
pub mod logging;

/// Canonicalize the root path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        // The path may not exist yet (init-project); join it with the cwd instead.
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Infer a project name from the root path.
///
/// If the root has no final component (e.g., `/`), fallback to `unnamed-project`.
pub fn infer_project_name(root: &Path) -> String {
    root.file_name().and_then(|os_str| os_str.to_str()).unwrap_or("unnamed-project").to_string()
}

/// Resolve `path` against the project root unless it is already absolute.
pub fn resolve_under_root(root: &Path, path: &str) -> PathBuf {
    let input = Path::new(path);
    if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    }
}
