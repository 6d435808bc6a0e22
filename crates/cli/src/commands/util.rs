use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use serde::Serialize;

/// Output format for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Print `value` as JSON or YAML. Returns `false` for text, which the caller renders itself.
pub fn emit_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<bool> {
    match format {
        OutputFormat::Text => Ok(false),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(true)
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
            Ok(true)
        }
    }
}

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

/// Expand files and directories into the `.json` files they name, sorted.
///
/// Directories are scanned one level deep. A path that does not exist is an error.
pub fn collect_json_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            for entry in
                fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))?
            {
                let entry_path = entry?.path();
                if entry_path.is_file()
                    && entry_path.extension().and_then(|e| e.to_str()) == Some("json")
                {
                    found.push(entry_path);
                }
            }
            found.sort();
            out.extend(found);
        } else if path.is_file() {
            out.push(path.clone());
        } else {
            return Err(anyhow!("Dump path does not exist: {}", path.display()));
        }
    }
    Ok(out)
}

/// Parse `crate@version`.
pub fn parse_crate_version(spec: &str) -> Result<(String, String)> {
    match spec.split_once('@') {
        Some((krate, version)) if !krate.is_empty() && !version.is_empty() => {
            Ok((krate.to_string(), version.to_string()))
        }
        _ => Err(anyhow!("Expected `crate@version`, got `{spec}`")),
    }
}
