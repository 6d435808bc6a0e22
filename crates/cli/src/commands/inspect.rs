use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use funcmatch_core::db::ProjectLayout;
use funcmatch_core::demangle::demangle;
use funcmatch_core::name::{self, Declaration, StructuralKey};
use funcmatch_core::program::{dump_program, entry_key, CapstoneProgram, ProgramView};
use funcmatch_core::services::ingest::classify;
use funcmatch_core::signature::function_signature;
use serde::Serialize;
use tracing::debug;

use crate::{canonicalize_or_current, resolve_under_root};

#[derive(Serialize)]
pub struct ParsedName {
    pub input: String,
    pub demangled: String,
    pub declaration: Declaration,
    pub structural_key: StructuralKey,
    #[serde(rename = "crate")]
    pub crate_name: Option<String>,
    pub kind: funcmatch_core::db::FunctionKind,
}

#[derive(Serialize)]
pub struct FunctionSignature {
    pub entry: String,
    pub name: String,
    pub signature: String,
}

/// Parse one symbol (mangled or demangled) and show its structure.
pub fn parse_name_command(input: &str, json: bool) -> Result<()> {
    let demangled = match demangle(input) {
        Ok(demangled) => demangled,
        Err(_) => input.to_string(),
    };
    let declaration = name::parse(&demangled)
        .with_context(|| format!("Failed to parse name `{demangled}`"))?;
    let crate_name = declaration.crate_name();
    let parsed = ParsedName {
        input: input.to_string(),
        structural_key: declaration.structural_key(crate_name.as_deref()),
        kind: classify(&declaration),
        crate_name,
        demangled,
        declaration,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }
    println!("Name: {}", parsed.declaration);
    println!("Crate: {}", parsed.crate_name.as_deref().unwrap_or("(unknown)"));
    println!("Kind: {}", parsed.kind.label());
    println!("Tokens: {}", parsed.structural_key.tokens.join(" :: "));
    if let Some((implemented_trait, implementing_type)) = &parsed.structural_key.trait_clause {
        println!("Trait: {}", implemented_trait.join("::"));
        println!("Implementing type: {}", implementing_type.join("::"));
    }
    Ok(())
}

/// Print the signature of every function (or those whose label contains `filter`).
pub fn signature_command(binary: &str, filter: Option<&str>, json: bool) -> Result<()> {
    let program = CapstoneProgram::open(Path::new(binary))
        .with_context(|| format!("Failed to load binary {binary}"))?;

    let mut rows = Vec::new();
    for function in program.functions() {
        if filter.is_some_and(|f| !function.name.contains(f)) {
            continue;
        }
        rows.push(FunctionSignature {
            entry: entry_key(function.entry),
            signature: function_signature(&program, &function),
            name: function.name,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in &rows {
        println!("{} {} {}", row.entry, row.signature, row.name);
    }
    Ok(())
}

/// Disassemble a binary and write its dump into the project's `dumps/bin`.
pub fn extract_command(
    root: &str,
    binary: &str,
    name: Option<String>,
    output: Option<String>,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let binary_path = resolve_under_root(&root_path, binary);
    let program = CapstoneProgram::open(&binary_path)
        .with_context(|| format!("Failed to load binary {}", binary_path.display()))?;
    let dump = dump_program(&program);

    let binary_name = name.unwrap_or_else(|| {
        binary_path.file_stem().and_then(|s| s.to_str()).unwrap_or("binary").to_string()
    });
    let out_path = match output {
        Some(out) => resolve_under_root(&root_path, &out),
        None => layout.binary_dump_path(&binary_name),
    };
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&out_path, serde_json::to_string_pretty(&dump)?)
        .with_context(|| format!("Failed to write dump {}", out_path.display()))?;

    let rust_functions = dump.values().filter(|f| f.is_rust_func).count();
    debug!(path = %out_path.display(), functions = dump.len(), rust_functions, "wrote binary dump");
    println!("Extracted {}:", binary_path.display());
    println!("  Functions: {} ({} Rust)", dump.len(), rust_functions);
    println!("  Dump: {}", out_path.display());
    Ok(())
}
