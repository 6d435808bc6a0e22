use std::path::PathBuf;

use anyhow::{Context, Result};
use funcmatch_core::db::{open_project_db, ProjectContext, ProjectLayout};
use funcmatch_core::services::ingest::{
    attach_reference_signatures, ingest_mir, read_program_dump, AttachSummary, IngestOutcome,
};
use serde::Serialize;

use crate::commands::collect_json_files;
use crate::{canonicalize_or_current, resolve_under_root};

/// Outcome of ingesting one dump file.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

fn dump_paths(root: &std::path::Path, paths: &[String], default_dir: PathBuf) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![default_dir]
    } else {
        paths.iter().map(|p| resolve_under_root(root, p)).collect()
    }
}

fn print_reports(kind: &str, reports: &[IngestReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    if reports.is_empty() {
        println!("No {kind} dumps found.");
    }
    for report in reports {
        match report.outcome {
            IngestOutcome::Ingested { functions, skipped } => {
                println!("Ingested {}: {functions} functions ({skipped} skipped)", report.path)
            }
            IngestOutcome::AlreadyPresent => {
                println!("Already present (use --force to re-ingest): {}", report.path)
            }
        }
    }
    Ok(())
}

/// Ingest MIR dumps (`<crate>_<version>.json`) from files or directories.
///
/// With no paths, every dump under `dumps/mir` is ingested.
pub fn ingest_mir_command(root: &str, paths: &[String], force: bool, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let (_config, _db_path, db) = open_project_db(&layout)?;

    let files = collect_json_files(&dump_paths(&root_path, paths, layout.mir_dumps_dir.clone()))?;
    let mut reports = Vec::new();
    for file in files {
        let outcome = ingest_mir(&db, &file, force)
            .with_context(|| format!("Failed to ingest MIR dump {}", file.display()))?;
        reports.push(IngestReport { path: file.display().to_string(), outcome });
    }
    print_reports("MIR", &reports, json)
}

/// Ingest binary dumps (`<binary>.json`) from files or directories.
///
/// With no paths, every dump under `dumps/bin` is ingested.
pub fn ingest_bin_command(root: &str, paths: &[String], force: bool, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;

    let default_dir = ctx.layout.bin_dumps_dir.clone();
    let files = collect_json_files(&dump_paths(&root_path, paths, default_dir))?;
    let mut reports = Vec::new();
    for file in files {
        let outcome = ctx.ingest_binary_dump(&file, force)?;
        reports.push(IngestReport { path: file.display().to_string(), outcome });
    }
    print_reports("binary", &reports, json)
}

/// Attach signatures from a reference build's dump to one crate version.
pub fn attach_signatures_command(
    root: &str,
    crate_name: &str,
    version: &str,
    dump: &str,
    json: bool,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let (_config, _db_path, db) = open_project_db(&layout)?;

    let dump_path = resolve_under_root(&root_path, dump);
    let program = read_program_dump(&dump_path)?;
    let summary: AttachSummary = attach_reference_signatures(&db, crate_name, version, &program)
        .with_context(|| format!("Failed to attach signatures to {crate_name} {version}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Attached {} signatures to {crate_name} {version} ({} unresolved)",
            summary.attached, summary.unresolved
        );
    }
    Ok(())
}
