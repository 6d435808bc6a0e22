use anyhow::{anyhow, Context, Result};
use funcmatch_core::db::{open_project_db, AnalysisStatus, ProjectContext, ProjectLayout};
use funcmatch_core::services::matching::MatchRequest;

use crate::canonicalize_or_current;
use crate::commands::{emit_structured, parse_crate_version, OutputFormat};

/// Run a matching pass for one crate version.
pub fn match_command(
    root: &str,
    crate_name: &str,
    version: &str,
    candidates: &[String],
    json: bool,
) -> Result<()> {
    let ctx = ProjectContext::from_root(canonicalize_or_current(root)?)?;

    let mut request = MatchRequest::new(crate_name, version);
    for spec in candidates {
        request.extra_candidates.push(parse_crate_version(spec)?);
    }

    let summary = ctx.match_crate(&request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("Matched {} {}:", summary.crate_name, summary.version);
    println!("  Considered: {}", summary.considered);
    println!("  Linked by name: {}", summary.linked_by_name);
    println!("  Linked by signature: {}", summary.linked_by_signature);
    println!("  Unmatched: {}", summary.unmatched);
    println!("  Parse failures: {}", summary.failures);
    Ok(())
}

/// List persisted binary → source links.
pub fn list_matches_command(
    root: &str,
    crate_filter: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let (_config, _db_path, db) = open_project_db(&layout)?;

    let links = db.list_matches(crate_filter).context("Failed to list matches")?;
    if emit_structured(&links, format)? {
        return Ok(());
    }
    if links.is_empty() {
        println!("No matches recorded.");
        return Ok(());
    }
    for link in &links {
        println!(
            "{} {:#010x} {} -> {}@{} {}",
            link.binary,
            link.address,
            link.binary_name,
            link.crate_name,
            link.version,
            link.source_name
        );
    }
    Ok(())
}

fn parse_status(value: &str) -> Result<AnalysisStatus> {
    match value {
        "ok" => Ok(AnalysisStatus::Ok),
        "unknown-format" => Ok(AnalysisStatus::UnknownFormat),
        "bad-binary" => Ok(AnalysisStatus::BadBinary),
        "unwanted-crate" => Ok(AnalysisStatus::UnwantedCrate),
        other => Err(anyhow!(
            "Unknown status `{other}`; expected ok, unknown-format, bad-binary or unwanted-crate"
        )),
    }
}

/// List the stored functions of one binary.
pub fn list_functions_command(
    root: &str,
    binary: &str,
    status: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let (_config, _db_path, db) = open_project_db(&layout)?;

    let status = status.map(parse_status).transpose()?;
    let functions = db.binary_functions(binary, status).context("Failed to list functions")?;
    if emit_structured(&functions, format)? {
        return Ok(());
    }
    if functions.is_empty() {
        println!("No functions recorded for {binary}.");
        return Ok(());
    }
    for stored in &functions {
        let f = &stored.record;
        println!(
            "{:#010x} {} [{} {:?}] {}{}",
            f.address,
            f.signature,
            f.function.kind.label(),
            f.function.status,
            f.function.full_name,
            if f.matched_source.is_some() { " (linked)" } else { "" }
        );
    }
    Ok(())
}
