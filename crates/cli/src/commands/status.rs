use anyhow::{Context, Result};
use funcmatch_core::db::{open_project_db, CrateRecord, MatchRunRecord, ProjectLayout, ProjectStats};
use serde::Serialize;

use crate::canonicalize_or_current;

#[derive(Serialize)]
pub struct CrateStatus {
    #[serde(flatten)]
    pub krate: CrateRecord,
    pub source_functions: usize,
}

#[derive(Serialize)]
pub struct StatusSnapshot {
    pub stats: ProjectStats,
    pub crates: Vec<CrateStatus>,
    pub binaries: Vec<String>,
    pub match_runs: Vec<MatchRunRecord>,
}

/// Summarize what has been ingested and matched so far.
pub fn status_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let (_config, _db_path, db) = open_project_db(&layout)?;

    let stats = db.stats().context("Failed to read project statistics")?;
    let mut crates = Vec::new();
    for krate in db.list_crates().context("Failed to list crates")? {
        let source_functions = db.count_source_functions(krate.id)?;
        crates.push(CrateStatus { krate, source_functions });
    }
    let binaries = db.list_binaries().context("Failed to list binaries")?;
    let mut binary_lines = Vec::new();
    for binary in &binaries {
        let count = db.count_binary_functions(binary.id)?;
        binary_lines.push(format!("{} ({count} functions)", binary.name));
    }
    let match_runs = db.list_match_runs().context("Failed to list match runs")?;

    if json {
        let snapshot = StatusSnapshot { stats, crates, binaries: binary_lines, match_runs };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Crates:");
    if crates.is_empty() {
        println!("  (none)");
    }
    for c in &crates {
        println!("  {} {} ({} functions)", c.krate.name, c.krate.version, c.source_functions);
    }
    println!("Binaries:");
    if binary_lines.is_empty() {
        println!("  (none)");
    }
    for line in &binary_lines {
        println!("  {line}");
    }
    println!(
        "Links: {} binary functions linked to {} source functions",
        stats.linked_binary_functions, stats.matched_source_functions
    );
    println!("Match runs:");
    if match_runs.is_empty() {
        println!("  (none)");
    }
    for run in &match_runs {
        println!(
            "  {} {} [{}] name={} signature={} unmatched={} failures={} at {}",
            run.crate_name,
            run.version,
            run.status.as_str(),
            run.linked_by_name,
            run.linked_by_signature,
            run.unmatched,
            run.failures,
            run.finished_at
        );
    }
    Ok(())
}
