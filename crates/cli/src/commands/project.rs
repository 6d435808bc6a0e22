use std::fs;

use anyhow::{Context, Result};
use funcmatch_core::db::{
    open_project_db, save_project_config, MatchPolicy, ProjectConfig, ProjectDb, ProjectLayout,
    ProjectStats,
};
use serde::Serialize;

use crate::commands::print_dir_status;
use crate::{canonicalize_or_current, infer_project_name};

#[derive(Serialize)]
pub struct ProjectInfoSnapshot {
    pub name: String,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub wanted_crates: Vec<String>,
    pub matching: MatchPolicy,
    pub layout: ProjectInfoLayout,
    pub stats: ProjectStats,
}

#[derive(Serialize)]
pub struct ProjectInfoLayout {
    pub meta_dir: String,
    pub mir_dumps_dir: String,
    pub bin_dumps_dir: String,
    pub reports_dir: String,
}

/// Initialize a new project at `root`.
pub fn init_project_command(
    root: &str,
    name: Option<String>,
    wanted_crates: Vec<String>,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let project_name = match name {
        Some(n) => n,
        None => infer_project_name(&root_path),
    };

    for dir in [&layout.meta_dir, &layout.mir_dumps_dir, &layout.bin_dumps_dir, &layout.reports_dir]
    {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let mut config = ProjectConfig::new(&project_name, layout.db_path_relative_string());
    config.wanted_crates = wanted_crates;
    save_project_config(&layout, &config)?;

    // Create the project database immediately so follow-on commands (and tests)
    // can rely on its presence.
    ProjectDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize project database at {}", layout.db_path.display())
    })?;

    println!("Initialized funcmatch project:");
    println!("  Name: {}", project_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.project_config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  MIR dumps dir: {}", layout.mir_dumps_dir.display());
    println!("  Binary dumps dir: {}", layout.bin_dumps_dir.display());
    println!("  Reports dir: {}", layout.reports_dir.display());

    Ok(())
}

/// Show basic information about an existing project.
pub fn project_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (config, _db_path, db) = open_project_db(&layout)?;
    let stats = db.stats().context("Failed to read project statistics")?;

    if json {
        let snapshot = ProjectInfoSnapshot {
            name: config.name.clone(),
            root: layout.root.display().to_string(),
            config_file: layout.project_config_path.display().to_string(),
            config_version: config.config_version.clone(),
            db_path: config.db.path.clone(),
            wanted_crates: config.wanted_crates.clone(),
            matching: config.matching.clone(),
            layout: ProjectInfoLayout {
                meta_dir: layout.meta_dir.display().to_string(),
                mir_dumps_dir: layout.mir_dumps_dir.display().to_string(),
                bin_dumps_dir: layout.bin_dumps_dir.display().to_string(),
                reports_dir: layout.reports_dir.display().to_string(),
            },
            stats,
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("funcmatch Project Info");
    println!("======================");
    println!("Name: {}", config.name);
    println!("Root: {}", layout.root.display());
    println!("Config file: {}", layout.project_config_path.display());
    println!("Config version: {}", config.config_version);
    println!("DB path (config): {}", config.db.path);
    if config.wanted_crates.is_empty() {
        println!("Wanted crates: (all)");
    } else {
        println!("Wanted crates: {}", config.wanted_crates.join(", "));
    }
    println!(
        "Matching: max failure ratio {}, tie break {:?}",
        config.matching.max_failure_ratio, config.matching.tie_break
    );
    println!();

    println!("Directories:");
    print_dir_status("Meta dir (.funcmatch)", &layout.meta_dir);
    print_dir_status("MIR dumps dir", &layout.mir_dumps_dir);
    print_dir_status("Binary dumps dir", &layout.bin_dumps_dir);
    print_dir_status("Reports dir", &layout.reports_dir);
    println!();

    println!("Database:");
    println!("- Crate versions: {}", stats.crates);
    println!("- Binaries: {}", stats.binaries);
    println!("- Source functions: {}", stats.source_functions);
    println!("- Binary functions: {}", stats.binary_functions);

    Ok(())
}
