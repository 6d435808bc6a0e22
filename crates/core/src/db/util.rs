use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::db::{ProjectConfig, ProjectDb, ProjectLayout};

/// Load the project config JSON from disk for a given layout.
pub fn load_project_config(layout: &ProjectLayout) -> Result<ProjectConfig> {
    let config_json = std::fs::read_to_string(&layout.project_config_path).with_context(|| {
        format!("Failed to read project config at {}", layout.project_config_path.display())
    })?;
    let config: ProjectConfig =
        serde_json::from_str(&config_json).context("Failed to parse project config JSON")?;
    Ok(config)
}

/// Write the project config JSON for a given layout, creating the meta dir.
pub fn save_project_config(layout: &ProjectLayout, config: &ProjectConfig) -> Result<()> {
    std::fs::create_dir_all(&layout.meta_dir)
        .with_context(|| format!("Failed to create meta dir: {}", layout.meta_dir.display()))?;
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&layout.project_config_path, json).with_context(|| {
        format!("Failed to write project config: {}", layout.project_config_path.display())
    })?;
    Ok(())
}

/// Resolve the DB path (respecting relative/absolute config) and open a ProjectDb.
pub fn open_project_db(layout: &ProjectLayout) -> Result<(ProjectConfig, PathBuf, ProjectDb)> {
    let config = load_project_config(layout)?;
    let config_db_path = std::path::Path::new(&config.db.path);
    let db_path = if config_db_path.is_absolute() {
        config_db_path.to_path_buf()
    } else {
        layout.root.join(config_db_path)
    };
    let db = ProjectDb::open(&db_path)
        .with_context(|| format!("Failed to open project database at {}", db_path.display()))?;
    Ok((config, db_path, db))
}
