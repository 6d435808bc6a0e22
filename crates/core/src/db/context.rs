use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::db::{open_project_db, ProjectConfig, ProjectDb, ProjectLayout};
use crate::services::ingest::{ingest_bin, IngestOutcome};
use crate::services::matching::{match_crate, MatchRequest, MatchSummary};

/// An opened funcmatch project: layout, config and database.
///
/// Operations that depend on project settings (the wanted crates for binary
/// ingestion, the match policy for a pass) go through here so callers cannot
/// pass a config that disagrees with the database.
#[derive(Debug)]
pub struct ProjectContext {
    pub layout: ProjectLayout,
    pub config: ProjectConfig,
    pub db_path: PathBuf,
    pub db: ProjectDb,
}

impl ProjectContext {
    /// Load `.funcmatch/project.json` under `root` and open its database.
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let layout = ProjectLayout::new(root);
        let (config, db_path, db) = open_project_db(&layout)?;
        Ok(Self { layout, config, db_path, db })
    }

    /// Ingest one binary dump, filtering crates by `wanted_crates`.
    pub fn ingest_binary_dump(&self, path: &Path, force: bool) -> Result<IngestOutcome> {
        ingest_bin(&self.db, &self.config, path, force)
            .with_context(|| format!("Failed to ingest binary dump {}", path.display()))
    }

    /// Run a matching pass under the project's match policy.
    pub fn match_crate(&self, request: &MatchRequest) -> Result<MatchSummary> {
        match_crate(&self.db, request, &self.config.matching).with_context(|| {
            format!("Matching pass for {} {} failed", request.crate_name, request.version)
        })
    }
}
