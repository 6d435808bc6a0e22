//! Project persistence: on-disk layout, configuration, and the SQLite
//! database holding crates, binaries, function records, and match links.
//!
//! - `ProjectLayout`: computed paths for project directories/files.
//! - `ProjectConfig`: serializable project metadata and matching policy.
//! - `ProjectDb`: a small SQLite wrapper with versioned migrations.
//! - Record types (`SourceFunctionRecord`, `BinaryFunctionRecord`, ...)
//!   representing what lives in the database.

pub mod config;
pub mod context;
pub mod layout;
pub mod models;
pub mod project_db;
pub mod util;

pub use config::{DbConfig, MatchPolicy, ProjectConfig, TieBreak};
pub use context::ProjectContext;
pub use layout::ProjectLayout;
pub use models::{
    AnalysisStatus, BinaryFunctionRecord, BinaryRecord, CrateRecord, FunctionKind,
    FunctionRecord, MatchLink, MatchRunRecord, MatchRunStatus, ProjectStats,
    SourceFunctionRecord, Stored,
};
pub use project_db::{DbError, DbResult, ProjectDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_project_config, open_project_db, save_project_config};
