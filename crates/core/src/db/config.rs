use serde::{Deserialize, Serialize};

/// Database location for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the project database file (typically relative to project root).
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// What to do when several source functions fit a binary function equally well.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Leave the binary function unmatched.
    #[default]
    LeaveUnmatched,
    /// Pick the candidate whose full name sorts first.
    LexicographicallySmallest,
}

/// Tunables of the matching pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchPolicy {
    /// A pass is rolled back when more than this fraction of the binary
    /// functions it considers fail to parse.
    #[serde(default = "default_max_failure_ratio")]
    pub max_failure_ratio: f64,
    #[serde(default)]
    pub tie_break: TieBreak,
}

fn default_max_failure_ratio() -> f64 {
    0.25
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { max_failure_ratio: default_max_failure_ratio(), tie_break: TieBreak::default() }
    }
}

/// Serializable configuration describing a funcmatch project.
///
/// This lives at `.funcmatch/project.json` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Human-friendly project name.
    pub name: String,
    /// Optional description / notes.
    pub description: Option<String>,
    /// Schema/config version. This is about the config format, not crate versions.
    pub config_version: String,
    /// Database configuration (path is typically relative to project root).
    pub db: DbConfig,
    /// Crates whose binary functions are kept for matching. Empty keeps all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wanted_crates: Vec<String>,
    #[serde(default)]
    pub matching: MatchPolicy,
}

impl ProjectConfig {
    /// Create a new project configuration using the given name and db path.
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            wanted_crates: Vec::new(),
            matching: MatchPolicy::default(),
        }
    }

    /// Whether functions of `crate_name` should be matched.
    pub fn wants_crate(&self, crate_name: &str) -> bool {
        self.wanted_crates.is_empty() || self.wanted_crates.iter().any(|c| c == crate_name)
    }
}
