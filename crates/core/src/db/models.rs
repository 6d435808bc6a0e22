use serde::{Deserialize, Serialize};

/// A crate version known to the project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrateRecord {
    pub id: i64,
    pub name: String,
    pub version: String,
}

/// A binary whose dump has been ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryRecord {
    pub id: i64,
    /// Binary identity, usually the dump's file stem.
    pub name: String,
    /// SHA-256 of the dump file, when known.
    pub hash: Option<String>,
}

/// Shape of a function, with the fields that only make sense for that shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionKind {
    /// Free function; `module_path` excludes the function name.
    Normal { module_path: String },
    /// Inherent method of `impl_type`.
    Method { impl_type: String },
    /// Method of an `impl_trait for impl_type` block.
    TraitImpl { impl_type: String, impl_trait: String },
    /// Closure body; `parent` is the enclosing item's path.
    Closure { parent: String },
}

/// Storage columns of a [`FunctionKind`]: `(code, path, impl_type, impl_trait)`.
pub type KindColumns = (i32, Option<String>, Option<String>, Option<String>);

impl FunctionKind {
    pub fn to_columns(&self) -> KindColumns {
        match self {
            FunctionKind::Normal { module_path } => (0, Some(module_path.clone()), None, None),
            FunctionKind::Method { impl_type } => (1, None, Some(impl_type.clone()), None),
            FunctionKind::TraitImpl { impl_type, impl_trait } => {
                (2, None, Some(impl_type.clone()), Some(impl_trait.clone()))
            }
            FunctionKind::Closure { parent } => (3, Some(parent.clone()), None, None),
        }
    }

    /// Decode from storage columns; `None` for an unknown code.
    pub fn from_columns(
        code: i32,
        path: Option<String>,
        impl_type: Option<String>,
        impl_trait: Option<String>,
    ) -> Option<Self> {
        let kind = match code {
            0 => FunctionKind::Normal { module_path: path.unwrap_or_default() },
            1 => FunctionKind::Method { impl_type: impl_type.unwrap_or_default() },
            2 => FunctionKind::TraitImpl {
                impl_type: impl_type.unwrap_or_default(),
                impl_trait: impl_trait.unwrap_or_default(),
            },
            3 => FunctionKind::Closure { parent: path.unwrap_or_default() },
            _ => return None,
        };
        Some(kind)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FunctionKind::Normal { .. } => "normal",
            FunctionKind::Method { .. } => "method",
            FunctionKind::TraitImpl { .. } => "trait-impl",
            FunctionKind::Closure { .. } => "closure",
        }
    }
}

/// Outcome of analysing a function during ingestion.
///
/// Everything other than `Ok` is filtered out before matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisStatus {
    Ok,
    /// The dump entry is not in the expected shape (e.g. malformed signature).
    UnknownFormat,
    /// The extractor could not decode the function body.
    BadBinary,
    /// The function belongs to a crate outside the configured wanted set.
    UnwantedCrate,
}

impl AnalysisStatus {
    /// Encode as an integer for storage in SQLite.
    pub fn to_i32(self) -> i32 {
        match self {
            AnalysisStatus::Ok => 0,
            AnalysisStatus::UnknownFormat => 1,
            AnalysisStatus::BadBinary => 2,
            AnalysisStatus::UnwantedCrate => 3,
        }
    }

    /// Decode from an integer stored in SQLite.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(AnalysisStatus::Ok),
            1 => Some(AnalysisStatus::UnknownFormat),
            2 => Some(AnalysisStatus::BadBinary),
            3 => Some(AnalysisStatus::UnwantedCrate),
            _ => None,
        }
    }
}

/// Fields shared by source-side and binary-side function records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionRecord {
    #[serde(rename = "crate")]
    pub crate_name: String,
    /// Last path token, without generics.
    pub name: String,
    /// Full demangled name.
    pub full_name: String,
    pub kind: FunctionKind,
    pub status: AnalysisStatus,
}

/// A function as known from a crate's MIR dump.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFunctionRecord {
    #[serde(flatten)]
    pub function: FunctionRecord,
    pub version: String,
    /// Signature taken from a reference build, when one was attached.
    pub signature: Option<String>,
    /// Whether at least one binary function links here.
    pub matched: bool,
}

/// A function as observed in a binary dump.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryFunctionRecord {
    #[serde(flatten)]
    pub function: FunctionRecord,
    pub binary: String,
    pub address: u64,
    pub signature: String,
    /// Row id of the linked source function.
    pub matched_source: Option<i64>,
}

/// A record together with its row id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stored<T> {
    pub id: i64,
    #[serde(flatten)]
    pub record: T,
}

/// One persisted binary → source link, joined for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchLink {
    pub binary: String,
    pub address: u64,
    pub binary_name: String,
    #[serde(rename = "crate")]
    pub crate_name: String,
    pub version: String,
    pub source_name: String,
}

/// Final state of a matching pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MatchRunStatus {
    Committed,
    RolledBack,
}

impl MatchRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRunStatus::Committed => "committed",
            MatchRunStatus::RolledBack => "rolled-back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "committed" => Some(MatchRunStatus::Committed),
            "rolled-back" => Some(MatchRunStatus::RolledBack),
            _ => None,
        }
    }
}

/// Bookkeeping for one matching pass over a crate version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRunRecord {
    #[serde(rename = "crate")]
    pub crate_name: String,
    pub version: String,
    pub linked_by_name: usize,
    pub linked_by_signature: usize,
    pub unmatched: usize,
    pub failures: usize,
    pub status: MatchRunStatus,
    pub started_at: String,
    pub finished_at: String,
}

/// Row counts across the project database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectStats {
    pub crates: usize,
    pub binaries: usize,
    pub source_functions: usize,
    pub binary_functions: usize,
    pub linked_binary_functions: usize,
    pub matched_source_functions: usize,
}
