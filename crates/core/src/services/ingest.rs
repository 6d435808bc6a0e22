//! Loading MIR dumps and binary dumps into the project database.
//!
//! One unit (a crate version or a binary) is ingested per immediate
//! transaction. Re-ingesting a unit that already exists is a no-op unless
//! `force` is set, in which case its rows are deleted and recreated in the
//! same transaction.

use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{
    AnalysisStatus, BinaryFunctionRecord, DbError, FunctionKind, FunctionRecord, ProjectConfig,
    ProjectDb, SourceFunctionRecord,
};
use crate::demangle::demangle;
use crate::name::{self, Declaration, StructuralKey, TokenKind};
use crate::program::{FunctionDump, ProgramDump};
use crate::signature::SignaturePattern;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dump {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// MIR dump files must be named `<crate>_<version>.json`.
    #[error("cannot derive crate and version from file name {0}")]
    FileName(PathBuf),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// What happened to one ingested unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum IngestOutcome {
    Ingested { functions: usize, skipped: usize },
    /// The unit was already in the database and `force` was not set.
    AlreadyPresent,
}

/// Result of attaching reference signatures to a crate version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttachSummary {
    pub attached: usize,
    /// Dump functions of the crate with no single source counterpart.
    pub unresolved: usize,
}

/// Split a MIR dump file name `<crate>_<version>.json` at its last `_`.
pub fn parse_mir_file_name(path: &Path) -> Result<(String, String), IngestError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IngestError::FileName(path.to_path_buf()))?;
    match stem.rsplit_once('_') {
        Some((krate, version)) if !krate.is_empty() && !version.is_empty() => {
            Ok((krate.to_string(), version.to_string()))
        }
        _ => Err(IngestError::FileName(path.to_path_buf())),
    }
}

/// Function path embedded in a MIR label: the text between the first `{` and
/// the closing `}` that ends the label.
///
/// Labels without braces are not functions.
pub fn mir_function_path(label: &str) -> Option<&str> {
    let open = label.find('{')?;
    let inner = label[open + 1..].strip_suffix('}')?;
    let inner = inner.trim();
    (!inner.is_empty()).then_some(inner)
}

/// Derive a function's kind from its parsed name.
pub fn classify(decl: &Declaration) -> FunctionKind {
    let names: Vec<String> = decl.tokens.iter().map(|t| t.name()).collect();

    if let Some(pos) = decl.tokens.iter().position(|t| t.is_closure()) {
        return FunctionKind::Closure { parent: names[..pos].join("::") };
    }
    if let Some(tc) = &decl.trait_clause {
        return FunctionKind::TraitImpl {
            impl_type: tc.implementing_type.path.plain(),
            impl_trait: tc.implemented_trait.plain(),
        };
    }
    for token in decl.tokens.iter().rev() {
        match &token.kind {
            TokenKind::TraitImpl(tc) => {
                return FunctionKind::TraitImpl {
                    impl_type: tc.implementing_type.path.plain(),
                    impl_trait: tc.implemented_trait.plain(),
                }
            }
            TokenKind::InherentImpl(class) => {
                return FunctionKind::Method { impl_type: class.path.plain() }
            }
            _ => {}
        }
    }

    let parent = &names[..names.len().saturating_sub(1)];
    let owner_is_type = parent
        .last()
        .and_then(|n| n.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase());
    if owner_is_type {
        FunctionKind::Method { impl_type: parent.join("::") }
    } else {
        FunctionKind::Normal { module_path: parent.join("::") }
    }
}

/// Structural key of a stored full name, relative to `crate_name`.
pub fn structural_key_of(
    full_name: &str,
    crate_name: &str,
) -> Result<StructuralKey, name::ParseError> {
    Ok(name::parse(full_name)?.structural_key(Some(crate_name)))
}

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let text = fs::read_to_string(path)
        .map_err(|source| IngestError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text)
        .map_err(|source| IngestError::Json { path: path.to_path_buf(), source })
}

/// Load a binary dump file without ingesting it.
pub fn read_program_dump(path: &Path) -> Result<ProgramDump, IngestError> {
    read_json(path)
}

/// Ingest a MIR dump file named `<crate>_<version>.json`.
pub fn ingest_mir(db: &ProjectDb, path: &Path, force: bool) -> Result<IngestOutcome, IngestError> {
    let (crate_name, version) = parse_mir_file_name(path)?;
    let entries: Vec<Vec<Value>> = read_json(path)?;
    ingest_mir_entries(db, &crate_name, &version, &entries, force)
}

/// Ingest already-loaded MIR dump entries `[label, blocks, signature?]`.
pub fn ingest_mir_entries(
    db: &ProjectDb,
    crate_name: &str,
    version: &str,
    entries: &[Vec<Value>],
    force: bool,
) -> Result<IngestOutcome, IngestError> {
    let tx = db.begin_immediate()?;
    let (krate, created) = db.get_or_create_crate(crate_name, version)?;
    if !created {
        if !force {
            debug!(krate = crate_name, version, "crate version already ingested");
            return Ok(IngestOutcome::AlreadyPresent);
        }
        let removed = db.delete_source_functions(krate.id)?;
        debug!(krate = crate_name, version, removed, "re-ingesting crate version");
    }

    let mut functions = 0;
    let mut skipped = 0;
    for entry in entries {
        let Some(label) = entry.first().and_then(Value::as_str) else {
            warn!(krate = crate_name, "MIR entry without a label");
            skipped += 1;
            continue;
        };
        let Some(path) = mir_function_path(label) else {
            debug!(label, "MIR item is not a function");
            skipped += 1;
            continue;
        };
        let decl = match name::parse(path) {
            Ok(decl) => decl,
            Err(err) => {
                warn!(krate = crate_name, symbol = path, fragment = %err.fragment, "{err}");
                skipped += 1;
                continue;
            }
        };
        let signature = entry.get(2).and_then(Value::as_str).and_then(|sig| {
            match sig.parse::<SignaturePattern>() {
                Ok(_) => Some(sig.to_string()),
                Err(err) => {
                    warn!(symbol = path, "ignoring reference signature: {err}");
                    None
                }
            }
        });

        let record = SourceFunctionRecord {
            function: FunctionRecord {
                crate_name: crate_name.to_string(),
                name: decl.symbol_name(),
                full_name: path.to_string(),
                kind: classify(&decl),
                status: AnalysisStatus::Ok,
            },
            version: version.to_string(),
            signature,
            matched: false,
        };
        db.insert_source_function(krate.id, &record)?;
        functions += 1;
    }

    tx.commit().map_err(DbError::from)?;
    info!(krate = crate_name, version, functions, skipped, "ingested MIR dump");
    Ok(IngestOutcome::Ingested { functions, skipped })
}

/// Ingest a binary dump file; the binary is named after the file stem.
pub fn ingest_bin(
    db: &ProjectDb,
    config: &ProjectConfig,
    path: &Path,
    force: bool,
) -> Result<IngestOutcome, IngestError> {
    let binary = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IngestError::FileName(path.to_path_buf()))?
        .to_string();
    let hash =
        sha256_file(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })?;
    let dump = read_program_dump(path)?;
    ingest_program_dump(db, config, &binary, Some(&hash), &dump, force)
}

/// Ingest an already-loaded binary dump under the name `binary`.
pub fn ingest_program_dump(
    db: &ProjectDb,
    config: &ProjectConfig,
    binary: &str,
    hash: Option<&str>,
    dump: &ProgramDump,
    force: bool,
) -> Result<IngestOutcome, IngestError> {
    let tx = db.begin_immediate()?;
    let (record, created) = db.get_or_create_binary(binary, hash)?;
    if !created {
        if !force {
            debug!(binary, "binary already ingested");
            return Ok(IngestOutcome::AlreadyPresent);
        }
        let removed = db.delete_binary_functions(record.id)?;
        db.set_binary_hash(record.id, hash)?;
        debug!(binary, removed, "re-ingesting binary");
    }

    let mut functions = 0;
    let mut skipped = 0;
    for (key, entry) in dump {
        match binary_function(config, binary, key, entry) {
            Some(function) => {
                db.insert_binary_function(record.id, &function)?;
                functions += 1;
            }
            None => skipped += 1,
        }
    }

    tx.commit().map_err(DbError::from)?;
    info!(binary, functions, skipped, "ingested binary dump");
    Ok(IngestOutcome::Ingested { functions, skipped })
}

/// Build the record for one dump entry, or `None` when it is skipped.
fn binary_function(
    config: &ProjectConfig,
    binary: &str,
    key: &str,
    entry: &FunctionDump,
) -> Option<BinaryFunctionRecord> {
    if !entry.is_rust_func {
        debug!(label = %entry.func_name, "not a Rust function");
        return None;
    }
    let Ok(address) = u64::from_str_radix(key.trim_start_matches("0x"), 16) else {
        warn!(binary, key, "dump key is not a hex address");
        return None;
    };
    let demangled = match demangle(&entry.func_name) {
        Ok(demangled) => demangled,
        Err(err) => {
            warn!(binary, address, "{err}");
            return None;
        }
    };
    let decl = match name::parse(&demangled) {
        Ok(decl) => decl,
        Err(err) => {
            warn!(binary, address, symbol = %demangled, fragment = %err.fragment, "{err}");
            return unparsed_function(config, binary, address, demangled, entry);
        }
    };

    let crate_name = decl.crate_name();
    let status = if crate_name.is_none() || entry.sig.parse::<SignaturePattern>().is_err() {
        AnalysisStatus::UnknownFormat
    } else if entry.bbs.is_empty() {
        AnalysisStatus::BadBinary
    } else if !crate_name.as_deref().is_some_and(|c| config.wants_crate(c)) {
        AnalysisStatus::UnwantedCrate
    } else {
        AnalysisStatus::Ok
    };

    Some(BinaryFunctionRecord {
        function: FunctionRecord {
            crate_name: crate_name.unwrap_or_default(),
            name: decl.symbol_name(),
            full_name: demangled,
            kind: classify(&decl),
            status,
        },
        binary: binary.to_string(),
        address,
        signature: entry.sig.clone(),
        matched_source: None,
    })
}

/// Record for a Rust function whose demangled name does not parse.
///
/// It is kept as `unknown-format` under the crate named by its leading path
/// segment, so the matching pass of that crate can count it as a failure.
/// Names without a recognizable leading segment are skipped.
fn unparsed_function(
    config: &ProjectConfig,
    binary: &str,
    address: u64,
    demangled: String,
    entry: &FunctionDump,
) -> Option<BinaryFunctionRecord> {
    let crate_name = leading_crate(&demangled)?;
    let status = if config.wants_crate(crate_name) {
        AnalysisStatus::UnknownFormat
    } else {
        AnalysisStatus::UnwantedCrate
    };
    let (module_path, name) = demangled.rsplit_once("::").unwrap_or(("", demangled.as_str()));
    Some(BinaryFunctionRecord {
        function: FunctionRecord {
            crate_name: crate_name.to_string(),
            name: name.to_string(),
            full_name: demangled.clone(),
            kind: FunctionKind::Normal { module_path: module_path.to_string() },
            status,
        },
        binary: binary.to_string(),
        address,
        signature: entry.sig.clone(),
        matched_source: None,
    })
}

/// First `::` segment of a demangled name, ignoring a leading `<` or `&`.
pub fn leading_crate(demangled: &str) -> Option<&str> {
    let rest = demangled.trim_start_matches(['<', '&']);
    let (head, _) = rest.split_once("::")?;
    let valid = head.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(head)
}

/// Attach signatures from a dump of a reference build to the source
/// functions of one crate version.
///
/// A dump function is attached when its structural key identifies exactly one
/// source function; later monomorphized copies of an already-attached
/// function are ignored.
pub fn attach_reference_signatures(
    db: &ProjectDb,
    crate_name: &str,
    version: &str,
    dump: &ProgramDump,
) -> Result<AttachSummary, IngestError> {
    let tx = db.begin_immediate()?;

    let mut by_key: std::collections::HashMap<StructuralKey, Vec<i64>> = Default::default();
    for source in db.source_functions(crate_name, version)? {
        match structural_key_of(&source.record.function.full_name, crate_name) {
            Ok(key) => by_key.entry(key).or_default().push(source.id),
            Err(err) => warn!(symbol = %source.record.function.full_name, "{err}"),
        }
    }

    let mut summary = AttachSummary::default();
    let mut attached = std::collections::HashSet::new();
    for entry in dump.values() {
        if !entry.is_rust_func || entry.sig.parse::<SignaturePattern>().is_err() {
            continue;
        }
        let Ok(demangled) = demangle(&entry.func_name) else {
            continue;
        };
        let Ok(decl) = name::parse(&demangled) else {
            continue;
        };
        if decl.crate_name().as_deref() != Some(crate_name) {
            continue;
        }
        match by_key.get(&decl.structural_key(Some(crate_name))).map(Vec::as_slice) {
            Some([source_id]) => {
                if attached.insert(*source_id) {
                    db.set_source_signature(*source_id, &entry.sig)?;
                    summary.attached += 1;
                }
            }
            _ => summary.unresolved += 1,
        }
    }

    tx.commit().map_err(DbError::from)?;
    info!(
        krate = crate_name,
        version,
        attached = summary.attached,
        unresolved = summary.unresolved,
        "attached reference signatures"
    );
    Ok(summary)
}
