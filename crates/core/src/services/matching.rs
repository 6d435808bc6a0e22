//! The matching pass: correlate one crate version's unmatched binary
//! functions against its source functions and persist the links.
//!
//! A pass runs in a single immediate transaction. It is committed when it
//! completes and rolled back when too many binary names fail to parse, so a
//! grammar regression cannot leave a half-linked crate behind. Failures are
//! counted over the crate's unlinked `ok` functions plus its `unknown-format`
//! functions whose names never parsed.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{AnalysisStatus, DbError, MatchPolicy, MatchRunRecord, MatchRunStatus, ProjectDb};
use crate::name;
use crate::services::correlate::{
    BinaryProbe, Correlator, MatchBasis, MatchOutcome, SourceCandidate,
};
use crate::services::ingest::structural_key_of;
use crate::signature::SignaturePattern;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("crate {name} {version} has not been ingested")]
    UnknownCrate { name: String, version: String },

    #[error(
        "{failures} of {considered} binary functions failed to parse (limit {max_ratio}); pass rolled back"
    )]
    TooManyFailures { failures: usize, considered: usize, max_ratio: f64 },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Which binary functions to match and against which source functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRequest {
    /// Crate whose binary functions are matched.
    pub crate_name: String,
    /// Source version to match against.
    pub version: String,
    /// Further `(crate, version)` pairs whose source functions are candidates too.
    pub extra_candidates: Vec<(String, String)>,
}

impl MatchRequest {
    pub fn new(crate_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            crate_name: crate_name.into(),
            version: version.into(),
            extra_candidates: Vec::new(),
        }
    }
}

/// Counters of a committed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    #[serde(rename = "crate")]
    pub crate_name: String,
    pub version: String,
    pub considered: usize,
    pub linked_by_name: usize,
    pub linked_by_signature: usize,
    pub unmatched: usize,
    pub failures: usize,
}

/// Run one matching pass and persist its links and bookkeeping row.
pub fn match_crate(
    db: &ProjectDb,
    request: &MatchRequest,
    policy: &MatchPolicy,
) -> Result<MatchSummary, MatchError> {
    let started_at = chrono::Utc::now().to_rfc3339();
    let mut summary = MatchSummary {
        crate_name: request.crate_name.clone(),
        version: request.version.clone(),
        ..MatchSummary::default()
    };

    let tx = db.begin_immediate()?;
    if db.find_crate(&request.crate_name, &request.version)?.is_none() {
        return Err(MatchError::UnknownCrate {
            name: request.crate_name.clone(),
            version: request.version.clone(),
        });
    }

    let correlator = load_candidates(db, request, policy)?;
    debug!(
        krate = %request.crate_name,
        version = %request.version,
        candidates = correlator.candidates().len(),
        "loaded source candidates"
    );

    for binary in db.unmatched_binary_functions(&request.crate_name)? {
        summary.considered += 1;
        let function = &binary.record.function;
        let decl = match name::parse(&function.full_name) {
            Ok(decl) => decl,
            Err(err) => {
                warn!(symbol = %function.full_name, fragment = %err.fragment, "{err}");
                summary.failures += 1;
                continue;
            }
        };
        let probe = BinaryProbe {
            key: decl.structural_key(Some(&request.crate_name)),
            signature: binary.record.signature.parse::<SignaturePattern>().ok(),
        };
        match correlator.resolve(&probe) {
            MatchOutcome::Linked { source, basis } => {
                db.set_match(binary.id, source)?;
                match basis {
                    MatchBasis::Name => summary.linked_by_name += 1,
                    MatchBasis::Signature | MatchBasis::TieBreak => {
                        summary.linked_by_signature += 1
                    }
                }
            }
            MatchOutcome::Unmatched(reason) => {
                debug!(symbol = %function.full_name, ?reason, "left unmatched");
                summary.unmatched += 1;
            }
        }
    }

    // Names that already failed to parse at ingestion count against the pass.
    let unparsed = db.crate_binary_functions(&request.crate_name, AnalysisStatus::UnknownFormat)?;
    for binary in unparsed {
        let function = &binary.record.function;
        if let Err(err) = name::parse(&function.full_name) {
            debug!(symbol = %function.full_name, fragment = %err.fragment, "unparsed name");
            summary.considered += 1;
            summary.failures += 1;
        }
    }

    if exceeds(summary.failures, summary.considered, policy.max_failure_ratio) {
        drop(tx);
        warn!(
            krate = %request.crate_name,
            version = %request.version,
            failures = summary.failures,
            considered = summary.considered,
            "too many parse failures, rolling back"
        );
        db.insert_match_run(&run_record(&summary, MatchRunStatus::RolledBack, started_at))?;
        return Err(MatchError::TooManyFailures {
            failures: summary.failures,
            considered: summary.considered,
            max_ratio: policy.max_failure_ratio,
        });
    }

    db.insert_match_run(&run_record(&summary, MatchRunStatus::Committed, started_at))?;
    tx.commit().map_err(DbError::from)?;
    info!(
        krate = %summary.crate_name,
        version = %summary.version,
        by_name = summary.linked_by_name,
        by_signature = summary.linked_by_signature,
        unmatched = summary.unmatched,
        failures = summary.failures,
        "matching pass committed"
    );
    Ok(summary)
}

fn load_candidates(
    db: &ProjectDb,
    request: &MatchRequest,
    policy: &MatchPolicy,
) -> Result<Correlator, MatchError> {
    let units = std::iter::once((&request.crate_name, &request.version))
        .chain(request.extra_candidates.iter().map(|(c, v)| (c, v)));

    let mut candidates = Vec::new();
    for (crate_name, version) in units {
        for source in db.source_functions(crate_name, version)? {
            let function = &source.record.function;
            let key = match structural_key_of(&function.full_name, crate_name) {
                Ok(key) => key,
                Err(err) => {
                    warn!(symbol = %function.full_name, "{err}");
                    continue;
                }
            };
            let signature =
                source.record.signature.as_deref().and_then(|s| s.parse::<SignaturePattern>().ok());
            candidates.push(SourceCandidate {
                id: source.id,
                full_name: function.full_name.clone(),
                key,
                signature,
            });
        }
    }
    Ok(Correlator::new(candidates, policy.tie_break))
}

fn exceeds(failures: usize, considered: usize, max_ratio: f64) -> bool {
    considered > 0 && failures as f64 / considered as f64 > max_ratio
}

fn run_record(
    summary: &MatchSummary,
    status: MatchRunStatus,
    started_at: String,
) -> MatchRunRecord {
    MatchRunRecord {
        crate_name: summary.crate_name.clone(),
        version: summary.version.clone(),
        linked_by_name: summary.linked_by_name,
        linked_by_signature: summary.linked_by_signature,
        unmatched: summary.unmatched,
        failures: summary.failures,
        status,
        started_at,
        finished_at: chrono::Utc::now().to_rfc3339(),
    }
}
