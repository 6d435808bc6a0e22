//! Linking binary functions to source functions.
//!
//! The engine is pure: it is handed parsed candidates and probes and returns
//! one [`MatchOutcome`] per probe. Persisting links is the matching pass's job.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::TieBreak;
use crate::name::StructuralKey;
use crate::signature::SignaturePattern;

/// A source function that binary functions may link to.
#[derive(Debug, Clone)]
pub struct SourceCandidate {
    /// Row id of the source record.
    pub id: i64,
    pub full_name: String,
    pub key: StructuralKey,
    pub signature: Option<SignaturePattern>,
}

/// The parts of a binary function the engine compares.
#[derive(Debug, Clone)]
pub struct BinaryProbe {
    pub key: StructuralKey,
    pub signature: Option<SignaturePattern>,
}

/// Why a link was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchBasis {
    /// Exactly one candidate had the same structural key.
    Name,
    /// Chosen by signature agreement, either as a fallback or to pick between
    /// several structural matches.
    Signature,
    /// Several candidates were equally good and the tie policy picked one.
    TieBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "reason")]
pub enum UnmatchedReason {
    /// No structural match and no signature agreement.
    NoCandidate,
    /// Several structural matches that signatures could not separate.
    Ambiguous { candidates: usize },
    /// No structural match; several candidates agree equally on signature.
    SignatureTie { candidates: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum MatchOutcome {
    Linked { source: i64, basis: MatchBasis },
    Unmatched(UnmatchedReason),
}

impl MatchOutcome {
    pub fn linked_source(&self) -> Option<i64> {
        match self {
            MatchOutcome::Linked { source, .. } => Some(*source),
            MatchOutcome::Unmatched(_) => None,
        }
    }
}

/// Result of scoring a pool of candidates by signature.
enum SignaturePick {
    None,
    Unique(usize),
    Tied(Vec<usize>),
}

/// Candidate index for one crate version.
#[derive(Debug, Clone)]
pub struct Correlator {
    candidates: Vec<SourceCandidate>,
    by_key: HashMap<StructuralKey, Vec<usize>>,
    tie_break: TieBreak,
}

impl Correlator {
    pub fn new(candidates: Vec<SourceCandidate>, tie_break: TieBreak) -> Self {
        let mut by_key: HashMap<StructuralKey, Vec<usize>> = HashMap::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            by_key.entry(candidate.key.clone()).or_default().push(idx);
        }
        Self { candidates, by_key, tie_break }
    }

    pub fn candidates(&self) -> &[SourceCandidate] {
        &self.candidates
    }

    /// Decide which source function, if any, `probe` corresponds to.
    pub fn resolve(&self, probe: &BinaryProbe) -> MatchOutcome {
        let structural = self.by_key.get(&probe.key).map(Vec::as_slice).unwrap_or(&[]);
        match structural {
            [only] => MatchOutcome::Linked {
                source: self.candidates[*only].id,
                basis: MatchBasis::Name,
            },
            [] => {
                let pool: Vec<usize> = (0..self.candidates.len()).collect();
                match self.pick_by_signature(probe, &pool) {
                    SignaturePick::None => MatchOutcome::Unmatched(UnmatchedReason::NoCandidate),
                    SignaturePick::Unique(idx) => MatchOutcome::Linked {
                        source: self.candidates[idx].id,
                        basis: MatchBasis::Signature,
                    },
                    SignaturePick::Tied(tied) => self.break_tie(
                        &tied,
                        UnmatchedReason::SignatureTie { candidates: tied.len() },
                    ),
                }
            }
            many => match self.pick_by_signature(probe, many) {
                SignaturePick::Unique(idx) => MatchOutcome::Linked {
                    source: self.candidates[idx].id,
                    basis: MatchBasis::Signature,
                },
                SignaturePick::Tied(tied) => self
                    .break_tie(&tied, UnmatchedReason::Ambiguous { candidates: many.len() }),
                SignaturePick::None => {
                    self.break_tie(many, UnmatchedReason::Ambiguous { candidates: many.len() })
                }
            },
        }
    }

    /// Highest positive agreement score among `pool`.
    fn pick_by_signature(&self, probe: &BinaryProbe, pool: &[usize]) -> SignaturePick {
        let Some(probe_sig) = &probe.signature else {
            return SignaturePick::None;
        };
        let mut best_score = 0;
        let mut best: Vec<usize> = Vec::new();
        for &idx in pool {
            let Some(candidate_sig) = &self.candidates[idx].signature else {
                continue;
            };
            let Some(score) = probe_sig.agreement(candidate_sig) else {
                continue;
            };
            if score == 0 || score < best_score {
                continue;
            }
            if score > best_score {
                best_score = score;
                best.clear();
            }
            best.push(idx);
        }
        match best.as_slice() {
            [] => SignaturePick::None,
            [only] => SignaturePick::Unique(*only),
            _ => SignaturePick::Tied(best),
        }
    }

    fn break_tie(&self, tied: &[usize], reason: UnmatchedReason) -> MatchOutcome {
        match self.tie_break {
            TieBreak::LeaveUnmatched => MatchOutcome::Unmatched(reason),
            TieBreak::LexicographicallySmallest => tied
                .iter()
                .map(|&idx| &self.candidates[idx])
                .min_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)))
                .map(|c| MatchOutcome::Linked { source: c.id, basis: MatchBasis::TieBreak })
                .unwrap_or(MatchOutcome::Unmatched(reason)),
        }
    }
}
