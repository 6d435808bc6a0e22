//! Services built on top of the name parser, signatures and the project db.

pub mod correlate;
pub mod ingest;
pub mod matching;

pub use correlate::{
    BinaryProbe, Correlator, MatchBasis, MatchOutcome, SourceCandidate, UnmatchedReason,
};
pub use ingest::{
    attach_reference_signatures, ingest_bin, ingest_mir, ingest_mir_entries, ingest_program_dump,
    AttachSummary, IngestError, IngestOutcome,
};
pub use matching::{match_crate, MatchError, MatchRequest, MatchSummary};
