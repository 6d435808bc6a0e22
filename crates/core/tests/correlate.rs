use funcmatch_core::db::TieBreak;
use funcmatch_core::name::parse;
use funcmatch_core::services::{
    BinaryProbe, Correlator, MatchBasis, MatchOutcome, SourceCandidate, UnmatchedReason,
};
use funcmatch_core::signature::SignaturePattern;

fn sig(prefix: &str) -> SignaturePattern {
    format!("{prefix}{}", "-".repeat(64 - prefix.len())).parse().expect("signature")
}

fn candidate(id: i64, name: &str, signature: Option<&str>) -> SourceCandidate {
    let decl = parse(name).expect("source name");
    SourceCandidate {
        id,
        full_name: name.to_string(),
        key: decl.structural_key(Some("app")),
        signature: signature.map(sig),
    }
}

fn probe(name: &str, signature: Option<&str>) -> BinaryProbe {
    let decl = parse(name).expect("binary name");
    BinaryProbe { key: decl.structural_key(Some("app")), signature: signature.map(sig) }
}

#[test]
fn unique_structural_match_links_by_name() {
    let engine = Correlator::new(
        vec![candidate(1, "app::run", None), candidate(2, "app::stop", None)],
        TieBreak::default(),
    );
    let outcome = engine.resolve(&probe("app::run<u32>", Some("55")));
    assert_eq!(outcome, MatchOutcome::Linked { source: 1, basis: MatchBasis::Name });
}

#[test]
fn generic_source_is_found_among_unrelated_functions_of_its_crate() {
    let sources = ["foo::bar<T>", "foo::baz", "foo::Widget::new", "foo::qux::bar"];
    let candidates = sources
        .iter()
        .zip(1..)
        .map(|(name, id)| SourceCandidate {
            id,
            full_name: name.to_string(),
            key: parse(name).expect("source name").structural_key(Some("foo")),
            signature: None,
        })
        .collect();
    let engine = Correlator::new(candidates, TieBreak::default());

    let key = parse("foo::bar<u32>").expect("binary name").structural_key(Some("foo"));
    let outcome = engine.resolve(&BinaryProbe { key, signature: None });
    assert_eq!(outcome, MatchOutcome::Linked { source: 1, basis: MatchBasis::Name });
}

#[test]
fn crate_relative_source_names_still_match() {
    // Source names are crate-relative, binary names crate-qualified.
    let engine = Correlator::new(vec![candidate(8, "net::Conn::open", None)], TieBreak::default());
    assert_eq!(engine.candidates().len(), 1);

    let outcome = engine.resolve(&probe("app::net::Conn::open", None));
    assert_eq!(outcome.linked_source(), Some(8));
}

#[test]
fn several_structural_matches_without_signatures_are_ambiguous() {
    let engine = Correlator::new(
        vec![candidate(1, "app::run<T>", None), candidate(2, "app::run<U>", None)],
        TieBreak::LeaveUnmatched,
    );
    let outcome = engine.resolve(&probe("app::run", None));
    assert_eq!(outcome, MatchOutcome::Unmatched(UnmatchedReason::Ambiguous { candidates: 2 }));
}

#[test]
fn signature_separates_structural_duplicates() {
    let engine = Correlator::new(
        vec![
            candidate(1, "app::run<T>", Some("4889e5")),
            candidate(2, "app::run<U>", Some("55e8........")),
        ],
        TieBreak::LeaveUnmatched,
    );
    let outcome = engine.resolve(&probe("app::run", Some("55e812345678c3")));
    assert_eq!(outcome, MatchOutcome::Linked { source: 2, basis: MatchBasis::Signature });
}

#[test]
fn signature_fallback_when_no_name_matches() {
    let engine = Correlator::new(
        vec![
            candidate(1, "app::alpha", Some("4889e5")),
            candidate(2, "app::beta", Some("55c3")),
        ],
        TieBreak::LeaveUnmatched,
    );
    let outcome = engine.resolve(&probe("app::renamed", Some("55c3")));
    assert_eq!(outcome, MatchOutcome::Linked { source: 2, basis: MatchBasis::Signature });

    let none = engine.resolve(&probe("app::renamed", Some("90")));
    assert_eq!(none, MatchOutcome::Unmatched(UnmatchedReason::NoCandidate));

    let unsigned = engine.resolve(&probe("app::renamed", None));
    assert_eq!(unsigned, MatchOutcome::Unmatched(UnmatchedReason::NoCandidate));
}

#[test]
fn tie_policy_decides_equal_signature_scores() {
    let candidates = vec![
        candidate(5, "app::zeta", Some("55c3")),
        candidate(3, "app::alpha", Some("55c3")),
    ];
    let target = probe("app::other", Some("55c3"));

    let strict = Correlator::new(candidates.clone(), TieBreak::LeaveUnmatched);
    assert_eq!(
        strict.resolve(&target),
        MatchOutcome::Unmatched(UnmatchedReason::SignatureTie { candidates: 2 })
    );

    let lenient = Correlator::new(candidates, TieBreak::LexicographicallySmallest);
    assert_eq!(
        lenient.resolve(&target),
        MatchOutcome::Linked { source: 3, basis: MatchBasis::TieBreak }
    );
}

#[test]
fn lexicographic_tie_break_applies_to_ambiguous_names() {
    let engine = Correlator::new(
        vec![candidate(9, "app::run<u8>", None), candidate(4, "app::run<u16>", None)],
        TieBreak::LexicographicallySmallest,
    );
    let outcome = engine.resolve(&probe("app::run", None));
    assert_eq!(outcome, MatchOutcome::Linked { source: 4, basis: MatchBasis::TieBreak });
}
