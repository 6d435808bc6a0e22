use funcmatch_core::db::{
    AnalysisStatus, BinaryFunctionRecord, FunctionKind, FunctionRecord, MatchPolicy,
    MatchRunStatus, ProjectConfig, ProjectDb, TieBreak,
};
use funcmatch_core::program::{FunctionDump, ProgramDump};
use funcmatch_core::services::{
    ingest_mir_entries, ingest_program_dump, match_crate, IngestOutcome, MatchError,
    MatchRequest,
};
use serde_json::{json, Value};

fn sig(prefix: &str) -> String {
    format!("{prefix}{}", "-".repeat(64 - prefix.len()))
}

/// Legacy mangling of a plain `a::b::c` path.
fn mangled(path: &str) -> String {
    let body: String = path.split("::").map(|s| format!("{}{s}", s.len())).collect();
    format!("_ZN{body}17h0123456789abcdefE")
}

fn mir(entries: Value) -> Vec<Vec<Value>> {
    serde_json::from_value(entries).expect("mir entries")
}

fn dump(functions: &[(&str, &str)]) -> ProgramDump {
    functions
        .iter()
        .enumerate()
        .map(|(i, (path, prefix))| {
            let mut bbs = std::collections::BTreeMap::new();
            bbs.insert(0, vec!["ret".to_string()]);
            let entry = FunctionDump {
                func_name: mangled(path),
                is_rust_func: true,
                edges: Vec::new(),
                bbs,
                sig: sig(prefix),
            };
            (format!("{:08x}", 0x1000 + i * 0x10), entry)
        })
        .collect()
}

fn seeded_db() -> ProjectDb {
    let db = ProjectDb::open_in_memory().expect("db");
    let sources = mir(json!([
        ["fn {app::run}", []],
        ["fn {app::Conn::open}", []],
        ["fn {app::alpha}", [], sig("4889e5")]
    ]));
    ingest_mir_entries(&db, "app", "1.0.0", &sources, false).expect("ingest mir");

    let config = ProjectConfig::new("test", ".funcmatch/project.db");
    let binary = dump(&[
        ("app::run", "55"),
        ("app::Conn::open", "55"),
        ("app::renamed", "4889e5c3"),
        ("app::unknown", "90"),
    ]);
    ingest_program_dump(&db, &config, "server", None, &binary, false).expect("ingest bin");
    db
}

#[test]
fn pass_links_by_name_and_signature_and_records_a_run() {
    let db = seeded_db();
    let summary = match_crate(&db, &MatchRequest::new("app", "1.0.0"), &MatchPolicy::default())
        .expect("match");

    assert_eq!(summary.considered, 4);
    assert_eq!(summary.linked_by_name, 2);
    assert_eq!(summary.linked_by_signature, 1);
    assert_eq!(summary.unmatched, 1);
    assert_eq!(summary.failures, 0);

    let links = db.list_matches(Some("app")).expect("links");
    let pairs: Vec<(&str, &str)> =
        links.iter().map(|l| (l.binary_name.as_str(), l.source_name.as_str())).collect();
    assert_eq!(
        pairs,
        vec![
            ("app::run", "app::run"),
            ("app::Conn::open", "app::Conn::open"),
            ("app::renamed", "app::alpha"),
        ]
    );

    let runs = db.list_match_runs().expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, MatchRunStatus::Committed);
    assert_eq!(runs[0].linked_by_name, 2);

    // Linked functions are not reconsidered.
    let second = match_crate(&db, &MatchRequest::new("app", "1.0.0"), &MatchPolicy::default())
        .expect("second pass");
    assert_eq!(second.considered, 1);
    assert_eq!(second.unmatched, 1);
    assert_eq!(db.stats().expect("stats").matched_source_functions, 3);
}

#[test]
fn too_many_parse_failures_roll_back_the_pass() {
    let db = seeded_db();
    let (bin, _) = db.get_or_create_binary("server", None).expect("binary");
    for (i, name) in ["app::broken<T", "app::<oops", "app::also<broken"].iter().enumerate() {
        let record = BinaryFunctionRecord {
            function: FunctionRecord {
                crate_name: "app".into(),
                name: "broken".into(),
                full_name: name.to_string(),
                kind: FunctionKind::Normal { module_path: "app".into() },
                status: AnalysisStatus::Ok,
            },
            binary: "server".into(),
            address: 0x9000 + i as u64,
            signature: sig("55"),
            matched_source: None,
        };
        db.insert_binary_function(bin.id, &record).expect("insert broken");
    }

    let err = match_crate(&db, &MatchRequest::new("app", "1.0.0"), &MatchPolicy::default())
        .expect_err("must roll back");
    match err {
        MatchError::TooManyFailures { failures, considered, .. } => {
            assert_eq!(failures, 3);
            assert_eq!(considered, 7);
        }
        other => panic!("unexpected error {other}"),
    }

    assert!(db.list_matches(None).expect("links").is_empty());
    assert_eq!(db.stats().expect("stats").matched_source_functions, 0);
    let runs = db.list_match_runs().expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, MatchRunStatus::RolledBack);
    assert_eq!(runs[0].failures, 3);

    // A laxer policy lets the same pass through.
    let lax = MatchPolicy { max_failure_ratio: 0.5, tie_break: TieBreak::LeaveUnmatched };
    let summary = match_crate(&db, &MatchRequest::new("app", "1.0.0"), &lax).expect("lax pass");
    assert_eq!(summary.linked_by_name, 2);
    assert_eq!(db.list_match_runs().expect("runs").len(), 2);
}

#[test]
fn names_unparsable_at_ingestion_count_as_failures() {
    let db = ProjectDb::open_in_memory().expect("db");
    let sources = mir(json!([["fn {app::run}", []]]));
    ingest_mir_entries(&db, "app", "1.0.0", &sources, false).expect("ingest mir");

    // `$u5b$` demangles to `[`, which the name grammar rejects.
    let config = ProjectConfig::new("test", ".funcmatch/project.db");
    let binary = dump(&[
        ("app::run", "55"),
        ("app::foo$u5b$a", "55"),
        ("app::foo$u5b$b", "55"),
        ("app::foo$u5b$c", "55"),
    ]);
    let outcome =
        ingest_program_dump(&db, &config, "server", None, &binary, false).expect("ingest bin");
    assert_eq!(outcome, IngestOutcome::Ingested { functions: 4, skipped: 0 });

    let unparsed =
        db.binary_functions("server", Some(AnalysisStatus::UnknownFormat)).expect("functions");
    assert_eq!(unparsed.len(), 3);
    assert_eq!(unparsed[0].record.function.crate_name, "app");
    assert_eq!(unparsed[0].record.function.full_name, "app::foo[a");

    let err = match_crate(&db, &MatchRequest::new("app", "1.0.0"), &MatchPolicy::default())
        .expect_err("must roll back");
    assert!(matches!(
        err,
        MatchError::TooManyFailures { failures: 3, considered: 4, .. }
    ));
    assert!(db.list_matches(None).expect("links").is_empty());

    let lax = MatchPolicy { max_failure_ratio: 0.75, tie_break: TieBreak::LeaveUnmatched };
    let summary = match_crate(&db, &MatchRequest::new("app", "1.0.0"), &lax).expect("lax pass");
    assert_eq!(summary.linked_by_name, 1);
    assert_eq!(summary.failures, 3);
}

#[test]
fn unknown_crate_version_is_an_error() {
    let db = seeded_db();
    let err = match_crate(&db, &MatchRequest::new("app", "9.9.9"), &MatchPolicy::default())
        .expect_err("unknown version");
    assert!(matches!(err, MatchError::UnknownCrate { ref version, .. } if version == "9.9.9"));
    assert!(db.list_match_runs().expect("runs").is_empty());
}

#[test]
fn extra_candidate_crates_are_searched() {
    let db = seeded_db();
    let vendored = mir(json!([["fn {common::log}", []]]));
    ingest_mir_entries(&db, "common", "0.1.0", &vendored, false).expect("ingest common");
    let config = ProjectConfig::new("test", ".funcmatch/project.db");
    ingest_program_dump(&db, &config, "worker", None, &dump(&[("app::log", "55")]), false)
        .expect("ingest worker");

    let mut request = MatchRequest::new("app", "1.0.0");
    request.extra_candidates.push(("common".into(), "0.1.0".into()));
    let summary = match_crate(&db, &request, &MatchPolicy::default()).expect("match");
    assert_eq!(summary.linked_by_name, 3);

    let links = db.list_matches(Some("common")).expect("links");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].binary, "worker");
}
