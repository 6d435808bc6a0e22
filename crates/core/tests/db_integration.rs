use funcmatch_core::db::{
    AnalysisStatus, BinaryFunctionRecord, DbError, FunctionKind, FunctionRecord, MatchRunRecord,
    MatchRunStatus, ProjectDb, SourceFunctionRecord, CURRENT_SCHEMA_VERSION,
};
use tempfile::tempdir;

fn function(crate_name: &str, full_name: &str, kind: FunctionKind) -> FunctionRecord {
    FunctionRecord {
        crate_name: crate_name.into(),
        name: full_name.rsplit("::").next().unwrap_or(full_name).into(),
        full_name: full_name.into(),
        kind,
        status: AnalysisStatus::Ok,
    }
}

fn source(full_name: &str, kind: FunctionKind) -> SourceFunctionRecord {
    SourceFunctionRecord {
        function: function("app", full_name, kind),
        version: "1.0.0".into(),
        signature: None,
        matched: false,
    }
}

fn binary_fn(full_name: &str, address: u64) -> BinaryFunctionRecord {
    BinaryFunctionRecord {
        function: function("app", full_name, FunctionKind::Normal { module_path: "app".into() }),
        binary: "server".into(),
        address,
        signature: "-".repeat(64),
        matched_source: None,
    }
}

#[test]
fn schema_is_created_and_reopened() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("project.db");

    {
        let db = ProjectDb::open(&db_path).expect("open db");
        let version: i32 = db
            .connection()
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .expect("schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        db.get_or_create_crate("app", "1.0.0").expect("crate");
        db.get_or_create_binary("server", Some("abc")).expect("binary");
    }

    let db = ProjectDb::open(&db_path).expect("re-open db");
    assert_eq!(db.list_crates().expect("crates").len(), 1);
    let binaries = db.list_binaries().expect("binaries");
    assert_eq!(binaries.len(), 1);
    assert_eq!(binaries[0].hash.as_deref(), Some("abc"));
}

#[test]
fn newer_schema_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("project.db");
    {
        let conn = rusqlite::Connection::open(&db_path).expect("raw open");
        conn.execute_batch("PRAGMA user_version = 99;").expect("bump version");
    }

    match ProjectDb::open(&db_path) {
        Err(DbError::UnsupportedSchemaVersion { found, max_supported, .. }) => {
            assert_eq!(found, 99);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        other => panic!("expected unsupported schema error, got {other:?}"),
    }
}

#[test]
fn crates_and_binaries_are_unique() {
    let db = ProjectDb::open_in_memory().expect("db");

    let (first, created) = db.get_or_create_crate("app", "1.0.0").expect("first");
    assert!(created);
    let (again, created) = db.get_or_create_crate("app", "1.0.0").expect("again");
    assert!(!created);
    assert_eq!(first, again);
    let (other, created) = db.get_or_create_crate("app", "1.1.0").expect("other version");
    assert!(created);
    assert_ne!(first.id, other.id);

    let (bin, created) = db.get_or_create_binary("server", None).expect("binary");
    assert!(created);
    let (same, created) = db.get_or_create_binary("server", Some("ignored")).expect("binary");
    assert!(!created);
    assert_eq!(same.hash, None);
    db.set_binary_hash(bin.id, Some("feed")).expect("hash");
    assert_eq!(db.list_binaries().expect("list")[0].hash.as_deref(), Some("feed"));

    assert!(db.find_crate("app", "2.0.0").expect("find").is_none());
}

#[test]
fn function_kinds_and_statuses_survive_storage() {
    let db = ProjectDb::open_in_memory().expect("db");
    let (krate, _) = db.get_or_create_crate("app", "1.0.0").expect("crate");

    let kinds = [
        FunctionKind::Normal { module_path: "app::net".into() },
        FunctionKind::Method { impl_type: "Conn".into() },
        FunctionKind::TraitImpl { impl_type: "Conn".into(), impl_trait: "core::fmt::Debug".into() },
        FunctionKind::Closure { parent: "app::run".into() },
    ];
    for (i, kind) in kinds.iter().enumerate() {
        db.insert_source_function(krate.id, &source(&format!("app::f{i}"), kind.clone()))
            .expect("insert");
    }
    let mut unwanted = source("app::hidden", FunctionKind::Normal { module_path: "app".into() });
    unwanted.function.status = AnalysisStatus::UnwantedCrate;
    db.insert_source_function(krate.id, &unwanted).expect("insert unwanted");

    assert_eq!(db.count_source_functions(krate.id).expect("count"), 5);
    let stored = db.source_functions("app", "1.0.0").expect("ok functions");
    let read_kinds: Vec<FunctionKind> =
        stored.iter().map(|s| s.record.function.kind.clone()).collect();
    assert_eq!(read_kinds, kinds.to_vec());

    let (bin, _) = db.get_or_create_binary("server", None).expect("binary");
    let mut bad = binary_fn("app::broken", 0x30);
    bad.function.status = AnalysisStatus::BadBinary;
    db.insert_binary_function(bin.id, &bad).expect("bad");
    db.insert_binary_function(bin.id, &binary_fn("app::f0", 0x10)).expect("ok");

    let all = db.binary_functions("server", None).expect("all");
    assert_eq!(all.iter().map(|f| f.record.address).collect::<Vec<_>>(), vec![0x10, 0x30]);
    let bad_only = db.binary_functions("server", Some(AnalysisStatus::BadBinary)).expect("bad");
    assert_eq!(bad_only.len(), 1);
    assert_eq!(bad_only[0].record.function.full_name, "app::broken");
    assert_eq!(db.unmatched_binary_functions("app").expect("unmatched").len(), 1);
}

#[test]
fn links_track_matched_flags_and_clear_on_delete() {
    let db = ProjectDb::open_in_memory().expect("db");
    let (krate, _) = db.get_or_create_crate("app", "1.0.0").expect("crate");
    let run = source("app::run", FunctionKind::Normal { module_path: "app".into() });
    let src = db.insert_source_function(krate.id, &run).expect("source");
    let (bin, _) = db.get_or_create_binary("server", None).expect("binary");
    let bin_fn = db.insert_binary_function(bin.id, &binary_fn("app::run", 0x40)).expect("bin fn");

    db.set_match(bin_fn, src).expect("link");
    let links = db.list_matches(Some("app")).expect("links");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].address, 0x40);
    assert_eq!(links[0].source_name, "app::run");
    assert!(db.list_matches(Some("other")).expect("none").is_empty());
    assert!(db.source_functions("app", "1.0.0").expect("sources")[0].record.matched);

    let stats = db.stats().expect("stats");
    assert_eq!(stats.linked_binary_functions, 1);
    assert_eq!(stats.matched_source_functions, 1);

    // Dropping the binary side clears the flag.
    db.delete_binary_functions(bin.id).expect("delete binary fns");
    assert!(!db.source_functions("app", "1.0.0").expect("sources")[0].record.matched);

    // Dropping the source side nulls the link.
    let bin_fn = db.insert_binary_function(bin.id, &binary_fn("app::run", 0x40)).expect("again");
    db.set_match(bin_fn, src).expect("relink");
    db.delete_source_functions(krate.id).expect("delete sources");
    let remaining = db.binary_functions("server", None).expect("remaining");
    assert_eq!(remaining[0].record.matched_source, None);
}

#[test]
fn match_runs_are_recorded_in_order() {
    let db = ProjectDb::open_in_memory().expect("db");
    let run = |status| MatchRunRecord {
        crate_name: "app".into(),
        version: "1.0.0".into(),
        linked_by_name: 3,
        linked_by_signature: 1,
        unmatched: 2,
        failures: 0,
        status,
        started_at: "2026-01-01T00:00:00+00:00".into(),
        finished_at: "2026-01-01T00:00:01+00:00".into(),
    };
    db.insert_match_run(&run(MatchRunStatus::Committed)).expect("first");
    db.insert_match_run(&run(MatchRunStatus::RolledBack)).expect("second");

    let runs = db.list_match_runs().expect("runs");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0], run(MatchRunStatus::Committed));
    assert_eq!(runs[1].status, MatchRunStatus::RolledBack);
}
