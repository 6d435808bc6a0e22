use std::collections::BTreeMap;
use std::path::Path;

use funcmatch_core::db::{AnalysisStatus, FunctionKind, ProjectConfig, ProjectDb};
use funcmatch_core::program::{FunctionDump, ProgramDump};
use funcmatch_core::services::ingest::{
    classify, leading_crate, mir_function_path, parse_mir_file_name, sha256_file,
};
use funcmatch_core::services::{
    attach_reference_signatures, ingest_bin, ingest_mir, ingest_program_dump, IngestError,
    IngestOutcome,
};
use serde_json::json;

const HASH: &str = "17h0123456789abcdefE";

/// Legacy mangling of already escaped path segments.
fn mangle(segments: &[&str]) -> String {
    let body: String = segments.iter().map(|s| format!("{}{s}", s.len())).collect();
    format!("_ZN{body}{HASH}")
}

fn sig(prefix: &str) -> String {
    format!("{prefix}{}", "-".repeat(64 - prefix.len()))
}

fn entry(label: String, sig: String) -> FunctionDump {
    let mut bbs = BTreeMap::new();
    bbs.insert(0, vec!["push rbp".to_string(), "ret".to_string()]);
    FunctionDump { func_name: label, is_rust_func: true, edges: Vec::new(), bbs, sig }
}

fn write_json(path: &Path, value: &serde_json::Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).expect("json")).expect("write");
}

fn mir_dump() -> serde_json::Value {
    json!([
        ["fn {app::run}", []],
        ["fn {app::Conn::open}", []],
        ["fn {<app::Conn as core::fmt::Debug>::fmt}", []],
        ["fn {app::run::{{closure}}}", []],
        ["static GREETING", []],
        ["fn {app::broken<T}", []],
        ["fn {app::signed}", [], sig("55c3")],
        ["fn {app::badly_signed}", [], "nope"]
    ])
}

#[test]
fn mir_file_names_split_at_last_underscore() {
    let (krate, version) =
        parse_mir_file_name(Path::new("dumps/my_crate_1.2.3.json")).expect("file name");
    assert_eq!(krate, "my_crate");
    assert_eq!(version, "1.2.3");
    assert!(matches!(
        parse_mir_file_name(Path::new("noversion.json")),
        Err(IngestError::FileName(_))
    ));
}

#[test]
fn mir_labels_yield_function_paths() {
    assert_eq!(mir_function_path("fn {app::run}"), Some("app::run"));
    assert_eq!(mir_function_path("fn {app::run::{{closure}}}"), Some("app::run::{{closure}}"));
    assert_eq!(mir_function_path("static GREETING"), None);
    assert_eq!(mir_function_path("fn {}"), None);
}

#[test]
fn unparsable_names_keep_their_leading_crate() {
    assert_eq!(leading_crate("app::foo[a"), Some("app"));
    assert_eq!(leading_crate("<app::Conn as core::fmt::Debug>::fmt"), Some("app"));
    assert_eq!(leading_crate("&app::x"), Some("app"));
    assert_eq!(leading_crate("[u8]::len"), None);
    assert_eq!(leading_crate("main"), None);
}

#[test]
fn unparsable_rust_names_are_stored_as_unknown_format() {
    let mut config = ProjectConfig::new("test", ".funcmatch/project.db");
    config.wanted_crates = vec!["app".into()];
    let db = ProjectDb::open_in_memory().expect("db");

    let mut dump = ProgramDump::new();
    dump.insert("00001000".into(), entry(mangle(&["app", "foo$u5b$a"]), sig("55")));
    dump.insert("00001100".into(), entry(mangle(&["other", "foo$u5b$a"]), sig("55")));
    let outcome = ingest_program_dump(&db, &config, "server", None, &dump, false).expect("ingest");
    assert_eq!(outcome, IngestOutcome::Ingested { functions: 2, skipped: 0 });

    let stored = db.binary_functions("server", None).expect("functions");
    let app = &stored[0].record.function;
    assert_eq!(app.full_name, "app::foo[a");
    assert_eq!(app.name, "foo[a");
    assert_eq!(app.status, AnalysisStatus::UnknownFormat);
    assert_eq!(app.kind, FunctionKind::Normal { module_path: "app".into() });
    assert_eq!(stored[1].record.function.status, AnalysisStatus::UnwantedCrate);
}

#[test]
fn kinds_are_derived_from_names() {
    let kind = |name: &str| classify(&funcmatch_core::name::parse(name).expect("parse"));
    assert_eq!(kind("app::net::send"), FunctionKind::Normal { module_path: "app::net".into() });
    assert_eq!(kind("app::Conn::open"), FunctionKind::Method { impl_type: "app::Conn".into() });
    assert_eq!(
        kind("<app::Conn as core::fmt::Debug>::fmt"),
        FunctionKind::TraitImpl {
            impl_type: "app::Conn".into(),
            impl_trait: "core::fmt::Debug".into(),
        }
    );
    assert_eq!(
        kind("alloc::vec::<impl alloc::vec::Vec<T>>::push"),
        FunctionKind::Method { impl_type: "alloc::vec::Vec".into() }
    );
    assert_eq!(kind("app::run::{{closure}}"), FunctionKind::Closure { parent: "app::run".into() });
}

#[test]
fn mir_ingestion_is_idempotent_unless_forced() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("app_1.0.0.json");
    write_json(&path, &mir_dump());
    let db = ProjectDb::open_in_memory().expect("db");

    let first = ingest_mir(&db, &path, false).expect("first ingest");
    assert_eq!(first, IngestOutcome::Ingested { functions: 6, skipped: 2 });

    let again = ingest_mir(&db, &path, false).expect("second ingest");
    assert_eq!(again, IngestOutcome::AlreadyPresent);
    let krate = db.find_crate("app", "1.0.0").expect("find").expect("crate row");
    assert_eq!(db.count_source_functions(krate.id).expect("count"), 6);

    let forced = ingest_mir(&db, &path, true).expect("forced ingest");
    assert_eq!(forced, IngestOutcome::Ingested { functions: 6, skipped: 2 });
    assert_eq!(db.count_source_functions(krate.id).expect("count"), 6);
    assert_eq!(db.list_crates().expect("crates").len(), 1);

    let sources = db.source_functions("app", "1.0.0").expect("sources");
    let signed = sources
        .iter()
        .find(|s| s.record.function.full_name == "app::signed")
        .expect("signed source");
    assert_eq!(signed.record.signature.as_deref(), Some(sig("55c3").as_str()));
    let badly = sources
        .iter()
        .find(|s| s.record.function.full_name == "app::badly_signed")
        .expect("badly signed source");
    assert_eq!(badly.record.signature, None);
}

#[test]
fn binary_entries_get_statuses() {
    let mut config = ProjectConfig::new("test", ".funcmatch/project.db");
    config.wanted_crates = vec!["app".into()];
    let db = ProjectDb::open_in_memory().expect("db");

    let mut dump = ProgramDump::new();
    dump.insert("00001000".into(), entry(mangle(&["app", "run"]), sig("55c3")));
    dump.insert("00001100".into(), entry(mangle(&["app", "bad_sig"]), "short".into()));
    let mut empty = entry(mangle(&["app", "empty"]), sig("c3"));
    empty.bbs.clear();
    dump.insert("00001200".into(), empty);
    dump.insert("00001300".into(), entry(mangle(&["other", "run"]), sig("55")));
    let mut plain = entry("main".into(), String::new());
    plain.is_rust_func = false;
    dump.insert("00001400".into(), plain);
    dump.insert("zzzz".into(), entry(mangle(&["app", "keyless"]), sig("55")));
    dump.insert("00001500".into(), entry("_ZN3app".into(), sig("55")));

    let outcome =
        ingest_program_dump(&db, &config, "server", None, &dump, false).expect("ingest dump");
    assert_eq!(outcome, IngestOutcome::Ingested { functions: 4, skipped: 3 });

    let stored = db.binary_functions("server", None).expect("functions");
    let status_of = |name: &str| {
        stored
            .iter()
            .find(|f| f.record.function.full_name == name)
            .map(|f| f.record.function.status)
            .expect(name)
    };
    assert_eq!(status_of("app::run"), AnalysisStatus::Ok);
    assert_eq!(status_of("app::bad_sig"), AnalysisStatus::UnknownFormat);
    assert_eq!(status_of("app::empty"), AnalysisStatus::BadBinary);
    assert_eq!(status_of("other::run"), AnalysisStatus::UnwantedCrate);
    assert_eq!(stored[0].record.address, 0x1000);

    let again = ingest_program_dump(&db, &config, "server", None, &dump, false).expect("again");
    assert_eq!(again, IngestOutcome::AlreadyPresent);
}

#[test]
fn binary_files_are_named_and_hashed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("server.json");
    let mut dump = ProgramDump::new();
    dump.insert("00002000".into(), entry(mangle(&["app", "run"]), sig("55")));
    write_json(&path, &serde_json::to_value(&dump).expect("dump json"));

    let db = ProjectDb::open_in_memory().expect("db");
    let config = ProjectConfig::new("test", ".funcmatch/project.db");
    ingest_bin(&db, &config, &path, false).expect("ingest");

    let binaries = db.list_binaries().expect("binaries");
    assert_eq!(binaries[0].name, "server");
    let expected = sha256_file(&path).expect("hash");
    assert_eq!(binaries[0].hash.as_deref(), Some(expected.as_str()));
    assert_eq!(expected.len(), 64);

    // Forcing a re-ingest replaces the functions.
    let outcome = ingest_bin(&db, &config, &path, true).expect("forced");
    assert_eq!(outcome, IngestOutcome::Ingested { functions: 1, skipped: 0 });
    assert_eq!(db.count_binary_functions(binaries[0].id).expect("count"), 1);
}

#[test]
fn malformed_dump_is_a_json_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("app_1.0.0.json");
    std::fs::write(&path, "{ not json").expect("write");
    let db = ProjectDb::open_in_memory().expect("db");
    assert!(matches!(ingest_mir(&db, &path, false), Err(IngestError::Json { .. })));
    assert!(matches!(
        ingest_mir(&db, &temp.path().join("missing_1.0.json"), false),
        Err(IngestError::Io { .. })
    ));
}

#[test]
fn reference_signatures_attach_to_unique_sources() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("app_1.0.0.json");
    write_json(&path, &mir_dump());
    let db = ProjectDb::open_in_memory().expect("db");
    ingest_mir(&db, &path, false).expect("ingest");

    let mut reference = ProgramDump::new();
    reference.insert("00000010".into(), entry(mangle(&["app", "run"]), sig("4889e5")));
    reference.insert("00000020".into(), entry(mangle(&["app", "run"]), sig("90")));
    reference.insert("00000030".into(), entry(mangle(&["app", "gone"]), sig("c3")));
    reference.insert("00000040".into(), entry(mangle(&["other", "run"]), sig("c3")));

    let summary = attach_reference_signatures(&db, "app", "1.0.0", &reference).expect("attach");
    assert_eq!(summary.attached, 1);
    assert_eq!(summary.unresolved, 1);

    let sources = db.source_functions("app", "1.0.0").expect("sources");
    let run = sources.iter().find(|s| s.record.function.full_name == "app::run").expect("run");
    assert_eq!(run.record.signature.as_deref(), Some(sig("4889e5").as_str()));
}
