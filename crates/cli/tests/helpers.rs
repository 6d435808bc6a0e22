use std::fs;
use std::path::Path;

use funcmatch::{canonicalize_or_current, infer_project_name, resolve_under_root};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_resolves_existing_absolute_path() {
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");

    let result =
        canonicalize_or_current(subdir.to_str().expect("utf-8 path")).expect("canonicalize");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));
}

#[test]
fn canonicalize_or_current_keeps_missing_paths() {
    let tmp = tempdir().expect("tempdir");
    let missing = tmp.path().join("not-yet");
    let result = canonicalize_or_current(missing.to_str().expect("utf-8 path")).expect("missing");
    assert!(result.ends_with("not-yet"));
}

#[test]
fn infer_project_name_uses_last_path_component() {
    assert_eq!(infer_project_name(Path::new("/work/funcmatch")), "funcmatch");
    assert_eq!(infer_project_name(Path::new("/tmp/project-root")), "project-root");
}

#[test]
fn infer_project_name_falls_back_when_missing() {
    assert_eq!(infer_project_name(Path::new("/")), "unnamed-project");
}

#[test]
fn resolve_under_root_only_joins_relative_paths() {
    let root = Path::new("/work/proj");
    assert_eq!(resolve_under_root(root, "dumps/a.json"), root.join("dumps/a.json"));
    assert_eq!(resolve_under_root(root, "/abs/a.json"), Path::new("/abs/a.json"));
}
