use std::path::{Path, PathBuf};

/// Logical layout of a project on disk.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself.
/// The CLI or other frontends are responsible for actually creating directories
/// and files based on this layout.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// Root directory of the project.
    pub root: PathBuf,
    /// Directory for internal metadata (.funcmatch).
    pub meta_dir: PathBuf,
    /// Path to the project config file (JSON).
    pub project_config_path: PathBuf,
    /// Path to the project database file.
    pub db_path: PathBuf,
    /// Directory holding dumps (dumps).
    pub dumps_dir: PathBuf,
    /// Directory for MIR dumps, one `<crate>_<version>.json` per crate version.
    pub mir_dumps_dir: PathBuf,
    /// Directory for binary dumps, one `<binary>.json` per binary.
    pub bin_dumps_dir: PathBuf,
    /// Directory for match reports (reports).
    pub reports_dir: PathBuf,
}

impl ProjectLayout {
    /// Compute the default layout for a project rooted at `root`.
    ///
    /// This does *not* touch the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".funcmatch");
        let project_config_path = meta_dir.join("project.json");
        let db_path = meta_dir.join("project.db");
        let dumps_dir = root.join("dumps");
        let mir_dumps_dir = dumps_dir.join("mir");
        let bin_dumps_dir = dumps_dir.join("bin");
        let reports_dir = root.join("reports");

        Self {
            root,
            meta_dir,
            project_config_path,
            db_path,
            dumps_dir,
            mir_dumps_dir,
            bin_dumps_dir,
            reports_dir,
        }
    }

    /// Compute a database path string suitable for storing in `ProjectConfig`,
    /// typically as a path relative to `root`.
    pub fn db_path_relative_string(&self) -> String {
        match self.db_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => self.db_path.to_string_lossy().to_string(),
        }
    }

    /// Where the dump of `binary_name` is written by `extract`.
    pub fn binary_dump_path(&self, binary_name: &str) -> PathBuf {
        self.bin_dumps_dir.join(format!("{binary_name}.json"))
    }
}
