use anyhow::Result;
use clap::{Parser, Subcommand};
use funcmatch::commands::{
    attach_signatures_command, extract_command, ingest_bin_command, ingest_mir_command,
    init_project_command, list_functions_command, list_matches_command, match_command,
    parse_name_command, project_info_command, signature_command, status_command, OutputFormat,
};
use funcmatch::logging::{init_logging, level_for_verbosity, LogFormat};

/// Correlate compiled Rust functions with their source definitions.
///
/// This CLI is a thin wrapper around `funcmatch-core` (exposed in code as
/// `funcmatch_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "funcmatch",
    version,
    about = "Match binary functions to Rust source functions",
    long_about = None
)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format on stderr: pretty or json.
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new funcmatch project at the given root.
    ///
    /// This will:
    /// - Create a `.funcmatch` metadata directory.
    /// - Create `dumps/mir`, `dumps/bin`, and `reports` directories.
    /// - Write a `.funcmatch/project.json` config file and the project database.
    InitProject {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional project name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,

        /// Only match functions of these crates (repeatable). Default: all crates.
        #[arg(long = "want-crate")]
        wanted_crates: Vec<String>,
    },

    /// Show basic information about an existing project.
    ProjectInfo {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Ingest MIR dumps named `<crate>_<version>.json`.
    IngestMir {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Dump files or directories. Defaults to `dumps/mir`.
        paths: Vec<String>,

        /// Delete and re-create crate versions that were already ingested.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Ingest binary dumps named `<binary>.json`.
    IngestBin {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Dump files or directories. Defaults to `dumps/bin`.
        paths: Vec<String>,

        /// Delete and re-create binaries that were already ingested.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Disassemble an x86-64 ELF binary into a dump under `dumps/bin`.
    Extract {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Path to the binary.
        #[arg(long)]
        binary: String,

        /// Binary name used for the dump file. Defaults to the file stem.
        #[arg(long)]
        name: Option<String>,

        /// Write the dump here instead of `dumps/bin/<name>.json`.
        #[arg(long)]
        output: Option<String>,
    },

    /// Attach signatures from a reference build's dump to a crate version's source functions.
    AttachSignatures {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long = "crate")]
        crate_name: String,

        #[arg(long)]
        version: String,

        /// Binary dump of the reference build.
        #[arg(long)]
        dump: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Link a crate's binary functions to the source functions of one version.
    Match {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long = "crate")]
        crate_name: String,

        #[arg(long)]
        version: String,

        /// Additional candidate source crates as `crate@version` (repeatable).
        #[arg(long = "candidate")]
        candidates: Vec<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Summarize ingested crates, binaries, and match runs.
    Status {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List persisted binary → source links.
    ListMatches {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Only show links into this crate.
        #[arg(long = "crate")]
        crate_name: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the stored functions of one binary.
    ListFunctions {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        binary: String,

        /// Only show functions with this status (ok, unknown-format, bad-binary, unwanted-crate).
        #[arg(long)]
        status: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Parse a symbol name (mangled or demangled) and show its structure.
    ParseName {
        name: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print fuzzy signatures of the functions in an x86-64 ELF binary.
    Signature {
        #[arg(long)]
        binary: String,

        /// Only functions whose label contains this text.
        #[arg(long)]
        function: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(level_for_verbosity(cli.verbose), cli.log_format)?;

    // Default to project-info if no command is given.
    match cli.command.unwrap_or(Command::ProjectInfo { root: ".".to_string(), json: false }) {
        Command::InitProject { root, name, wanted_crates } => {
            init_project_command(&root, name, wanted_crates)?
        }
        Command::ProjectInfo { root, json } => project_info_command(&root, json)?,
        Command::IngestMir { root, paths, force, json } => {
            ingest_mir_command(&root, &paths, force, json)?
        }
        Command::IngestBin { root, paths, force, json } => {
            ingest_bin_command(&root, &paths, force, json)?
        }
        Command::Extract { root, binary, name, output } => {
            extract_command(&root, &binary, name, output)?
        }
        Command::AttachSignatures { root, crate_name, version, dump, json } => {
            attach_signatures_command(&root, &crate_name, &version, &dump, json)?
        }
        Command::Match { root, crate_name, version, candidates, json } => {
            match_command(&root, &crate_name, &version, &candidates, json)?
        }
        Command::Status { root, json } => status_command(&root, json)?,
        Command::ListMatches { root, crate_name, format } => {
            list_matches_command(&root, crate_name.as_deref(), format)?
        }
        Command::ListFunctions { root, binary, status, format } => {
            list_functions_command(&root, &binary, status.as_deref(), format)?
        }
        Command::ParseName { name, json } => parse_name_command(&name, json)?,
        Command::Signature { binary, function, json } => {
            signature_command(&binary, function.as_deref(), json)?
        }
    }

    Ok(())
}
