//! funcmatch-core
//!
//! Core library for correlating compiled Rust functions with their source
//! definitions.
//!
//! This crate defines the demangled-name grammar (`name`), fuzzy byte
//! signatures (`signature`), the disassembler interface (`program`), project
//! persistence (`db`), and the ingestion / matching services built on them.
//!
//! The goal is to keep all substantive logic here so it is fully testable and
//! reusable from multiple frontends.

pub mod db;
pub mod demangle;
pub mod name;
pub mod program;
pub mod services;
pub mod signature;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
