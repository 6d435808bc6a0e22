//! Symbol demangling boundary.
//!
//! Rust symbols come in two manglings: legacy (`_ZN…17h<hash>E`) and v0
//! (`_R…`). Both are handled by `rustc_demangle`; the alternate format is used
//! so legacy hashes and v0 crate disambiguators do not leak into the readable
//! name, which keeps names stable across builds.

use rustc_demangle::try_demangle;
use thiserror::Error;

/// Prefixes recognized as Rust manglings, including the extra underscore
/// some platforms add.
const RUST_PREFIXES: &[&str] = &["_ZN", "__ZN", "_R", "__R"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemangleError {
    #[error("`{0}` does not use a recognized mangling prefix")]
    UnknownPrefix(String),
    #[error("`{0}` could not be demangled")]
    Malformed(String),
}

/// Whether `raw` starts with one of the Rust mangling prefixes.
pub fn has_rust_prefix(raw: &str) -> bool {
    RUST_PREFIXES.iter().any(|p| raw.starts_with(p))
}

/// Demangle a raw label into a readable path such as `foo::bar::<u32>`.
pub fn demangle(raw: &str) -> Result<String, DemangleError> {
    if !has_rust_prefix(raw) {
        return Err(DemangleError::UnknownPrefix(raw.to_string()));
    }
    let demangled = try_demangle(raw).map_err(|_| DemangleError::Malformed(raw.to_string()))?;
    Ok(format!("{demangled:#}"))
}
