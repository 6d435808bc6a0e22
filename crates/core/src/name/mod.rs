//! Demangled symbol names as structured declarations.
//!
//! A demangled Rust symbol such as
//! `<algo::U32X4 as core::ops::MulAssign<u32>>::mul_assign` is parsed into a
//! [`Declaration`]: the path tokens after the head, plus an optional
//! [`TraitClause`] when the head names a trait implementation. Generic
//! arguments are kept on each token but ignored by [`StructuralKey`], which is
//! what the correlation engine compares: monomorphized copies of one generic
//! function share a key.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod lexer;
mod parser;

pub use parser::parse;

/// Failure to parse a demangled name. No partial declaration is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at byte {position}: `{fragment}`")]
pub struct ParseError {
    pub message: String,
    /// The offending substring of the input.
    pub fragment: String,
    /// Byte offset of `fragment` within the input.
    pub position: usize,
}

impl ParseError {
    pub(crate) fn at(input: &str, start: usize, end: usize, message: impl Into<String>) -> Self {
        let mut end = end.clamp(start, input.len());
        while !input.is_char_boundary(end) {
            end += 1;
        }
        Self { message: message.into(), fragment: input[start..end].to_string(), position: start }
    }
}

/// Parsed shape of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Path tokens, outermost first.
    pub tokens: Vec<PathToken>,
    /// Present iff the symbol starts with `<X as Y>` or `<Y for X>`.
    pub trait_clause: Option<TraitClause>,
}

/// One `::`-separated segment of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathToken {
    pub kind: TokenKind,
    pub generics: Option<GenericParams>,
}

/// What a path segment names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// A plain identifier.
    Name(String),
    /// A closure body; legacy names carry no index.
    Closure(Option<u32>),
    /// `<impl Type>` segment of a def-path.
    InherentImpl(Class),
    /// `<impl Trait for Type>` segment of a def-path.
    TraitImpl(Box<TraitClause>),
}

/// A trait implementation, independent of whether it was written
/// `Type as Trait` or `Trait for Type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitClause {
    pub implemented_trait: Path,
    pub implementing_type: Class,
}

/// A `::`-separated path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub tokens: Vec<PathToken>,
}

/// A type named by path, optionally behind a shared reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub by_ref: bool,
    pub path: Path,
}

/// Generic arguments of a token. Type arguments and lifetimes are kept in
/// separate lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericParams {
    pub types: Vec<TypeArg>,
    pub lifetimes: Vec<Lifetime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeArg {
    /// Placeholder such as `T`, `T0` or `&T1`.
    Param { name: String, by_ref: bool },
    /// A concrete type such as `u32` or `alloc::vec::Vec<u8>`.
    Concrete(Class),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    pub name: char,
    pub by_ref: bool,
}

/// Generic-free shape of a declaration, used for structural equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructuralKey {
    pub tokens: Vec<String>,
    /// `(implemented trait, implementing type)` token names.
    pub trait_clause: Option<(Vec<String>, Vec<String>)>,
}

impl Declaration {
    /// Structural key with every generic argument dropped.
    ///
    /// When `crate_name` is given and the first token is that plain name, it is
    /// removed so that crate-qualified and crate-relative paths compare equal.
    pub fn structural_key(&self, crate_name: Option<&str>) -> StructuralKey {
        let mut tokens: Vec<String> = self.tokens.iter().map(PathToken::name).collect();
        if let (Some(krate), Some(first)) = (crate_name, self.tokens.first()) {
            if matches!(&first.kind, TokenKind::Name(n) if n == krate) {
                tokens.remove(0);
            }
        }
        let trait_clause = self
            .trait_clause
            .as_ref()
            .map(|tc| (tc.implemented_trait.names(), tc.implementing_type.path.names()));
        StructuralKey { tokens, trait_clause }
    }

    /// Same token names and trait-clause paths, ignoring generic contents.
    pub fn structurally_eq(&self, other: &Declaration) -> bool {
        self.structural_key(None) == other.structural_key(None)
    }

    /// Generic-free name of the last token, or the rendered head when the
    /// declaration has no tokens.
    pub fn symbol_name(&self) -> String {
        match self.tokens.last() {
            Some(token) => token.name(),
            None => self.to_string(),
        }
    }

    /// Best guess of the crate that defines this symbol.
    ///
    /// For trait implementations this is the implementing type's crate, or the
    /// trait's crate when the type is a bare primitive such as `u32`.
    pub fn crate_name(&self) -> Option<String> {
        let first_name = |tokens: &[PathToken]| match tokens.first().map(|t| &t.kind) {
            Some(TokenKind::Name(name)) => Some(name.clone()),
            _ => None,
        };
        match &self.trait_clause {
            Some(tc) if tc.implementing_type.path.tokens.len() > 1 => {
                first_name(&tc.implementing_type.path.tokens)
            }
            Some(tc) => first_name(&tc.implemented_trait.tokens),
            None => first_name(&self.tokens),
        }
    }
}

impl PathToken {
    pub fn named(name: impl Into<String>, generics: Option<GenericParams>) -> Self {
        Self { kind: TokenKind::Name(name.into()), generics }
    }

    /// Canonical name without generic arguments.
    pub fn name(&self) -> String {
        match &self.kind {
            TokenKind::Name(name) => name.clone(),
            TokenKind::Closure(None) => "{{closure}}".to_string(),
            TokenKind::Closure(Some(index)) => format!("{{closure#{index}}}"),
            TokenKind::InherentImpl(class) => format!("<impl {}>", class.path.names().join("::")),
            TokenKind::TraitImpl(tc) => format!(
                "<impl {} for {}>",
                tc.implemented_trait.names().join("::"),
                tc.implementing_type.path.names().join("::")
            ),
        }
    }

    pub fn is_closure(&self) -> bool {
        matches!(self.kind, TokenKind::Closure(_))
    }
}

impl Path {
    /// Generic-free token names.
    pub fn names(&self) -> Vec<String> {
        self.tokens.iter().map(PathToken::name).collect()
    }

    /// Token names joined with `::`.
    pub fn plain(&self) -> String {
        self.names().join("::")
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if let Some(tc) = &self.trait_clause {
            write!(f, "<{} as {}>", tc.implementing_type, tc.implemented_trait)?;
            first = false;
        }
        for token in &self.tokens {
            if !first {
                f.write_str("::")?;
            }
            write!(f, "{token}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Name(name) => f.write_str(name)?,
            TokenKind::Closure(_) => f.write_str(&self.name())?,
            TokenKind::InherentImpl(class) => write!(f, "<impl {class}>")?,
            TokenKind::TraitImpl(tc) => {
                write!(f, "<impl {} for {}>", tc.implemented_trait, tc.implementing_type)?
            }
        }
        if let Some(generics) = &self.generics {
            write!(f, "{generics}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str("::")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.by_ref {
            f.write_str("&")?;
        }
        write!(f, "{}", self.path)
    }
}

impl fmt::Display for GenericParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(self.lifetimes.len() + self.types.len());
        for lt in &self.lifetimes {
            parts.push(format!("{}'{}", if lt.by_ref { "&" } else { "" }, lt.name));
        }
        for ty in &self.types {
            parts.push(match ty {
                TypeArg::Param { name, by_ref } => {
                    format!("{}{name}", if *by_ref { "&" } else { "" })
                }
                TypeArg::Concrete(class) => class.to_string(),
            });
        }
        write!(f, "<{}>", parts.join(", "))
    }
}
