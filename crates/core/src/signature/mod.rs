//! Fuzzy byte signatures of function prologues.
//!
//! A signature is the hex encoding of the instructions that start within the
//! first 32 bytes of a function, cut or padded to 64 characters. When an
//! instruction's last four bytes provably encode the relative offset of its
//! single call/data reference, those bytes are replaced by `..` wildcards so
//! that relinking or relocating the binary leaves the signature unchanged.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::program::{FunctionExtent, Instruction, ProgramView, Reference};

/// Length of a signature string in characters.
pub const SIGNATURE_LEN: usize = 64;

/// Size of the address window after the entry point.
pub const WINDOW_BYTES: u64 = 0x20;

/// One wildcarded byte.
pub const WILDCARD: &str = "..";

/// Padding character for short windows.
pub const FILLER: char = '-';

/// Signature of `function`, computed over its first [`WINDOW_BYTES`] bytes.
pub fn function_signature<V: ProgramView + ?Sized>(view: &V, function: &FunctionExtent) -> String {
    let limit = function.end.min(function.entry.saturating_add(WINDOW_BYTES));
    let instructions = view.instructions_in_range(function.entry, limit);
    let window = instructions
        .iter()
        .take_while(|insn| insn.address >= function.entry && insn.address < limit)
        .map(|insn| (insn, view.references_from(insn)));
    signature_from_window(window)
}

/// Signature of an already windowed instruction sequence.
pub fn signature_from_window<'a, I>(window: I) -> String
where
    I: IntoIterator<Item = (&'a Instruction, Vec<Reference>)>,
{
    let mut raw = String::with_capacity(SIGNATURE_LEN * 2);
    for (insn, refs) in window {
        encode_instruction(&mut raw, insn, &refs);
        if raw.len() >= SIGNATURE_LEN {
            break;
        }
    }
    finish(raw)
}

/// Append the pattern for one instruction to `out`.
pub fn encode_instruction(out: &mut String, insn: &Instruction, refs: &[Reference]) {
    let bytes = insn.bytes.as_slice();
    match relocatable_split(insn, refs) {
        Some(opcode_len) => {
            push_hex(out, &bytes[..opcode_len]);
            for _ in 0..4 {
                out.push_str(WILDCARD);
            }
        }
        None => push_hex(out, bytes),
    }
}

/// Length of the leading opcode bytes when the trailing four bytes are the
/// relative operand of the instruction's only qualifying reference.
fn relocatable_split(insn: &Instruction, refs: &[Reference]) -> Option<usize> {
    let mut qualifying =
        refs.iter().filter(|r| r.is_unconditional_call() || r.is_non_stack_data());
    let only = qualifying.next()?;
    if qualifying.next().is_some() {
        return None;
    }

    let len = insn.bytes.len();
    if len < 5 {
        return None;
    }
    let tail: [u8; 4] = insn.bytes[len - 4..].try_into().ok()?;
    let candidate = insn.next_address().wrapping_add(relative_displacement(tail) as u64);
    (candidate == only.to).then_some(len - 4)
}

/// Decode a little-endian 32-bit displacement. Only values at or above
/// `0xF000_0000` are treated as negative.
pub fn relative_displacement(bytes: [u8; 4]) -> i64 {
    let raw = i64::from(u32::from_le_bytes(bytes));
    if raw >= 0xF000_0000 {
        raw - 0x1_0000_0000
    } else {
        raw
    }
}

fn push_hex(out: &mut String, bytes: &[u8]) {
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
}

/// Cut or pad `raw` to exactly [`SIGNATURE_LEN`] characters.
fn finish(mut raw: String) -> String {
    raw.truncate(SIGNATURE_LEN);
    while raw.len() < SIGNATURE_LEN {
        raw.push(FILLER);
    }
    raw
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature must be 64 characters, found {0}")]
    Length(usize),
    #[error("invalid signature group `{group}` at offset {offset}")]
    Group { group: String, offset: usize },
}

/// One two-character group of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigGroup {
    Byte(u8),
    Wildcard,
    Filler,
}

/// Parsed signature, used to compare stored signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePattern {
    groups: Vec<SigGroup>,
}

impl FromStr for SignaturePattern {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SIGNATURE_LEN || !s.is_ascii() {
            return Err(SignatureError::Length(s.chars().count()));
        }
        let mut groups = Vec::with_capacity(SIGNATURE_LEN / 2);
        for offset in (0..SIGNATURE_LEN).step_by(2) {
            let group = &s[offset..offset + 2];
            let parsed = match group {
                ".." => SigGroup::Wildcard,
                "--" => SigGroup::Filler,
                hex if hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) => {
                    SigGroup::Byte(u8::from_str_radix(hex, 16).map_err(|_| {
                        SignatureError::Group { group: group.to_string(), offset }
                    })?)
                }
                _ => return Err(SignatureError::Group { group: group.to_string(), offset }),
            };
            groups.push(parsed);
        }
        Ok(Self { groups })
    }
}

impl SignaturePattern {
    pub fn groups(&self) -> &[SigGroup] {
        &self.groups
    }

    /// Number of concrete byte groups.
    pub fn concrete_len(&self) -> usize {
        self.groups.iter().filter(|g| matches!(g, SigGroup::Byte(_))).count()
    }

    /// Compare two signatures position by position.
    ///
    /// Wildcards on either side are ignored and a filler on either side ends
    /// the comparison. Returns `None` when two concrete bytes differ, else the
    /// number of concrete bytes that agree.
    pub fn agreement(&self, other: &SignaturePattern) -> Option<usize> {
        let mut score = 0;
        for (a, b) in self.groups.iter().zip(&other.groups) {
            match (a, b) {
                (SigGroup::Filler, _) | (_, SigGroup::Filler) => break,
                (SigGroup::Wildcard, _) | (_, SigGroup::Wildcard) => {}
                (SigGroup::Byte(x), SigGroup::Byte(y)) if x == y => score += 1,
                (SigGroup::Byte(_), SigGroup::Byte(_)) => return None,
            }
        }
        Some(score)
    }
}
