//! Narrow view over a disassembled program.
//!
//! The signature generator and the dump writer only need three things from a
//! disassembler: instructions in an address range, basic blocks of a function,
//! and the references leaving an instruction. [`ProgramView`] exposes exactly
//! that, so the rest of the crate can be driven by the bundled Capstone
//! extractor or by synthetic programs in tests.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{demangle, signature};

#[cfg(feature = "capstone-backend")]
pub mod capstone;

#[cfg(feature = "capstone-backend")]
pub use self::capstone::{CapstoneProgram, ExtractError};

/// A decoded machine instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: u64,
    /// Raw encoded bytes.
    pub bytes: Vec<u8>,
    /// Textual form (mnemonic and operands).
    pub text: String,
}

impl Instruction {
    pub fn new(address: u64, bytes: impl Into<Vec<u8>>, text: impl Into<String>) -> Self {
        Self { address, bytes: bytes.into(), text: text.into() }
    }

    /// Address of the byte following this instruction.
    pub fn next_address(&self) -> u64 {
        self.address.wrapping_add(self.bytes.len() as u64)
    }
}

/// Flow or data classification of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Call { conditional: bool },
    Jump { conditional: bool },
    /// Memory operand; `stack` is set for stack-relative accesses.
    Data { stack: bool },
}

/// Outgoing reference from an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub from: u64,
    pub to: u64,
    pub kind: ReferenceKind,
}

impl Reference {
    pub fn is_unconditional_call(&self) -> bool {
        matches!(self.kind, ReferenceKind::Call { conditional: false })
    }

    pub fn is_non_stack_data(&self) -> bool {
        matches!(self.kind, ReferenceKind::Data { stack: false })
    }
}

/// Address extent of a function body. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionExtent {
    /// Raw (mangled) label.
    pub name: String,
    pub entry: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    Unconditional,
    Conditional,
}

impl EdgeKind {
    /// Encoding used in dumps: `0` unconditional, `1` conditional.
    pub fn code(self) -> u8 {
        match self {
            EdgeKind::Unconditional => 0,
            EdgeKind::Conditional => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEdge {
    /// Start address of the successor block.
    pub target: u64,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Traversal-order index within the function.
    pub index: usize,
    pub start: u64,
    pub instructions: Vec<Instruction>,
    pub successors: Vec<BlockEdge>,
}

/// What the core needs from a disassembler.
pub trait ProgramView {
    /// Functions known to the disassembler, in address order.
    fn functions(&self) -> Vec<FunctionExtent>;

    /// Instructions whose start address lies in `[start, end)`, in address order.
    fn instructions_in_range(&self, start: u64, end: u64) -> Vec<Instruction>;

    /// Basic blocks of `function`, indexed by traversal order.
    fn basic_blocks(&self, function: &FunctionExtent) -> Vec<BasicBlock>;

    fn references_from(&self, instruction: &Instruction) -> Vec<Reference>;
}

/// Per-function entry of a binary dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDump {
    pub func_name: String,
    pub is_rust_func: bool,
    /// `(source block, destination block, kind code)`.
    #[serde(default)]
    pub edges: Vec<(usize, usize, u8)>,
    #[serde(default)]
    pub bbs: BTreeMap<usize, Vec<String>>,
    #[serde(default)]
    pub sig: String,
}

/// Binary dump keyed by hex entry address.
pub type ProgramDump = BTreeMap<String, FunctionDump>;

/// Whether a raw label uses a Rust mangling prefix, with or without the
/// platform's extra leading underscore.
pub fn is_rust_label(label: &str) -> bool {
    demangle::has_rust_prefix(label)
}

/// Key used for a function entry in a [`ProgramDump`].
pub fn entry_key(entry: u64) -> String {
    format!("{entry:08x}")
}

/// Render one function of `view` in dump form.
pub fn dump_function<V: ProgramView + ?Sized>(view: &V, function: &FunctionExtent) -> FunctionDump {
    let blocks = view.basic_blocks(function);
    let index_of: HashMap<u64, usize> = blocks.iter().map(|b| (b.start, b.index)).collect();

    let mut edges = Vec::new();
    for block in &blocks {
        for succ in &block.successors {
            // Edges leaving the function (tail calls) are dropped.
            if let Some(&dst) = index_of.get(&succ.target) {
                edges.push((block.index, dst, succ.kind.code()));
            }
        }
    }

    let bbs = blocks
        .iter()
        .map(|b| (b.index, b.instructions.iter().map(|i| i.text.clone()).collect()))
        .collect();

    let is_rust_func = is_rust_label(&function.name);
    let sig =
        if is_rust_func { signature::function_signature(view, function) } else { String::new() };

    FunctionDump { func_name: function.name.clone(), is_rust_func, edges, bbs, sig }
}

/// Render every function of `view` in dump form.
pub fn dump_program<V: ProgramView + ?Sized>(view: &V) -> ProgramDump {
    view.functions().iter().map(|f| (entry_key(f.entry), dump_function(view, f))).collect()
}
