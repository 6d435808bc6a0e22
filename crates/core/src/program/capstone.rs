use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use capstone::arch::x86::{X86OperandType, X86Reg};
use capstone::arch::ArchOperand;
use capstone::{arch, prelude::*, Capstone, InsnGroupId, InsnGroupType, RegId};
use goblin::{elf, Object};
use thiserror::Error;

use super::{
    BasicBlock, BlockEdge, EdgeKind, FunctionExtent, Instruction, ProgramView, Reference,
    ReferenceKind,
};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse object: {0}")]
    Object(#[from] goblin::error::Error),
    #[error("unsupported binary: {0}")]
    Unsupported(String),
    #[error("capstone error: {0}")]
    Capstone(String),
}

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Jump { target: Option<u64>, conditional: bool },
    Return,
}

#[derive(Debug, Clone)]
struct Decoded {
    insn: Instruction,
    refs: Vec<Reference>,
    flow: Flow,
}

/// An x86-64 ELF file disassembled up front with Capstone.
///
/// Every sized function symbol is decoded once; the [`ProgramView`] methods
/// then answer from the decoded table.
#[derive(Debug, Clone, Default)]
pub struct CapstoneProgram {
    functions: Vec<FunctionExtent>,
    decoded: BTreeMap<u64, Decoded>,
}

fn make_cs() -> Result<Capstone, ExtractError> {
    Capstone::new()
        .x86()
        .mode(arch::x86::ArchMode::Mode64)
        .detail(true)
        .build()
        .map_err(|e| ExtractError::Capstone(format!("capstone init failed: {e}")))
}

/// File range of `[addr, addr + size)` inside a section, clamped to the file.
fn section_range_to_file(
    addr: u64,
    size: u64,
    sec_addr: u64,
    sec_size: u64,
    sec_offset: u64,
    bytes_len: usize,
) -> Option<(usize, usize)> {
    if addr < sec_addr || addr >= sec_addr.saturating_add(sec_size) {
        return None;
    }
    let offset_in_section = addr - sec_addr;
    let start = sec_offset.saturating_add(offset_in_section);
    let available = sec_size - offset_in_section;
    let end = start.saturating_add(size.min(available)).min(bytes_len as u64);
    if end <= start {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

/// Sized function symbols defined in the file, keyed by entry address.
fn function_symbols(elf: &elf::Elf, bytes_len: usize) -> BTreeMap<u64, (String, (usize, usize))> {
    let mut out = BTreeMap::new();
    for sym in &elf.syms {
        if !sym.is_function()
            || sym.st_value == 0
            || sym.st_size == 0
            || sym.st_shndx == elf::section_header::SHN_UNDEF as usize
        {
            continue;
        }
        let name = elf.strtab.get_at(sym.st_name).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        let range = elf.section_headers.get(sym.st_shndx).and_then(|shdr| {
            section_range_to_file(
                sym.st_value,
                sym.st_size,
                shdr.sh_addr,
                shdr.sh_size,
                shdr.sh_offset,
                bytes_len,
            )
        });
        if let Some(range) = range {
            out.entry(sym.st_value).or_insert_with(|| (name.to_string(), range));
        }
    }
    out
}

fn has_group(detail: &capstone::InsnDetail, group: u8) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group))
}

/// References and control flow of one decoded instruction.
fn classify(
    detail: &capstone::InsnDetail,
    mnemonic: &str,
    address: u64,
    next: u64,
) -> (Vec<Reference>, Flow) {
    let is_call = has_group(detail, InsnGroupType::CS_GRP_CALL as u8);
    let is_jump = has_group(detail, InsnGroupType::CS_GRP_JUMP as u8);
    let is_ret = has_group(detail, InsnGroupType::CS_GRP_RET as u8);
    let conditional = is_jump && mnemonic != "jmp";

    let mut refs = Vec::new();
    let mut branch_target = None;
    for op in detail.arch_detail().operands() {
        let ArchOperand::X86Operand(op) = op else { continue };
        match op.op_type {
            X86OperandType::Imm(imm) if is_call || is_jump => {
                let to = imm as u64;
                branch_target = Some(to);
                let kind = if is_call {
                    ReferenceKind::Call { conditional: false }
                } else {
                    ReferenceKind::Jump { conditional }
                };
                refs.push(Reference { from: address, to, kind });
            }
            X86OperandType::Mem(mem) => {
                let base = mem.base();
                if base == RegId(X86Reg::X86_REG_RIP as u16) {
                    let to = next.wrapping_add(mem.disp() as u64);
                    let kind = ReferenceKind::Data { stack: false };
                    refs.push(Reference { from: address, to, kind });
                } else if base == RegId(X86Reg::X86_REG_RSP as u16)
                    || base == RegId(X86Reg::X86_REG_RBP as u16)
                {
                    let to = mem.disp() as u64;
                    let kind = ReferenceKind::Data { stack: true };
                    refs.push(Reference { from: address, to, kind });
                }
            }
            _ => {}
        }
    }

    let flow = if is_ret {
        Flow::Return
    } else if is_jump {
        Flow::Jump { target: branch_target, conditional }
    } else {
        Flow::Next
    };
    (refs, flow)
}

impl CapstoneProgram {
    /// Read and disassemble an ELF file.
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let bytes = fs::read(path)
            .map_err(|source| ExtractError::Io { path: path.to_path_buf(), source })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExtractError> {
        let elf = match Object::parse(bytes)? {
            Object::Elf(elf) => elf,
            _ => return Err(ExtractError::Unsupported("only ELF files are supported".into())),
        };
        if elf.header.e_machine != elf::header::EM_X86_64 {
            return Err(ExtractError::Unsupported(format!(
                "machine type {} is not x86-64",
                elf.header.e_machine
            )));
        }

        let cs = make_cs()?;
        let mut program = CapstoneProgram::default();

        for (entry, (name, (start, end))) in function_symbols(&elf, bytes.len()) {
            let insns = cs
                .disasm_all(&bytes[start..end], entry)
                .map_err(|e| ExtractError::Capstone(format!("disassembly of {name} failed: {e}")))?;
            for i in insns.iter() {
                let mnemonic = i.mnemonic().unwrap_or("");
                let text = format!("{} {}", mnemonic, i.op_str().unwrap_or("")).trim().to_string();
                let insn = Instruction::new(i.address(), i.bytes(), text);
                let (refs, flow) = match cs.insn_detail(i) {
                    Ok(detail) => classify(&detail, mnemonic, insn.address, insn.next_address()),
                    Err(_) => (Vec::new(), Flow::Next),
                };
                program.decoded.insert(insn.address, Decoded { insn, refs, flow });
            }
            program.functions.push(FunctionExtent {
                name,
                entry,
                end: entry + (end - start) as u64,
            });
        }

        Ok(program)
    }
}

impl ProgramView for CapstoneProgram {
    fn functions(&self) -> Vec<FunctionExtent> {
        self.functions.clone()
    }

    fn instructions_in_range(&self, start: u64, end: u64) -> Vec<Instruction> {
        if end <= start {
            return Vec::new();
        }
        self.decoded.range(start..end).map(|(_, d)| d.insn.clone()).collect()
    }

    fn basic_blocks(&self, function: &FunctionExtent) -> Vec<BasicBlock> {
        let body: Vec<&Decoded> = if function.end > function.entry {
            self.decoded.range(function.entry..function.end).map(|(_, d)| d).collect()
        } else {
            Vec::new()
        };
        let inside = |addr: u64| addr >= function.entry && addr < function.end;

        let mut leaders = BTreeSet::new();
        leaders.insert(function.entry);
        for d in &body {
            match d.flow {
                Flow::Jump { target, .. } => {
                    if let Some(t) = target.filter(|t| inside(*t)) {
                        leaders.insert(t);
                    }
                    leaders.insert(d.insn.next_address());
                }
                Flow::Return => {
                    leaders.insert(d.insn.next_address());
                }
                Flow::Next => {}
            }
        }

        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut current: Option<BasicBlock> = None;
        for d in body {
            if leaders.contains(&d.insn.address) {
                if let Some(mut open) = current.take() {
                    // Fell through into a leader.
                    open.successors
                        .push(BlockEdge { target: d.insn.address, kind: EdgeKind::Unconditional });
                    blocks.push(open);
                }
            }
            let block = current.get_or_insert_with(|| BasicBlock {
                index: blocks.len(),
                start: d.insn.address,
                instructions: Vec::new(),
                successors: Vec::new(),
            });
            block.instructions.push(d.insn.clone());

            match d.flow {
                Flow::Next => {}
                Flow::Return => {
                    if let Some(done) = current.take() {
                        blocks.push(done);
                    }
                }
                Flow::Jump { target, conditional } => {
                    if let Some(target) = target {
                        let kind =
                            if conditional { EdgeKind::Conditional } else { EdgeKind::Unconditional };
                        block.successors.push(BlockEdge { target, kind });
                    }
                    if conditional {
                        block.successors.push(BlockEdge {
                            target: d.insn.next_address(),
                            kind: EdgeKind::Unconditional,
                        });
                    }
                    if let Some(done) = current.take() {
                        blocks.push(done);
                    }
                }
            }
        }
        if let Some(open) = current {
            blocks.push(open);
        }
        blocks
    }

    fn references_from(&self, instruction: &Instruction) -> Vec<Reference> {
        self.decoded.get(&instruction.address).map(|d| d.refs.clone()).unwrap_or_default()
    }
}
