#![cfg(feature = "capstone-backend")]

use funcmatch_core::program::{dump_program, entry_key, CapstoneProgram, ProgramView};
use funcmatch_core::signature::SIGNATURE_LEN;
use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

const HELPER: &str = "_ZN3app6helper17h0123456789abcdefE";
const CALLER: &str = "_ZN3app4main17h0123456789abcdefE";

/// Relocatable x86-64 ELF with a Rust helper at 0x10, a Rust caller at 0x20
/// and a plain C function at 0x30.
fn fixture_elf() -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);

    let mut code = vec![0x90u8; 0x10];
    code.push(0xc3); // helper: ret
    code.resize(0x20, 0x90);
    code.extend_from_slice(&[
        0x55, // push rbp
        0xe8, 0xea, 0xff, 0xff, 0xff, // call helper
        0x74, 0x01, // je +1
        0x90, // nop
        0x5d, // pop rbp
        0xc3, // ret
    ]);
    code.resize(0x30, 0x90);
    code.extend_from_slice(&[0x31, 0xc0, 0xc3]); // xor eax, eax; ret
    obj.section_mut(text).set_data(code, 16);

    for (name, value, size) in [(HELPER, 0x10, 1), (CALLER, 0x20, 0x0b), ("plain_c", 0x30, 3)] {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::Elf { st_info: 0x12, st_other: 0 },
        });
    }

    obj.write().expect("write elf")
}

fn open_fixture() -> CapstoneProgram {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("fixture_elf");
    std::fs::write(&path, fixture_elf()).expect("write fixture");
    CapstoneProgram::open(&path).expect("open elf")
}

#[test]
fn functions_come_from_sized_symbols() {
    let program = open_fixture();
    let functions = program.functions();
    let names: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec![HELPER, CALLER, "plain_c"]);
    assert_eq!(functions[1].entry, 0x20);
    assert_eq!(functions[1].end, 0x2b);
}

#[test]
fn caller_blocks_and_call_reference() {
    let program = open_fixture();
    let caller = program.functions().into_iter().find(|f| f.name == CALLER).expect("caller");

    let blocks = program.basic_blocks(&caller);
    let starts: Vec<u64> = blocks.iter().map(|b| b.start).collect();
    assert_eq!(starts, vec![0x20, 0x28, 0x29]);

    let call = &blocks[0].instructions[1];
    let refs = program.references_from(call);
    assert_eq!(refs.len(), 1);
    assert!(refs[0].is_unconditional_call());
    assert_eq!(refs[0].to, 0x10);
}

#[test]
fn dump_marks_rust_functions_and_wildcards_the_call() {
    let dump = dump_program(&open_fixture());
    assert_eq!(dump.len(), 3);

    let caller = dump.get(&entry_key(0x20)).expect("caller entry");
    assert!(caller.is_rust_func);
    assert_eq!(caller.sig, format!("55e8........7401905dc3{}", "-".repeat(SIGNATURE_LEN - 22)));
    let mut edges = caller.edges.clone();
    edges.sort();
    assert_eq!(edges, vec![(0, 1, 0), (0, 2, 1), (1, 2, 0)]);
    assert_eq!(caller.bbs.len(), 3);

    let plain = dump.get(&entry_key(0x30)).expect("plain entry");
    assert!(!plain.is_rust_func);
    assert!(plain.sig.is_empty());
}

#[test]
fn non_elf_input_is_rejected() {
    assert!(CapstoneProgram::from_bytes(b"definitely not an object file").is_err());
}
