#![cfg(feature = "capstone-backend")]

use std::path::{Path, PathBuf};

use namecarry_core::services::backends::CapstoneLoader;
use namecarry_core::services::image::{default_loader_registry, ImageError, ImageLoader, ImageView, XrefKind};
use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

fn function_symbol(name: &str, value: u64, size: u64, section: object::write::SectionId) -> Symbol {
    Symbol {
        name: name.as_bytes().to_vec(),
        value,
        size,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(section),
        flags: SymbolFlags::Elf { st_info: 0x12, st_other: 0 },
    }
}

/// `caller` calls `callee` with a direct `call rel32`; `.rodata` holds one string.
fn write_fixture(dir: &Path) -> PathBuf {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text_id = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    let ro_id = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
    obj.section_mut(ro_id).append_data(b"hello world\x00", 1);

    // caller: call +3 (lands on callee at offset 8); ret; nop; nop
    // callee: ret
    let code: Vec<u8> = vec![0xE8, 0x03, 0x00, 0x00, 0x00, 0xC3, 0x90, 0x90, 0xC3];
    obj.section_mut(text_id).set_data(code, 16);

    obj.add_symbol(function_symbol("caller", 0, 8, text_id));
    obj.add_symbol(function_symbol("callee", 8, 1, text_id));

    let path = dir.join("fixture.o");
    std::fs::write(&path, obj.write().unwrap()).unwrap();
    path
}

#[test]
fn capstone_recovers_functions_calls_and_strings() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_fixture(temp.path());

    let image = CapstoneLoader.load(&path, None).expect("load elf");
    assert_eq!(image.arch(), Some("x86_64"));

    let functions = image.functions();
    let names: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["caller", "callee"]);
    let caller = &functions[0];
    let callee = &functions[1];
    assert_eq!(callee.start - caller.start, 8);
    assert_eq!(caller.end, callee.start);

    assert!(image.is_call(caller.start));
    assert_eq!(image.mnemonic(caller.start).as_deref(), Some("call"));
    assert_eq!(image.next_instruction(caller.start), Some(caller.start + 5));
    let calls: Vec<_> = image.xrefs_to(callee.start);
    assert!(calls.iter().any(|x| x.from == caller.start && x.kind == XrefKind::Call));

    let strings = image.strings();
    assert!(strings.iter().any(|s| s.content == "hello world"));
}

#[test]
fn registry_exposes_both_loaders() {
    let registry = default_loader_registry();
    assert_eq!(registry.names(), vec!["capstone".to_string(), "export".to_string()]);

    let temp = tempfile::tempdir().unwrap();
    let err = registry.load("ghidra", &temp.path().join("x"), None).unwrap_err();
    assert!(matches!(err, ImageError::MissingBackend(ref msg) if msg.contains("capstone")));
}

#[test]
fn non_elf_input_is_unsupported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("not_an_elf");
    std::fs::write(&path, b"plain text, not a binary").unwrap();
    assert!(matches!(CapstoneLoader.load(&path, None), Err(ImageError::Unsupported(_))));

    let missing = temp.path().join("missing.o");
    assert!(matches!(CapstoneLoader.load(&missing, None), Err(ImageError::MissingImage(_))));
}
