use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use capstone::{arch, prelude::*, Capstone, InsnGroupId};
use goblin::{elf, Object};
use tracing::debug;

use crate::services::backends::export::{ExportedImage, ImageExport, InstructionRecord};
use crate::services::image::{FunctionInfo, ImageError, ImageLoader, XrefKind};

/// Shortest printable run that counts as a string literal.
const MIN_STRING_LEN: usize = 4;

/// Disassembles an ELF image with capstone and recovers functions, strings and references.
pub struct CapstoneLoader;

#[derive(Debug, Clone)]
struct SectionRange {
    name: String,
    start: u64,
    end: u64,
    file_offset: usize,
    executable: bool,
    has_data: bool,
}

impl SectionRange {
    fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    fn data<'b>(&self, bytes: &'b [u8]) -> &'b [u8] {
        let len = (self.end - self.start) as usize;
        let start = self.file_offset.min(bytes.len());
        let end = self.file_offset.saturating_add(len).min(bytes.len());
        &bytes[start..end]
    }
}

fn elf_arch(elf: &elf::Elf) -> Option<&'static str> {
    match elf.header.e_machine {
        elf::header::EM_X86_64 => Some("x86_64"),
        elf::header::EM_386 => Some("x86"),
        elf::header::EM_AARCH64 => Some("arm64"),
        elf::header::EM_ARM => Some("arm"),
        _ => None,
    }
}

fn make_cs(arch: &str) -> Result<Capstone, ImageError> {
    let cs = match arch {
        "x86_64" | "amd64" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        "x86" | "i386" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build()
        }
        "arm" | "armv7" => {
            Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build()
        }
        "arm64" | "aarch64" => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
        other => return Err(ImageError::Unsupported(format!("architecture {other}"))),
    };
    cs.map_err(|e| ImageError::Backend(format!("capstone init failed: {e}")))
}

/// Allocated sections keyed by section index. Relocatable objects have no load addresses, so
/// their sections are placed at their file offsets to keep addresses distinct.
fn elf_sections(elf: &elf::Elf) -> BTreeMap<usize, SectionRange> {
    let relocatable = elf.header.e_type == elf::header::ET_REL;
    elf.section_headers
        .iter()
        .enumerate()
        .filter(|(_, sh)| sh.is_alloc() && sh.sh_size > 0)
        .map(|(shndx, sh)| {
            let start = if relocatable && sh.sh_addr == 0 { sh.sh_offset } else { sh.sh_addr };
            let range = SectionRange {
                name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
                start,
                end: start.saturating_add(sh.sh_size),
                file_offset: sh.sh_offset as usize,
                executable: sh.is_executable(),
                has_data: sh.sh_type != elf::section_header::SHT_NOBITS,
            };
            (shndx, range)
        })
        .collect()
}

/// Function symbols with their ranges. Zero-sized symbols run up to the next symbol in the
/// same section, or to the section end.
fn elf_functions(elf: &elf::Elf, sections: &BTreeMap<usize, SectionRange>) -> Vec<FunctionInfo> {
    let relocatable = elf.header.e_type == elf::header::ET_REL;
    let mut raw: Vec<(String, u64, u64, usize)> = Vec::new();
    for sym in elf.syms.iter() {
        if !sym.is_function() || sym.st_shndx == elf::section_header::SHN_UNDEF as usize {
            continue;
        }
        let Some(section) = sections.get(&sym.st_shndx) else {
            continue;
        };
        let name = elf.strtab.get_at(sym.st_name).unwrap_or("").to_string();
        if name.is_empty() {
            continue;
        }
        let start = symbol_start(section, sym.st_value, relocatable);
        if !section.contains(start) {
            continue;
        }
        raw.push((name, start, sym.st_size, sym.st_shndx));
    }
    raw.sort_by_key(|(_, start, _, _)| *start);

    let mut seen = HashSet::new();
    let mut functions = Vec::new();
    for (idx, (name, start, size, shndx)) in raw.iter().enumerate() {
        if !seen.insert(*start) {
            continue;
        }
        let section_end = sections[shndx].end;
        let next = raw[idx + 1..]
            .iter()
            .find(|(_, s, _, n)| *n == *shndx && *s > *start)
            .map(|(_, s, _, _)| *s)
            .unwrap_or(section_end);
        let end = symbol_end(*start, *size, next);
        functions.push(FunctionInfo::new(name.clone(), *start, end));
    }
    functions
}

/// Relocatable objects store symbol values relative to their section.
fn symbol_start(section: &SectionRange, value: u64, relocatable: bool) -> u64 {
    if relocatable {
        section.start.saturating_add(value)
    } else {
        value
    }
}

fn symbol_end(start: u64, size: u64, next: u64) -> u64 {
    if size > 0 {
        start.saturating_add(size).min(next)
    } else {
        next
    }
}

/// NUL-terminated printable runs in `data`, addressed from `base`.
fn scan_strings(data: &[u8], base: u64) -> Vec<(u64, String)> {
    let mut out = Vec::new();
    let mut run_start: Option<usize> = None;
    for (idx, b) in data.iter().enumerate() {
        let printable = b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\n' | b'\r');
        match (printable, run_start) {
            (true, None) => run_start = Some(idx),
            (true, Some(_)) => {}
            (false, Some(start)) => {
                if *b == 0 && idx - start >= MIN_STRING_LEN {
                    let text = String::from_utf8_lossy(&data[start..idx]).into_owned();
                    out.push((base + start as u64, text));
                }
                run_start = None;
            }
            (false, None) => {}
        }
    }
    out
}

fn has_group(detail: &capstone::InsnDetail, group: u8) -> bool {
    detail.groups().iter().any(|g| *g == InsnGroupId(group))
}

fn decode_branch_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail.arch_detail().operands().iter().find_map(|op| match op {
        capstone::arch::ArchOperand::X86Operand(op) => {
            if let capstone::arch::x86::X86OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        _ => None,
    })
}

/// Addresses an instruction's operands point at: immediates and rip-relative memory.
fn operand_targets(cs: &Capstone, detail: &capstone::InsnDetail, next: u64) -> Vec<u64> {
    let mut out = Vec::new();
    for op in detail.arch_detail().operands() {
        match op {
            capstone::arch::ArchOperand::X86Operand(op) => match &op.op_type {
                capstone::arch::x86::X86OperandType::Imm(imm) => out.push(*imm as u64),
                capstone::arch::x86::X86OperandType::Mem(mem) => {
                    if cs.reg_name(mem.base()).as_deref() == Some("rip") {
                        out.push(next.wrapping_add(mem.disp() as u64));
                    }
                }
                _ => {}
            },
            capstone::arch::ArchOperand::ArmOperand(op) => {
                if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                    out.push(imm as u64);
                }
            }
            capstone::arch::ArchOperand::Arm64Operand(op) => {
                if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                    out.push(imm as u64);
                }
            }
            _ => {}
        }
    }
    out
}

impl CapstoneLoader {
    fn load_bytes(path: &Path) -> Result<Vec<u8>, ImageError> {
        if !path.is_file() {
            return Err(ImageError::MissingImage(path.to_path_buf()));
        }
        fs::read(path).map_err(|e| ImageError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Decode `bytes` into the export document the matcher works from.
    pub fn export_from_bytes(
        &self,
        name: &str,
        bytes: &[u8],
        arch_hint: Option<&str>,
    ) -> Result<ImageExport, ImageError> {
        let elf = match Object::parse(bytes) {
            Ok(Object::Elf(elf)) => elf,
            Ok(_) => return Err(ImageError::Unsupported("only ELF images are supported".into())),
            Err(e) => return Err(ImageError::Unsupported(format!("unparseable image: {e}"))),
        };
        let arch = match arch_hint.map(|h| h.to_lowercase()) {
            Some(hint) => hint,
            None => elf_arch(&elf)
                .ok_or_else(|| {
                    ImageError::Unsupported(format!("machine type {}", elf.header.e_machine))
                })?
                .to_string(),
        };
        let cs = make_cs(&arch)?;

        let sections = elf_sections(&elf);

        let mut export = ImageExport::new(name);
        export.arch = Some(arch.clone());
        export.functions = elf_functions(&elf, &sections);

        for section in sections.values().filter(|s| !s.executable && s.has_data) {
            for (address, text) in scan_strings(section.data(bytes), section.start) {
                export.string(address, text);
            }
        }
        let string_addresses: HashSet<u64> = export.strings.iter().map(|s| s.address).collect();
        let function_starts: HashSet<u64> = export.functions.iter().map(|f| f.start).collect();

        let mut decoded = HashSet::new();
        for section in sections.values().filter(|s| s.executable && s.has_data) {
            let code = section.data(bytes);
            let insns = cs
                .disasm_all(code, section.start)
                .map_err(|e| ImageError::Backend(format!("disassembly of {} failed: {e}", section.name)))?;
            for insn in insns.iter() {
                let address = insn.address();
                if !decoded.insert(address) {
                    continue;
                }
                let next = address + insn.bytes().len() as u64;
                let mnemonic = insn.mnemonic().unwrap_or("").to_string();
                let Ok(detail) = cs.insn_detail(insn) else {
                    export.instruction(address, mnemonic);
                    continue;
                };
                let is_call = has_group(&detail, capstone::InsnGroupType::CS_GRP_CALL as u8);
                let is_jump = has_group(&detail, capstone::InsnGroupType::CS_GRP_JUMP as u8);
                export.instructions.push(InstructionRecord { address, mnemonic, is_call });

                if is_call || is_jump {
                    if let Some(target) = decode_branch_target(&detail) {
                        let kind = if is_call { XrefKind::Call } else { XrefKind::Jump };
                        if !is_call || function_starts.contains(&target) {
                            export.xref(address, target, kind);
                        }
                    }
                    continue;
                }
                for target in operand_targets(&cs, &detail, next) {
                    if string_addresses.contains(&target) {
                        export.xref(address, target, XrefKind::Data);
                    }
                }
            }
        }

        debug!(
            image = name,
            arch = %arch,
            functions = export.functions.len(),
            strings = export.strings.len(),
            instructions = export.instructions.len(),
            "capstone decoded image"
        );
        Ok(export)
    }
}

impl ImageLoader for CapstoneLoader {
    fn load(&self, path: &Path, arch: Option<&str>) -> Result<ExportedImage, ImageError> {
        let bytes = Self::load_bytes(path)?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("image").to_string();
        let export = self.export_from_bytes(&name, &bytes, arch)?;
        ExportedImage::from_export(export)
    }

    fn name(&self) -> &'static str {
        "capstone"
    }

    fn description(&self) -> &'static str {
        "Built-in capstone disassembler over ELF symbols (x86, x86_64, arm, arm64)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_scan_requires_terminator_and_length() {
        let data = b"abc\0hello\0\x01world!\0tail";
        let found = scan_strings(data, 0x1000);
        assert_eq!(
            found,
            vec![(0x1004, "hello".to_string()), (0x100B, "world!".to_string())]
        );
    }

    #[test]
    fn oversized_symbols_saturate_instead_of_overflowing() {
        let section = SectionRange {
            name: ".text".into(),
            start: u64::MAX - 0x10,
            end: u64::MAX,
            file_offset: 0,
            executable: true,
            has_data: true,
        };
        assert_eq!(symbol_start(&section, u64::MAX, true), u64::MAX);
        assert_eq!(symbol_start(&section, 0x40, false), 0x40);

        assert_eq!(symbol_end(u64::MAX - 4, u64::MAX, u64::MAX), u64::MAX);
        assert_eq!(symbol_end(0x100, 0x20, 0x110), 0x110);
        assert_eq!(symbol_end(0x100, 0, 0x180), 0x180);
    }

    #[test]
    fn unknown_arch_is_unsupported() {
        assert!(matches!(make_cs("mips"), Err(ImageError::Unsupported(_))));
    }
}
