use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::apply::RenameTarget;
use crate::services::image::{
    FunctionInfo, ImageError, ImageLoader, ImageView, StringLiteral, Xref, XrefKind,
};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub address: u64,
    pub mnemonic: String,
    #[serde(default)]
    pub is_call: bool,
}

/// Serializable disassembly facts for one image.
///
/// Any disassembler can produce this document; [`ExportedImage`] indexes it for lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageExport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default)]
    pub functions: Vec<FunctionInfo>,
    #[serde(default)]
    pub strings: Vec<StringLiteral>,
    #[serde(default)]
    pub instructions: Vec<InstructionRecord>,
    #[serde(default)]
    pub xrefs: Vec<Xref>,
}

impl ImageExport {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn function(&mut self, name: impl Into<String>, start: u64, end: u64) -> &mut Self {
        self.functions.push(FunctionInfo::new(name, start, end));
        self
    }

    pub fn string(&mut self, address: u64, content: impl Into<String>) -> &mut Self {
        self.strings.push(StringLiteral { address, content: content.into() });
        self
    }

    pub fn instruction(&mut self, address: u64, mnemonic: impl Into<String>) -> &mut Self {
        self.instructions.push(InstructionRecord {
            address,
            mnemonic: mnemonic.into(),
            is_call: false,
        });
        self
    }

    /// A `jal` at `from` with a call xref to `to`.
    pub fn call(&mut self, from: u64, to: u64) -> &mut Self {
        self.instructions.push(InstructionRecord {
            address: from,
            mnemonic: "jal".into(),
            is_call: true,
        });
        self.xref(from, to, XrefKind::Call)
    }

    /// An `addiu` at `from` loading the string at `string_address`.
    pub fn string_ref(&mut self, from: u64, string_address: u64) -> &mut Self {
        self.instruction(from, "addiu");
        self.xref(from, string_address, XrefKind::Data)
    }

    pub fn xref(&mut self, from: u64, to: u64, kind: XrefKind) -> &mut Self {
        self.xrefs.push(Xref { from, to, kind });
        self
    }

    /// Parse an export from JSON or YAML, chosen by file extension.
    pub fn read(path: &Path) -> Result<Self, ImageError> {
        if !path.is_file() {
            return Err(ImageError::MissingImage(path.to_path_buf()));
        }
        let body = fs::read_to_string(path).map_err(|e| ImageError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let parsed = if is_yaml(path) {
            serde_yaml::from_str(&body).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&body).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| ImageError::Unreadable { path: path.to_path_buf(), message })
    }

    pub fn write(&self, path: &Path) -> Result<(), ImageError> {
        let body = if is_yaml(path) {
            serde_yaml::to_string(self).map_err(|e| e.to_string())
        } else {
            serde_json::to_string_pretty(self).map_err(|e| e.to_string())
        };
        let body = body.map_err(|e| ImageError::Backend(format!("failed to encode export: {e}")))?;
        fs::write(path, body).map_err(|e| ImageError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref(),
        Some("yaml") | Some("yml")
    )
}

/// Indexed, in-memory image backed by an [`ImageExport`].
#[derive(Debug, Clone)]
pub struct ExportedImage {
    export: ImageExport,
    functions: BTreeMap<u64, usize>,
    strings: HashMap<u64, usize>,
    instructions: BTreeMap<u64, usize>,
    xrefs_from: HashMap<u64, Vec<usize>>,
    xrefs_to: HashMap<u64, Vec<usize>>,
}

impl ExportedImage {
    /// Index an export, rejecting overlapping functions and duplicated addresses.
    pub fn from_export(export: ImageExport) -> Result<Self, ImageError> {
        let mut functions = BTreeMap::new();
        for (idx, f) in export.functions.iter().enumerate() {
            if f.end <= f.start {
                return Err(ImageError::Inconsistent(format!(
                    "function {} has empty range 0x{:X}-0x{:X}",
                    f.name, f.start, f.end
                )));
            }
            if functions.insert(f.start, idx).is_some() {
                return Err(ImageError::Inconsistent(format!(
                    "two functions start at 0x{:X}",
                    f.start
                )));
            }
        }
        let mut previous: Option<&FunctionInfo> = None;
        for idx in functions.values() {
            let f = &export.functions[*idx];
            if let Some(prev) = previous {
                if f.start < prev.end {
                    return Err(ImageError::Inconsistent(format!(
                        "functions {} and {} overlap",
                        prev.name, f.name
                    )));
                }
            }
            previous = Some(f);
        }

        let mut strings = HashMap::new();
        for (idx, s) in export.strings.iter().enumerate() {
            if strings.insert(s.address, idx).is_some() {
                return Err(ImageError::Inconsistent(format!(
                    "two strings at 0x{:X}",
                    s.address
                )));
            }
        }

        let mut instructions = BTreeMap::new();
        for (idx, insn) in export.instructions.iter().enumerate() {
            if instructions.insert(insn.address, idx).is_some() {
                return Err(ImageError::Inconsistent(format!(
                    "two instructions at 0x{:X}",
                    insn.address
                )));
            }
        }

        let mut xrefs_from: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut xrefs_to: HashMap<u64, Vec<usize>> = HashMap::new();
        for (idx, x) in export.xrefs.iter().enumerate() {
            xrefs_from.entry(x.from).or_default().push(idx);
            xrefs_to.entry(x.to).or_default().push(idx);
        }

        Ok(Self { export, functions, strings, instructions, xrefs_from, xrefs_to })
    }

    pub fn load(path: &Path) -> Result<Self, ImageError> {
        Self::from_export(ImageExport::read(path)?)
    }

    pub fn name(&self) -> &str {
        &self.export.name
    }

    pub fn arch(&self) -> Option<&str> {
        self.export.arch.as_deref()
    }

    pub fn export(&self) -> &ImageExport {
        &self.export
    }

    pub fn into_export(self) -> ImageExport {
        self.export
    }

    fn instruction(&self, address: u64) -> Option<&InstructionRecord> {
        self.instructions.get(&address).map(|idx| &self.export.instructions[*idx])
    }
}

impl ImageView for ExportedImage {
    fn functions(&self) -> Vec<FunctionInfo> {
        self.functions.values().map(|idx| self.export.functions[*idx].clone()).collect()
    }

    fn function_containing(&self, address: u64) -> Option<FunctionInfo> {
        let (_, idx) = self.functions.range(..=address).next_back()?;
        let f = &self.export.functions[*idx];
        f.contains(address).then(|| f.clone())
    }

    fn strings(&self) -> Vec<StringLiteral> {
        self.export.strings.clone()
    }

    fn string_at(&self, address: u64) -> Option<String> {
        self.strings.get(&address).map(|idx| self.export.strings[*idx].content.clone())
    }

    fn xrefs_from(&self, address: u64) -> Vec<Xref> {
        self.xrefs_from
            .get(&address)
            .map(|ids| ids.iter().map(|idx| self.export.xrefs[*idx]).collect())
            .unwrap_or_default()
    }

    fn xrefs_to(&self, address: u64) -> Vec<Xref> {
        self.xrefs_to
            .get(&address)
            .map(|ids| ids.iter().map(|idx| self.export.xrefs[*idx]).collect())
            .unwrap_or_default()
    }

    fn mnemonic(&self, address: u64) -> Option<String> {
        self.instruction(address).map(|insn| insn.mnemonic.clone())
    }

    fn is_call(&self, address: u64) -> bool {
        self.instruction(address).is_some_and(|insn| insn.is_call)
    }

    fn next_instruction(&self, address: u64) -> Option<u64> {
        self.instructions.range(address.checked_add(1)?..).next().map(|(addr, _)| *addr)
    }

    fn previous_instruction(&self, address: u64) -> Option<u64> {
        self.instructions.range(..address).next_back().map(|(addr, _)| *addr)
    }
}

impl RenameTarget for ExportedImage {
    fn rename_function(&mut self, address: u64, name: &str) -> Result<(), ImageError> {
        let idx = self.functions.get(&address).copied().ok_or_else(|| {
            ImageError::Inconsistent(format!("no function starts at 0x{address:X}"))
        })?;
        self.export.functions[idx].name = name.to_string();
        Ok(())
    }
}

/// Loads JSON/YAML image exports written by any disassembler.
pub struct ExportLoader;

impl ImageLoader for ExportLoader {
    fn load(&self, path: &Path, _arch: Option<&str>) -> Result<ExportedImage, ImageError> {
        ExportedImage::load(path)
    }

    fn name(&self) -> &'static str {
        "export"
    }

    fn description(&self) -> &'static str {
        "JSON/YAML image export (functions, strings, instructions, xrefs)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageExport {
        let mut export = ImageExport::new("sample");
        export
            .function("a", 0x100, 0x110)
            .function("b", 0x110, 0x120)
            .instruction(0x100, "addiu")
            .call(0x104, 0x110)
            .instruction(0x110, "jr")
            .string(0x900, "hello")
            .string_ref(0x108, 0x900);
        export
    }

    #[test]
    fn containment_and_stepping_follow_addresses() {
        let image = ExportedImage::from_export(sample()).unwrap();
        assert_eq!(image.function_containing(0x10C).unwrap().name, "a");
        assert_eq!(image.function_containing(0x110).unwrap().name, "b");
        assert!(image.function_containing(0x120).is_none());
        assert_eq!(image.next_instruction(0x104), Some(0x108));
        assert_eq!(image.previous_instruction(0x104), Some(0x100));
        assert_eq!(image.instructions_in(0x100, 0x110), vec![0x100, 0x104, 0x108]);
        assert!(image.is_call(0x104));
        assert_eq!(image.xrefs_to(0x900).len(), 1);
        assert_eq!(image.string_at(0x900).as_deref(), Some("hello"));
    }

    #[test]
    fn overlapping_functions_are_rejected() {
        let mut export = sample();
        export.function("c", 0x118, 0x130);
        let err = ExportedImage::from_export(export).unwrap_err();
        assert!(matches!(err, ImageError::Inconsistent(_)), "unexpected: {err}");
    }

    #[test]
    fn rename_requires_function_start() {
        let mut image = ExportedImage::from_export(sample()).unwrap();
        image.rename_function(0x110, "renamed").unwrap();
        assert_eq!(image.function_containing(0x110).unwrap().name, "renamed");
        assert!(image.rename_function(0x114, "nope").is_err());
    }

    #[test]
    fn yaml_and_json_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["image.json", "image.yaml"] {
            let path = dir.path().join(file);
            sample().write(&path).unwrap();
            assert_eq!(ImageExport::read(&path).unwrap(), sample());
        }
    }
}
