use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::backends::ExportedImage;

/// A function as the disassembly backend sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl FunctionInfo {
    pub fn new(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self { name: name.into(), start, end }
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }
}

/// A string literal and the address it lives at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringLiteral {
    pub address: u64,
    pub content: String,
}

/// Kind of cross-reference reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XrefKind {
    Call,
    Jump,
    Data,
}

/// Cross-reference edge `from -> to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xref {
    pub from: u64,
    pub to: u64,
    pub kind: XrefKind,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image not found at {0}")]
    MissingImage(PathBuf),
    #[error("Failed to read image {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("Unsupported image: {0}")]
    Unsupported(String),
    #[error("Inconsistent image data: {0}")]
    Inconsistent(String),
    #[error("No function contains code address 0x{0:X}")]
    MissingFunction(u64),
    #[error("Image backend not found: {0}")]
    MissingBackend(String),
    #[error("Image backend error: {0}")]
    Backend(String),
}

/// Read-only view of one disassembled image.
///
/// This is everything the matching engine needs from a disassembler. Lookups return owned
/// values so implementations are free to compute them lazily.
pub trait ImageView {
    /// All functions with their ranges, in ascending start order.
    fn functions(&self) -> Vec<FunctionInfo>;

    fn function_containing(&self, address: u64) -> Option<FunctionInfo>;

    fn strings(&self) -> Vec<StringLiteral>;

    fn string_at(&self, address: u64) -> Option<String>;

    fn xrefs_from(&self, address: u64) -> Vec<Xref>;

    fn xrefs_to(&self, address: u64) -> Vec<Xref>;

    /// Mnemonic of the instruction at `address`; `None` when no instruction starts there.
    fn mnemonic(&self, address: u64) -> Option<String>;

    fn is_call(&self, address: u64) -> bool;

    /// Address of the instruction following the one at `address`.
    fn next_instruction(&self, address: u64) -> Option<u64>;

    /// Address of the instruction preceding `address`.
    fn previous_instruction(&self, address: u64) -> Option<u64>;

    /// Instruction addresses in `[start, end)`.
    fn instructions_in(&self, start: u64, end: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut current = if self.mnemonic(start).is_some() {
            Some(start)
        } else {
            self.next_instruction(start)
        };
        while let Some(address) = current {
            if address >= end {
                break;
            }
            out.push(address);
            current = self.next_instruction(address);
        }
        out
    }

    fn is_instruction(&self, address: u64) -> bool {
        self.mnemonic(address).is_some()
    }

    /// Enclosing function of an address known to hold code.
    ///
    /// A missing function here means the backend contradicts itself, which aborts the run.
    fn code_function(&self, address: u64) -> Result<FunctionInfo, ImageError> {
        self.function_containing(address).ok_or(ImageError::MissingFunction(address))
    }
}

/// Something that can produce an [`ExportedImage`] from a file on disk.
pub trait ImageLoader: Send + Sync {
    fn load(&self, path: &Path, arch: Option<&str>) -> Result<ExportedImage, ImageError>;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
}

/// Registry for image loaders; callers select by name.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn ImageLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self { loaders: Vec::new() }
    }

    pub fn register<L: ImageLoader + 'static>(&mut self, loader: L) -> &mut Self {
        self.loaders.retain(|l| l.name() != loader.name());
        self.loaders.push(Box::new(loader));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageLoader> {
        self.loaders.iter().find(|l| l.name() == name).map(|l| &**l)
    }

    /// Load `path` with the named loader, or fail listing what is available.
    pub fn load(
        &self,
        name: &str,
        path: &Path,
        arch: Option<&str>,
    ) -> Result<ExportedImage, ImageError> {
        let loader = self.get(name).ok_or_else(|| {
            ImageError::MissingBackend(format!(
                "{name} (available: {})",
                self.names().join(", ")
            ))
        })?;
        loader.load(path, arch)
    }

    /// Sorted list of registered loader names for error messages/help.
    pub fn names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.loaders.iter().map(|l| l.name().to_string()).collect();
        keys.sort();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ImageLoader> {
        self.loaders.iter().map(|l| &**l)
    }
}

/// Registry populated with every loader compiled into this build.
pub fn default_loader_registry() -> LoaderRegistry {
    let mut registry = LoaderRegistry::new();
    registry.register(crate::services::backends::ExportLoader);
    #[cfg(feature = "capstone-backend")]
    {
        registry.register(crate::services::backends::CapstoneLoader);
    }
    registry
}
