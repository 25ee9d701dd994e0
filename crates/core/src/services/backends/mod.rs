#[cfg(feature = "capstone-backend")]
pub mod capstone;
pub mod export;

#[cfg(feature = "capstone-backend")]
pub use capstone::CapstoneLoader;
pub use export::{ExportLoader, ExportedImage, ImageExport, InstructionRecord};
