use std::path::Path;

use anyhow::{Context, Result};

use namecarry_core::config::MatchConfig;
use namecarry_core::services::backends::ExportedImage;
use namecarry_core::services::image::default_loader_registry;

/// Load an image through the named loader.
pub fn load_image(backend: &str, path: &str, arch: Option<&str>) -> Result<ExportedImage> {
    let registry = default_loader_registry();
    registry
        .load(backend, Path::new(path), arch)
        .with_context(|| format!("Failed to load image {path} with the {backend} loader"))
}

/// Read the match config, or the defaults when no path is given.
pub fn load_config(path: Option<&str>) -> Result<MatchConfig> {
    MatchConfig::load(path.map(Path::new))
}

/// `0x`-prefixed upper-case hex, the way addresses are printed everywhere.
pub fn hex(address: u64) -> String {
    format!("0x{address:08X}")
}
