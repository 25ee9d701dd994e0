use std::path::Path;

use anyhow::{Context, Result};

use crate::commands::util::load_image;

/// Load `binary` with a loader and write what it recovered as an image export.
pub fn export_image_command(
    binary: &str,
    backend: &str,
    arch: Option<&str>,
    out: &str,
) -> Result<()> {
    let image = load_image(backend, binary, arch)?;
    let out_path = Path::new(out);
    image
        .export()
        .write(out_path)
        .with_context(|| format!("Failed to write image export to {}", out_path.display()))?;

    let export = image.export();
    println!("Exported image:");
    println!("  Name: {}", export.name);
    if let Some(arch) = &export.arch {
        println!("  Arch: {arch}");
    }
    println!("  Functions: {}", export.functions.len());
    println!("  Strings: {}", export.strings.len());
    println!("  Instructions: {}", export.instructions.len());
    println!("  Xrefs: {}", export.xrefs.len());
    println!("  Out: {}", out_path.display());

    Ok(())
}
