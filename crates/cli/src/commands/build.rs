use std::path::Path;

use anyhow::{Context, Result};

use namecarry_core::analysis::BuildSession;
use namecarry_core::store::{save_dump, FingerprintDump};

use crate::commands::util::{load_config, load_image};
use crate::sha256_file;

/// Options for `build`.
#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub image: String,
    pub backend: String,
    pub arch: Option<String>,
    pub config: Option<String>,
    pub out: String,
}

/// Fingerprint the source image and write the dump.
pub fn build_command(args: &BuildArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let image = load_image(&args.backend, &args.image, args.arch.as_deref())?;
    let fingerprints = BuildSession::new(&image, &config)
        .run()
        .with_context(|| format!("Failed to build fingerprints for {}", args.image))?;

    let image_path = Path::new(&args.image);
    let hash = sha256_file(image_path)?;
    let source_name = image_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(args.image.as_str())
        .to_string();
    let dump = FingerprintDump::new(fingerprints).with_source(source_name, Some(hash));

    let out = Path::new(&args.out);
    save_dump(out, &dump)
        .with_context(|| format!("Failed to write fingerprint dump to {}", out.display()))?;

    let with_fallback = dump.fingerprints.iter().filter(|f| !f.fallback_callees.is_empty()).count();
    println!("Built fingerprints:");
    println!("  Image: {}", args.image);
    println!("  Functions: {}", dump.fingerprints.len());
    println!("  With call-graph fallback: {with_fallback}");
    println!("  Dump: {}", out.display());

    Ok(())
}
