use std::path::Path;

use anyhow::{anyhow, Context, Result};

use namecarry_core::store::load_dump;

/// Print the stored fingerprints, or just one of them.
pub fn inspect_command(dump: &str, name: Option<&str>, json: bool) -> Result<()> {
    let path = Path::new(dump);
    let dump = load_dump(path)
        .with_context(|| format!("Failed to load fingerprint dump {}", path.display()))?;

    let selected: Vec<_> = match name {
        Some(name) => {
            let fp = dump
                .find(name)
                .ok_or_else(|| anyhow!("No fingerprint named {name} in {}", path.display()))?;
            vec![fp]
        }
        None => dump.fingerprints.iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&selected)?);
        return Ok(());
    }

    println!("Dump: {}", path.display());
    if let Some(source) = &dump.source {
        println!("  Source: {}", source.name);
        if let Some(sha) = &source.sha256 {
            println!("  SHA-256: {sha}");
        }
    }
    println!("  Created: {}", dump.created_at);
    println!("  Fingerprints: {}", dump.fingerprints.len());
    for fp in selected {
        print!("{}", fp.long_form());
    }

    Ok(())
}
