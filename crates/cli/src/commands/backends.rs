use anyhow::Result;
use serde::Serialize;

use namecarry_core::services::image::default_loader_registry;

#[derive(Debug, Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub description: String,
}

/// List image loaders known to this binary.
pub fn list_backends_command(json: bool) -> Result<()> {
    let registry = default_loader_registry();
    let mut entries: Vec<BackendInfo> = registry
        .iter()
        .map(|loader| BackendInfo {
            name: loader.name().to_string(),
            description: loader.description().to_string(),
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Backends: (none)");
        return Ok(());
    }

    println!("Backends:");
    for entry in entries {
        println!("- {}: {}", entry.name, entry.description);
    }

    Ok(())
}
