use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use namecarry_core::analysis::{ResolutionReport, ResolveSession};
use namecarry_core::apply::{apply_names, ApplyReport};
use namecarry_core::store::load_dump;

use crate::commands::util::{hex, load_image};

/// Options for `resolve`.
#[derive(Debug, Clone)]
pub struct ResolveArgs {
    pub image: String,
    pub dump: String,
    pub backend: String,
    pub arch: Option<String>,
    pub json: bool,
    pub apply_out: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResolveOutput<'a> {
    report: &'a ResolutionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<&'a ApplyReport>,
}

/// Resolve a dump against the target image, optionally writing the renamed export.
pub fn resolve_command(args: &ResolveArgs) -> Result<()> {
    let dump_path = Path::new(&args.dump);
    let dump = load_dump(dump_path)
        .with_context(|| format!("Failed to load fingerprint dump {}", dump_path.display()))?;
    let mut image = load_image(&args.backend, &args.image, args.arch.as_deref())?;

    let report = ResolveSession::new(&image)
        .run(&dump.fingerprints)
        .with_context(|| format!("Failed to resolve fingerprints in {}", args.image))?;

    let applied = match &args.apply_out {
        Some(out) => {
            let outcome = apply_names(&report, &mut image);
            let out_path = Path::new(out);
            image
                .export()
                .write(out_path)
                .with_context(|| format!("Failed to write renamed image to {}", out_path.display()))?;
            Some(outcome)
        }
        None => None,
    };

    if args.json {
        let output = ResolveOutput { report: &report, applied: applied.as_ref() };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Resolved {} of {} functions:", report.resolved_count(), report.entries.len());
    for (name, address) in report.resolved() {
        println!("  {} {}", hex(address), name);
    }
    let unresolved: Vec<&str> = report.unresolved().collect();
    if !unresolved.is_empty() {
        println!("Unresolved:");
        for name in unresolved {
            println!("  {name}");
        }
    }
    if let (Some(outcome), Some(out)) = (&applied, &args.apply_out) {
        println!("Applied {} names to {}", outcome.applied.len(), out);
        for failed in &outcome.failed {
            println!("  failed {} at {}: {}", failed.name, hex(failed.address), failed.reason);
        }
    }

    Ok(())
}
