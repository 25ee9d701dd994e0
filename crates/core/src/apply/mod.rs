//! Writing resolved names back into a target image.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::ResolutionReport;
use crate::services::image::ImageError;

/// Anything that can rename the function starting at an address.
pub trait RenameTarget {
    fn rename_function(&mut self, address: u64, name: &str) -> Result<(), ImageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedName {
    pub name: String,
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedName {
    pub name: String,
    pub address: u64,
    pub reason: String,
}

/// What happened to each entry of a resolution report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<AppliedName>,
    pub skipped_unresolved: Vec<String>,
    pub failed: Vec<FailedName>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Rename every resolved function in `target`.
///
/// Unresolved entries are skipped. When two names resolve to the same address the first one
/// keeps it and the later one is reported as failed.
pub fn apply_names<T: RenameTarget + ?Sized>(
    report: &ResolutionReport,
    target: &mut T,
) -> ApplyReport {
    let mut out = ApplyReport::default();
    let mut claimed: HashMap<u64, &str> = HashMap::new();

    for entry in &report.entries {
        let Some(address) = entry.address else {
            out.skipped_unresolved.push(entry.name.clone());
            continue;
        };
        if let Some(owner) = claimed.get(&address) {
            warn!(name = %entry.name, "0x{address:X} already renamed to {owner}");
            out.failed.push(FailedName {
                name: entry.name.clone(),
                address,
                reason: format!("address already claimed by {owner}"),
            });
            continue;
        }
        match target.rename_function(address, &entry.name) {
            Ok(()) => {
                claimed.insert(address, entry.name.as_str());
                out.applied.push(AppliedName { name: entry.name.clone(), address });
            }
            Err(e) => {
                warn!(name = %entry.name, "rename at 0x{address:X} failed: {e}");
                out.failed.push(FailedName { name: entry.name.clone(), address, reason: e.to_string() });
            }
        }
    }

    info!(
        applied = out.applied.len(),
        skipped = out.skipped_unresolved.len(),
        failed = out.failed.len(),
        "applied names"
    );
    out
}
