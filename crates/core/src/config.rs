use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_UNIQUE_STRINGS: usize = 2;
pub const DEFAULT_MAX_UNIQUE_CALLING_STRINGS: usize = 5;
pub const DEFAULT_MAX_CALLED_FUNCTIONS: usize = 10;

/// Heuristic thresholds and name filters for a build or resolve run.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Stop scanning call-sites once this many unique interior strings are known.
    pub max_unique_strings: usize,
    /// Stop scanning call-sites once this many unique calling strings are known.
    pub max_unique_calling_strings: usize,
    /// Upper bound on shallow callee fingerprints kept for the call-graph tier.
    pub max_called_functions: usize,
    /// Mnemonic prefixes (jumps, branches, calls) that end a calling-context scan.
    pub stop_prefixes: Vec<String>,
    /// Functions whose name starts with one of these are backend defaults and are skipped.
    pub ignored_prefixes: Vec<String>,
    /// Exact names that are skipped.
    pub ignored_names: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_unique_strings: DEFAULT_MAX_UNIQUE_STRINGS,
            max_unique_calling_strings: DEFAULT_MAX_UNIQUE_CALLING_STRINGS,
            max_called_functions: DEFAULT_MAX_CALLED_FUNCTIONS,
            stop_prefixes: vec!["j".into(), "b".into()],
            ignored_prefixes: vec!["sub_".into(), "nullsub_".into(), "def_".into()],
            ignored_names: vec!["start".into()],
        }
    }
}

impl MatchConfig {
    /// Load a config from JSON or YAML (by extension). `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read match config at {}", path.display()))?;
        let yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: MatchConfig = if yaml {
            serde_yaml::from_str(&body).context("Failed to parse match config YAML")?
        } else {
            serde_json::from_str(&body).context("Failed to parse match config JSON")?
        };
        Ok(config)
    }

    /// Whether a function name carries meaning worth transferring.
    pub fn is_custom_name(&self, name: &str) -> bool {
        if name.is_empty() || self.ignored_names.iter().any(|n| n == name) {
            return false;
        }
        !self.ignored_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Whether a mnemonic ends a calling-context scan.
    pub fn is_stop_mnemonic(&self, mnemonic: &str) -> bool {
        let mnemonic = mnemonic.trim().to_lowercase();
        !mnemonic.is_empty() && self.stop_prefixes.iter().any(|p| mnemonic.starts_with(p.as_str()))
    }
}
