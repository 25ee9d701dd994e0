//! Durable fingerprint dumps.
//!
//! A dump is an ordered list of fingerprints plus a little provenance. It can be written as
//! JSON, YAML, or a SQLite database; the format is picked from the file extension. Every
//! format keeps the order of fingerprints and of their evidence sequences.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::FunctionFingerprint;

pub mod sqlite;

pub use sqlite::FingerprintDb;

/// Oldest dump version this crate reads.
const MIN_SUPPORTED_DUMP_VERSION: u32 = 1;

/// Version written by this crate.
pub const CURRENT_DUMP_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access fingerprint store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode fingerprint store: {0}")]
    Encode(String),

    #[error("Corrupt fingerprint store: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error(
        "Unsupported store version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedVersion { found: u32, min_supported: u32, max_supported: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// On-disk encoding of a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Json,
    Yaml,
    Sqlite,
}

impl StoreFormat {
    /// `.yaml`/`.yml` and `.db`/`.sqlite`/`.sqlite3` are recognised; anything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("yaml") | Some("yml") => StoreFormat::Yaml,
            Some("db") | Some("sqlite") | Some("sqlite3") => StoreFormat::Sqlite,
            _ => StoreFormat::Json,
        }
    }
}

/// Where the fingerprints came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintDump {
    pub format_version: u32,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceImage>,
    pub fingerprints: Vec<FunctionFingerprint>,
}

impl FingerprintDump {
    pub fn new(fingerprints: Vec<FunctionFingerprint>) -> Self {
        Self {
            format_version: CURRENT_DUMP_VERSION,
            created_at: Utc::now().to_rfc3339(),
            source: None,
            fingerprints,
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, sha256: Option<String>) -> Self {
        self.source = Some(SourceImage { name: name.into(), sha256 });
        self
    }

    pub fn find(&self, name: &str) -> Option<&FunctionFingerprint> {
        self.fingerprints.iter().find(|f| f.name == name)
    }

    /// Structural checks run on every load.
    pub fn validate(&self) -> StoreResult<()> {
        if self.format_version < MIN_SUPPORTED_DUMP_VERSION
            || self.format_version > CURRENT_DUMP_VERSION
        {
            return Err(StoreError::UnsupportedVersion {
                found: self.format_version,
                min_supported: MIN_SUPPORTED_DUMP_VERSION,
                max_supported: CURRENT_DUMP_VERSION,
            });
        }

        let mut names = HashSet::new();
        for fp in &self.fingerprints {
            check_fingerprint(fp)?;
            if !names.insert(fp.name.as_str()) {
                return Err(StoreError::Corrupt(format!("duplicate fingerprint '{}'", fp.name)));
            }
            for callee in &fp.fallback_callees {
                check_fingerprint(callee)?;
                if !callee.fallback_callees.is_empty() {
                    return Err(StoreError::Corrupt(format!(
                        "callee '{}' of '{}' carries its own callees",
                        callee.name, fp.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_fingerprint(fp: &FunctionFingerprint) -> StoreResult<()> {
    if fp.name.trim().is_empty() {
        return Err(StoreError::Corrupt("fingerprint with empty name".into()));
    }
    if fp.range.end < fp.range.start {
        return Err(StoreError::Corrupt(format!(
            "fingerprint '{}' has inverted range 0x{:X}-0x{:X}",
            fp.name, fp.range.start, fp.range.end
        )));
    }
    Ok(())
}

/// Write `dump` to `path` in the format implied by its extension.
pub fn save_dump(path: &Path, dump: &FingerprintDump) -> StoreResult<()> {
    match StoreFormat::from_path(path) {
        StoreFormat::Sqlite => FingerprintDb::open(path)?.save(dump),
        StoreFormat::Json => {
            let body = serde_json::to_string_pretty(dump)
                .map_err(|e| StoreError::Encode(e.to_string()))?;
            write_file(path, body)
        }
        StoreFormat::Yaml => {
            let body = serde_yaml::to_string(dump).map_err(|e| StoreError::Encode(e.to_string()))?;
            write_file(path, body)
        }
    }
}

/// Read and validate a dump written by [`save_dump`].
pub fn load_dump(path: &Path) -> StoreResult<FingerprintDump> {
    let dump = match StoreFormat::from_path(path) {
        StoreFormat::Sqlite => {
            if !path.is_file() {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                });
            }
            FingerprintDb::open(path)?.load()?
        }
        StoreFormat::Json => serde_json::from_str(&read_file(path)?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        StoreFormat::Yaml => serde_yaml::from_str(&read_file(path)?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
    };
    dump.validate()?;
    Ok(dump)
}

fn read_file(path: &Path) -> StoreResult<String> {
    fs::read_to_string(path).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })
}

fn write_file(path: &Path, body: String) -> StoreResult<()> {
    fs::write(path, body).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })
}
