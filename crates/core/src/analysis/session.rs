use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::builder::FingerprintBuilder;
use crate::analysis::catalog::StringCatalog;
use crate::analysis::resolver::{FingerprintResolver, Tier};
use crate::analysis::MatchError;
use crate::config::MatchConfig;
use crate::model::FunctionFingerprint;
use crate::services::image::ImageView;

/// Shared flag that stops a session before its next function.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, completed: usize, total: usize) -> Result<(), MatchError> {
        if self.is_cancelled() {
            Err(MatchError::Cancelled { completed, total })
        } else {
            Ok(())
        }
    }
}

/// One build run over a source image. Owns the catalog and fingerprint caches.
pub struct BuildSession<'a, I: ImageView + ?Sized> {
    image: &'a I,
    config: &'a MatchConfig,
    builder: FingerprintBuilder<'a, I>,
    cancel: CancelToken,
}

impl<'a, I: ImageView + ?Sized> BuildSession<'a, I> {
    pub fn new(image: &'a I, config: &'a MatchConfig) -> Self {
        Self {
            image,
            config,
            builder: FingerprintBuilder::new(image, config),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fingerprint every function whose name is worth carrying, in image order.
    pub fn run(&mut self) -> Result<Vec<FunctionFingerprint>, MatchError> {
        let mut seen = HashSet::new();
        let mut functions = Vec::new();
        for function in self.image.functions() {
            if !self.config.is_custom_name(&function.name) {
                continue;
            }
            if !seen.insert(function.name.clone()) {
                warn!(name = %function.name, "skipping duplicate function name at 0x{:X}", function.start);
                continue;
            }
            functions.push(function);
        }

        let total = functions.len();
        info!(functions = total, strings = self.builder.catalog().len(), "building fingerprints");
        let mut out = Vec::with_capacity(total);
        for (idx, function) in functions.iter().enumerate() {
            self.cancel.check(idx, total)?;
            let fingerprint = self.builder.build(function, true)?;
            debug!("generated fingerprint {}", fingerprint.long_form());
            out.push(fingerprint);
        }
        info!(fingerprints = out.len(), "build finished");
        Ok(out)
    }
}

/// Outcome for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub name: String,
    pub address: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

/// Name → address mapping of a resolve run, in fingerprint order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub entries: Vec<ResolutionEntry>,
}

impl ResolutionReport {
    pub fn resolved(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().filter_map(|e| e.address.map(|a| (e.name.as_str(), a)))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(|e| e.address.is_none()).map(|e| e.name.as_str())
    }

    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.name == name).and_then(|e| e.address)
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved().count()
    }

    pub fn into_mapping(self) -> BTreeMap<String, Option<u64>> {
        self.entries.into_iter().map(|e| (e.name, e.address)).collect()
    }
}

/// One resolve run against a target image.
pub struct ResolveSession<'a, I: ImageView + ?Sized> {
    image: &'a I,
    catalog: StringCatalog,
    cancel: CancelToken,
}

impl<'a, I: ImageView + ?Sized> ResolveSession<'a, I> {
    pub fn new(image: &'a I) -> Self {
        Self { image, catalog: StringCatalog::build(image), cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn catalog(&self) -> &StringCatalog {
        &self.catalog
    }

    pub fn run(&self, fingerprints: &[FunctionFingerprint]) -> Result<ResolutionReport, MatchError> {
        let resolver = FingerprintResolver::new(self.image, &self.catalog);
        let total = fingerprints.len();
        info!(fingerprints = total, strings = self.catalog.len(), "resolving fingerprints");

        let mut report = ResolutionReport::default();
        for (idx, fingerprint) in fingerprints.iter().enumerate() {
            self.cancel.check(idx, total)?;
            let resolution = resolver.resolve(fingerprint)?;
            match resolution {
                Some(r) => debug!(name = %fingerprint.name, tier = ?r.tier, "resolved to 0x{:X}", r.address),
                None => debug!(name = %fingerprint.name, "could not resolve"),
            }
            report.entries.push(ResolutionEntry {
                name: fingerprint.name.clone(),
                address: resolution.map(|r| r.address),
                tier: resolution.map(|r| r.tier),
            });
        }
        info!(resolved = report.resolved_count(), total, "resolve finished");
        Ok(report)
    }
}
