use std::collections::HashMap;

use tracing::debug;

use crate::analysis::catalog::StringCatalog;
use crate::analysis::scan::{call_destination, find_string_near_call};
use crate::analysis::MatchError;
use crate::config::MatchConfig;
use crate::model::{AddressRange, CallingString, Direction, FunctionFingerprint, InteriorString};
use crate::services::image::{FunctionInfo, ImageView};

/// Which form of fingerprint a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Built with the call-graph fallback allowed.
    Full,
    /// Built with fallback disabled; used as a callee of a full fingerprint.
    Shallow,
}

/// Finished fingerprints of one run, keyed by function name. Nothing is evicted.
#[derive(Debug, Clone, Default)]
pub struct FingerprintCache {
    full: HashMap<String, FunctionFingerprint>,
    shallow: HashMap<String, FunctionFingerprint>,
}

impl FingerprintCache {
    pub fn get(&self, depth: Depth, name: &str) -> Option<&FunctionFingerprint> {
        self.tier(depth).get(name)
    }

    pub fn insert(&mut self, depth: Depth, fingerprint: FunctionFingerprint) {
        let tier = match depth {
            Depth::Full => &mut self.full,
            Depth::Shallow => &mut self.shallow,
        };
        tier.insert(fingerprint.name.clone(), fingerprint);
    }

    pub fn len(&self, depth: Depth) -> usize {
        self.tier(depth).len()
    }

    fn tier(&self, depth: Depth) -> &HashMap<String, FunctionFingerprint> {
        match depth {
            Depth::Full => &self.full,
            Depth::Shallow => &self.shallow,
        }
    }
}

/// Gathers string and call-graph evidence for functions of one source image.
pub struct FingerprintBuilder<'a, I: ImageView + ?Sized> {
    image: &'a I,
    catalog: StringCatalog,
    config: &'a MatchConfig,
    cache: FingerprintCache,
}

impl<'a, I: ImageView + ?Sized> FingerprintBuilder<'a, I> {
    pub fn new(image: &'a I, config: &'a MatchConfig) -> Self {
        Self::with_catalog(image, StringCatalog::build(image), config)
    }

    pub fn with_catalog(image: &'a I, catalog: StringCatalog, config: &'a MatchConfig) -> Self {
        Self { image, catalog, config, cache: FingerprintCache::default() }
    }

    pub fn catalog(&self) -> &StringCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// Build (or fetch from the run cache) the fingerprint of `function`.
    ///
    /// With `allow_fallback`, a function whose string evidence stays under both thresholds
    /// also gets shallow fingerprints of the functions it calls.
    pub fn build(
        &mut self,
        function: &FunctionInfo,
        allow_fallback: bool,
    ) -> Result<FunctionFingerprint, MatchError> {
        let depth = if allow_fallback { Depth::Full } else { Depth::Shallow };
        if let Some(cached) = self.cache.get(depth, &function.name) {
            return Ok(cached.clone());
        }

        let mut fingerprint =
            FunctionFingerprint::new(&function.name, AddressRange::new(function.start, function.end));
        self.scan_interior(function, &mut fingerprint);
        self.scan_call_sites(function, &mut fingerprint)?;

        if allow_fallback && !self.has_enough(&fingerprint) {
            debug!(function = %fingerprint, "string evidence too weak, using called functions");
            fingerprint.fallback_callees = self.build_callees(function)?;
        }

        self.cache.insert(depth, fingerprint.clone());
        Ok(fingerprint)
    }

    fn has_enough(&self, fingerprint: &FunctionFingerprint) -> bool {
        fingerprint.unique_interior_count() >= self.config.max_unique_strings
            || fingerprint.unique_calling_count() >= self.config.max_unique_calling_strings
    }

    fn scan_interior(&self, function: &FunctionInfo, fingerprint: &mut FunctionFingerprint) {
        for address in self.image.instructions_in(function.start, function.end) {
            for x in self.image.xrefs_from(address) {
                if let Some(text) = self.catalog.text_at(x.to) {
                    fingerprint.interior_strings.push(InteriorString {
                        text: text.to_string(),
                        unique: self.catalog.is_unique_reference(x.to),
                    });
                }
            }
        }
    }

    fn scan_call_sites(
        &self,
        function: &FunctionInfo,
        fingerprint: &mut FunctionFingerprint,
    ) -> Result<(), MatchError> {
        for reference in self.image.xrefs_to(function.start) {
            let site = reference.from;
            if self.image.is_call(site) {
                let caller = self.image.code_function(site)?;
                let searches = [(Direction::Forward, caller.end), (Direction::Backward, caller.start)];
                for (direction, bound) in searches {
                    let found = find_string_near_call(
                        self.image,
                        &self.catalog,
                        self.config,
                        site,
                        bound,
                        direction,
                    );
                    if let Some(string_address) = found {
                        fingerprint.calling_strings.push(self.calling_string(string_address, direction));
                    }
                }
            }
            if self.has_enough(fingerprint) {
                break;
            }
        }
        Ok(())
    }

    fn calling_string(&self, string_address: u64, direction: Direction) -> CallingString {
        CallingString {
            text: self.catalog.text_at(string_address).unwrap_or_default().to_string(),
            unique: self.catalog.is_unique_reference(string_address),
            direction,
        }
    }

    fn build_callees(
        &mut self,
        function: &FunctionInfo,
    ) -> Result<Vec<FunctionFingerprint>, MatchError> {
        let mut callees: Vec<FunctionInfo> = Vec::new();
        for site in self.image.instructions_in(function.start, function.end) {
            if !self.image.is_call(site) {
                continue;
            }
            let Some(target) = call_destination(self.image, site) else {
                continue;
            };
            let Some(callee) = self.image.function_containing(target) else {
                debug!("call at 0x{site:X} targets no known function");
                continue;
            };
            if callees.iter().all(|c| c.start != callee.start) {
                callees.push(callee);
            }
        }

        if callees.len() > self.config.max_called_functions {
            debug!(
                function = %function.name,
                found = callees.len(),
                kept = self.config.max_called_functions,
                "capping called functions"
            );
            callees.truncate(self.config.max_called_functions);
        }

        let mut out = Vec::with_capacity(callees.len());
        for callee in &callees {
            out.push(self.build(callee, false)?);
        }
        Ok(out)
    }
}
