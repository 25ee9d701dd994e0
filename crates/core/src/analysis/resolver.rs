use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::catalog::StringCatalog;
use crate::analysis::scan::{call_destination, find_call};
use crate::analysis::MatchError;
use crate::model::{Direction, FunctionFingerprint};
use crate::services::image::{FunctionInfo, ImageError, ImageView};

/// Strategy that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    InteriorString,
    CallingString,
    CallGraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub address: u64,
    pub tier: Tier,
}

/// Vote counter that remembers first-seen order for tie-breaks.
#[derive(Debug, Clone, Default)]
struct Tally {
    entries: Vec<(u64, usize)>,
}

impl Tally {
    fn add(&mut self, address: u64) {
        match self.entries.iter_mut().find(|(a, _)| *a == address) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((address, 1)),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, address: u64) -> bool {
        self.entries.iter().any(|(a, _)| *a == address)
    }

    /// Highest count; the earliest entry wins a tie.
    fn best(&self) -> Option<u64> {
        let mut best: Option<(u64, usize)> = None;
        for (address, count) in &self.entries {
            if best.map_or(true, |(_, c)| *count > c) {
                best = Some((*address, *count));
            }
        }
        best.map(|(address, _)| address)
    }
}

/// Looks for the address of a fingerprinted function in a target image.
pub struct FingerprintResolver<'a, I: ImageView + ?Sized> {
    image: &'a I,
    catalog: &'a StringCatalog,
}

impl<'a, I: ImageView + ?Sized> FingerprintResolver<'a, I> {
    pub fn new(image: &'a I, catalog: &'a StringCatalog) -> Self {
        Self { image, catalog }
    }

    /// Try interior strings, then calling strings, then the call graph.
    ///
    /// `Ok(None)` means no tier found anything; errors only come from an inconsistent image.
    pub fn resolve(
        &self,
        fingerprint: &FunctionFingerprint,
    ) -> Result<Option<Resolution>, MatchError> {
        if let Some(address) = self.by_interior_string(fingerprint)? {
            return Ok(Some(Resolution { address, tier: Tier::InteriorString }));
        }
        if let Some(address) = self.by_calling_string(fingerprint)? {
            return Ok(Some(Resolution { address, tier: Tier::CallingString }));
        }
        if let Some(address) = self.by_call_graph(fingerprint)? {
            return Ok(Some(Resolution { address, tier: Tier::CallGraph }));
        }
        Ok(None)
    }

    /// String tiers only; this is how fallback callees are located.
    pub fn resolve_by_strings(
        &self,
        fingerprint: &FunctionFingerprint,
    ) -> Result<Option<u64>, MatchError> {
        match self.by_interior_string(fingerprint)? {
            Some(address) => Ok(Some(address)),
            None => self.by_calling_string(fingerprint),
        }
    }

    /// Tier A: the first unique interior string that is also unique in the target.
    pub fn by_interior_string(
        &self,
        fingerprint: &FunctionFingerprint,
    ) -> Result<Option<u64>, MatchError> {
        for s in fingerprint.interior_strings.iter().filter(|s| s.unique) {
            let Some(reference) = self.sole_reference(&s.text) else {
                continue;
            };
            if let Some(function) = self.enclosing(reference)? {
                debug!(
                    name = %fingerprint.name,
                    string = %s.text,
                    "found by unique string at 0x{:X}",
                    function.start
                );
                return Ok(Some(function.start));
            }
        }
        Ok(None)
    }

    /// Tier B: walk from each unique calling string back to the call it sat next to.
    pub fn by_calling_string(
        &self,
        fingerprint: &FunctionFingerprint,
    ) -> Result<Option<u64>, MatchError> {
        let mut candidates = Tally::default();
        for s in fingerprint.calling_strings.iter().filter(|s| s.unique) {
            let Some(reference) = self.sole_reference(&s.text) else {
                continue;
            };
            let Some(caller) = self.enclosing(reference)? else {
                continue;
            };
            let direction = s.direction.inverted();
            let bound = match direction {
                Direction::Forward => caller.end,
                Direction::Backward => caller.start,
            };
            let Some(site) = find_call(self.image, reference, bound, direction) else {
                continue;
            };
            if let Some(candidate) = call_destination(self.image, site) {
                debug!(
                    name = %fingerprint.name,
                    string = %s.text,
                    "calling string points at 0x{candidate:X}"
                );
                candidates.add(candidate);
            }
        }

        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.best()),
            _ => Ok(self.confirm_by_interior(fingerprint, &candidates).or_else(|| candidates.best())),
        }
    }

    /// Pick the candidate whose body references one of the fingerprint's strings.
    fn confirm_by_interior(
        &self,
        fingerprint: &FunctionFingerprint,
        candidates: &Tally,
    ) -> Option<u64> {
        for s in &fingerprint.interior_strings {
            for string_address in self.catalog.addresses_of(&s.text) {
                for x in self.image.xrefs_to(*string_address) {
                    if let Some(function) = self.image.function_containing(x.from) {
                        if candidates.contains(function.start) {
                            return Some(function.start);
                        }
                    }
                }
            }
        }
        None
    }

    /// Tier C: the function that calls the most of the resolved callees.
    pub fn by_call_graph(
        &self,
        fingerprint: &FunctionFingerprint,
    ) -> Result<Option<u64>, MatchError> {
        let mut votes = Tally::default();
        for callee in &fingerprint.fallback_callees {
            let Some(callee_address) = self.resolve_by_strings(callee)? else {
                continue;
            };
            let mut callers: Vec<u64> = Vec::new();
            for x in self.image.xrefs_to(callee_address) {
                let Some(caller) = self.image.function_containing(x.from) else {
                    continue;
                };
                if !callers.contains(&caller.start) {
                    callers.push(caller.start);
                    votes.add(caller.start);
                }
            }
        }
        let best = votes.best();
        if let Some(address) = best {
            debug!(name = %fingerprint.name, "call graph vote picked 0x{address:X}");
        }
        Ok(best)
    }

    /// The instruction referencing `text`, when the text is unique in the target.
    fn sole_reference(&self, text: &str) -> Option<u64> {
        let string_address = self.catalog.unique_address_of(text)?;
        self.image.xrefs_to(string_address).first().map(|x| x.from)
    }

    /// Enclosing function; code outside every function is a backend inconsistency.
    fn enclosing(&self, address: u64) -> Result<Option<FunctionInfo>, MatchError> {
        match self.image.function_containing(address) {
            Some(function) => Ok(Some(function)),
            None if self.image.is_instruction(address) => {
                Err(ImageError::MissingFunction(address).into())
            }
            None => Ok(None),
        }
    }
}
