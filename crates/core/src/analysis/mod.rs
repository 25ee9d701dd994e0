//! Fingerprint building and resolution.
//!
//! The build phase walks a source image and records, per named function, the strings it
//! references, the strings next to its call sites, and (when those are weak) shallow
//! fingerprints of its callees. The resolve phase looks for the same evidence in a target
//! image in three tiers: unique interior strings, unique calling strings, then a majority
//! vote over the callers of resolved callees.

use thiserror::Error;

use crate::config::MatchConfig;
use crate::model::FunctionFingerprint;
use crate::services::image::{ImageError, ImageView};

pub mod builder;
pub mod catalog;
pub mod resolver;
pub mod scan;
pub mod session;

pub use builder::{Depth, FingerprintBuilder, FingerprintCache};
pub use catalog::StringCatalog;
pub use resolver::{FingerprintResolver, Resolution, Tier};
pub use session::{BuildSession, CancelToken, ResolutionEntry, ResolutionReport, ResolveSession};

/// Errors that abort a whole build or resolve run.
///
/// A fingerprint that simply cannot be found is not an error; it shows up as an unresolved
/// entry in the [`ResolutionReport`].
#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Backend(#[from] ImageError),
    #[error("Run cancelled after {completed} of {total} functions")]
    Cancelled { completed: usize, total: usize },
}

/// Fingerprint every custom-named function of `image`.
pub fn build_fingerprints<I: ImageView + ?Sized>(
    image: &I,
    config: &MatchConfig,
) -> Result<Vec<FunctionFingerprint>, MatchError> {
    BuildSession::new(image, config).run()
}

/// Locate each fingerprint in `image`.
pub fn resolve_fingerprints<I: ImageView + ?Sized>(
    image: &I,
    fingerprints: &[FunctionFingerprint],
) -> Result<ResolutionReport, MatchError> {
    ResolveSession::new(image).run(fingerprints)
}
