//! namecarry-core
//!
//! Carries function names from one build of a binary to another.
//!
//! A source image with meaningful names is fingerprinted by the strings each function uses
//! and the strings found next to its callers. Those fingerprints are then located in a
//! stripped or renamed target image, and the recovered names can be written back.
//!
//! All matching logic is generic over [`services::image::ImageView`] so it runs the same way
//! over a JSON/YAML image export or the built-in capstone ELF loader.

pub mod analysis;
pub mod apply;
pub mod config;
pub mod model;
pub mod services;
pub mod store;

pub use analysis::{build_fingerprints, resolve_fingerprints, MatchError, ResolutionReport};
pub use config::MatchConfig;
pub use model::FunctionFingerprint;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
