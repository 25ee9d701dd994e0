//! Instruction-stream walks shared by the builder and the resolver.

use crate::analysis::catalog::StringCatalog;
use crate::config::MatchConfig;
use crate::model::Direction;
use crate::services::image::ImageView;

fn step<I: ImageView + ?Sized>(image: &I, address: u64, direction: Direction) -> Option<u64> {
    match direction {
        Direction::Forward => image.next_instruction(address),
        Direction::Backward => image.previous_instruction(address),
    }
}

/// Bounds are exclusive in both directions.
fn within(address: u64, bound: u64, direction: Direction) -> bool {
    match direction {
        Direction::Forward => address < bound,
        Direction::Backward => address > bound,
    }
}

/// Walk away from a call site looking for the nearest string reference.
///
/// The walk ends at `bound`, at the first jump/branch mnemonic, or at the next call
/// instruction; that instruction is not inspected. Calls are recognised through the image
/// rather than by mnemonic, so `call`/`bl`/`jal` all end the walk.
pub fn find_string_near_call<I: ImageView + ?Sized>(
    image: &I,
    catalog: &StringCatalog,
    config: &MatchConfig,
    site: u64,
    bound: u64,
    direction: Direction,
) -> Option<u64> {
    let mut current = step(image, site, direction);
    while let Some(address) = current {
        if !within(address, bound, direction) {
            return None;
        }
        if image.is_call(address)
            || image.mnemonic(address).is_some_and(|m| config.is_stop_mnemonic(&m))
        {
            return None;
        }
        if let Some(x) = image.xrefs_from(address).into_iter().find(|x| catalog.is_string(x.to))
        {
            return Some(x.to);
        }
        current = step(image, address, direction);
    }
    None
}

/// First call instruction strictly between `from` and `bound`.
pub fn find_call<I: ImageView + ?Sized>(
    image: &I,
    from: u64,
    bound: u64,
    direction: Direction,
) -> Option<u64> {
    let mut current = step(image, from, direction);
    while let Some(address) = current {
        if !within(address, bound, direction) {
            return None;
        }
        if image.is_call(address) {
            return Some(address);
        }
        current = step(image, address, direction);
    }
    None
}

/// Destination of the call at `site`.
///
/// Some backends also report the fall-through address as a reference from the call;
/// references that stay inside the caller are skipped.
pub fn call_destination<I: ImageView + ?Sized>(image: &I, site: u64) -> Option<u64> {
    let own = image.function_containing(site).map(|f| f.start);
    image
        .xrefs_from(site)
        .into_iter()
        .find(|x| image.function_containing(x.to).map(|f| f.start) != own)
        .map(|x| x.to)
}
