use std::collections::HashMap;

use crate::services::image::ImageView;

/// Index of every string literal in one image.
///
/// Reference counts are taken once at construction, so every query is a map lookup.
#[derive(Debug, Clone, Default)]
pub struct StringCatalog {
    by_address: HashMap<u64, String>,
    by_content: HashMap<String, Vec<u64>>,
    reference_counts: HashMap<u64, usize>,
}

impl StringCatalog {
    pub fn build<I: ImageView + ?Sized>(image: &I) -> Self {
        let mut catalog = Self::default();
        for literal in image.strings() {
            let refs = image.xrefs_to(literal.address).len();
            catalog.reference_counts.insert(literal.address, refs);
            catalog.by_content.entry(literal.content.clone()).or_default().push(literal.address);
            catalog.by_address.insert(literal.address, literal.content);
        }
        tracing::debug!(
            strings = catalog.by_address.len(),
            distinct = catalog.by_content.len(),
            "built string catalog"
        );
        catalog
    }

    /// Number of string records holding exactly `content`.
    pub fn count_of(&self, content: &str) -> usize {
        self.by_content.get(content).map_or(0, Vec::len)
    }

    /// Addresses holding `content`, in image enumeration order.
    pub fn addresses_of(&self, content: &str) -> &[u64] {
        self.by_content.get(content).map_or(&[], Vec::as_slice)
    }

    /// The single address holding `content`, if the text is not duplicated.
    pub fn sole_address(&self, content: &str) -> Option<u64> {
        match self.addresses_of(content) {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn is_string(&self, address: u64) -> bool {
        self.by_address.contains_key(&address)
    }

    pub fn text_at(&self, address: u64) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    pub fn reference_count(&self, address: u64) -> usize {
        self.reference_counts.get(&address).copied().unwrap_or(0)
    }

    /// Exactly one cross-reference and no other record with the same text.
    pub fn is_unique_reference(&self, address: u64) -> bool {
        match self.text_at(address) {
            Some(text) => self.reference_count(address) == 1 && self.count_of(text) == 1,
            None => false,
        }
    }

    /// The address of `content` when it is unique in this image.
    pub fn unique_address_of(&self, content: &str) -> Option<u64> {
        self.sole_address(content).filter(|address| self.reference_count(*address) == 1)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
