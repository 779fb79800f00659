//! Fixup tables keyed by body digest
//!
//! The body of a given agent release never changes with its configuration,
//! so its digest identifies the release. A table maps each known digest to
//! the fixups that neutralize that release's unsafe call sites.

use cage_artifact::{FixupEntry, Integrity};
use std::collections::HashMap;

/// Known agent releases and their fixups
///
/// # Type Parameters
/// - `H`: helper factory carried alongside each fixup set
#[derive(Debug, Clone)]
pub struct FixupTables<H> {
    entries: HashMap<Integrity, FixupEntry<H>>,
}

impl<H> Default for FixupTables<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> FixupTables<H> {
    /// Create empty tables
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a release (builder style)
    #[must_use]
    pub fn with(mut self, body: Integrity, entry: FixupEntry<H>) -> Self {
        self.entries.insert(body, entry);
        self
    }

    /// Register or replace a release
    pub fn insert(&mut self, body: Integrity, entry: FixupEntry<H>) -> Option<FixupEntry<H>> {
        self.entries.insert(body, entry)
    }

    /// Entry for a body digest
    #[must_use]
    pub fn get(&self, body: &Integrity) -> Option<&FixupEntry<H>> {
        self.entries.get(body)
    }

    /// Whether a body digest is known
    #[must_use]
    pub fn contains(&self, body: &Integrity) -> bool {
        self.entries.contains_key(body)
    }

    /// Number of known releases
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no release is known
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Known digests and entries, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&Integrity, &FixupEntry<H>)> {
        self.entries.iter()
    }
}
