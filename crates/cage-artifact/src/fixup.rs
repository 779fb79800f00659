//! Offset-addressed fixups for agent bodies
//!
//! A fixup is a pinned insertion that neutralizes one unsafe call site in one
//! specific body version. Fixups are NOT replacements: the text at each
//! offset is preserved and the fixup string lands immediately before it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Global name under which the loaded agent reaches its fixup helpers
pub const HELPERS_GLOBAL: &str = "pendoFixupHelpers";

static HELPER_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"pendoFixupHelpers\.([A-Za-z_$][A-Za-z0-9_$]*)").expect("static regex")
});

/// Sparse insertion list keyed by offset into the unmodified body
///
/// # Invariants
/// - Offsets refer to the untouched body text
/// - At most one insertion per offset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixupSet {
    insertions: BTreeMap<usize, String>,
}

impl FixupSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an insertion (builder style)
    #[inline]
    #[must_use]
    pub fn with(mut self, offset: usize, text: impl Into<String>) -> Self {
        self.insertions.insert(offset, text.into());
        self
    }

    /// Add or replace the insertion at `offset`
    pub fn insert(&mut self, offset: usize, text: impl Into<String>) -> Option<String> {
        self.insertions.insert(offset, text.into())
    }

    /// Number of insertions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.insertions.len()
    }

    /// Whether the set has no insertions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }

    /// Insertions in ascending offset order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.insertions.iter().map(|(o, t)| (*o, t.as_str()))
    }

    /// Highest offset in the set
    #[must_use]
    pub fn max_offset(&self) -> Option<usize> {
        self.insertions.keys().next_back().copied()
    }

    /// Helper names the inserted text calls into (`pendoFixupHelpers.<name>`)
    #[must_use]
    pub fn helper_references(&self) -> BTreeSet<String> {
        self.insertions
            .values()
            .flat_map(|text| HELPER_REFERENCE.captures_iter(text))
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Total number of bytes the insertions add
    #[must_use]
    pub fn added_len(&self) -> usize {
        self.insertions.values().map(String::len).sum()
    }
}

impl<S: Into<String>> FromIterator<(usize, S)> for FixupSet {
    fn from_iter<I: IntoIterator<Item = (usize, S)>>(iter: I) -> Self {
        Self {
            insertions: iter.into_iter().map(|(o, t)| (o, t.into())).collect(),
        }
    }
}

/// Apply a fixup set to a body
///
/// Offsets count UTF-16 code units, the unit the pinned tables were recorded
/// in. Every offset is checked before anything is inserted, so a failing set
/// leaves no partial result behind. An offset equal to the body length
/// appends.
///
/// # Errors
/// - [`FixupError::OutOfRange`] if an offset exceeds the body length
/// - [`FixupError::NotCharBoundary`] if an offset splits a surrogate pair
pub fn apply_fixups(source: &str, fixups: &FixupSet) -> Result<String, FixupError> {
    let positions = byte_positions(source, fixups)?;

    let mut out = String::with_capacity(source.len() + fixups.added_len());
    let mut cursor = 0;
    for (at, text) in positions {
        out.push_str(&source[cursor..at]);
        out.push_str(text);
        cursor = at;
    }
    out.push_str(&source[cursor..]);
    Ok(out)
}

/// Resolve each code-unit offset to its byte index in `source`
fn byte_positions<'a>(
    source: &str,
    fixups: &'a FixupSet,
) -> Result<Vec<(usize, &'a str)>, FixupError> {
    let len = source.encode_utf16().count();
    if let Some(offset) = fixups.max_offset().filter(|o| *o > len) {
        return Err(FixupError::OutOfRange { offset, len });
    }

    let mut chars = source.char_indices().peekable();
    let mut unit = 0;
    let mut positions = Vec::with_capacity(fixups.len());
    for (offset, text) in fixups.iter() {
        while unit < offset {
            match chars.next() {
                Some((_, c)) => unit += c.len_utf16(),
                None => break,
            }
        }
        if unit != offset {
            return Err(FixupError::NotCharBoundary { offset });
        }
        let at = chars.peek().map_or(source.len(), |(i, _)| *i);
        positions.push((at, text));
    }
    Ok(positions)
}

/// Errors specific to fixup application
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixupError {
    /// Offset beyond the end of the body
    #[error("fixup index {offset} exceeds length of source string ({len})")]
    OutOfRange { offset: usize, len: usize },

    /// Offset between the two halves of a surrogate pair
    #[error("fixup index {offset} splits a surrogate pair")]
    NotCharBoundary { offset: usize },
}

/// A fixup set paired with the factory for the helpers its text calls
///
/// # Type Parameters
/// - `H`: helper factory; the environment crate supplies a function pointer
#[derive(Debug, Clone)]
pub struct FixupEntry<H> {
    fixups: FixupSet,
    helpers: H,
}

impl<H> FixupEntry<H> {
    /// Create new entry
    #[inline]
    #[must_use]
    pub fn new(fixups: FixupSet, helpers: H) -> Self {
        Self { fixups, helpers }
    }

    /// Insertions
    #[inline]
    #[must_use]
    pub fn fixups(&self) -> &FixupSet {
        &self.fixups
    }

    /// Helper factory
    #[inline]
    #[must_use]
    pub fn helpers(&self) -> &H {
        &self.helpers
    }
}
