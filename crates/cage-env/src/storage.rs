//! Virtual key-value storage
//!
//! The agent believes it is using cookies, `localStorage` and
//! `sessionStorage`. All three land here instead, in memory, per sandbox.

use crate::env::SandboxEnv;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which storage the agent thinks it is using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Cookie,
    Local,
    Session,
}

/// In-memory stand-in for every storage area
#[derive(Debug, Clone)]
pub struct VirtualStore {
    areas: HashMap<StorageArea, HashMap<String, String>>,
}

impl Default for VirtualStore {
    /// Local storage starts with agent logging enabled
    fn default() -> Self {
        let mut store = Self {
            areas: HashMap::new(),
        };
        store.set(StorageArea::Local, "log-enabled", "true");
        store
    }
}

impl VirtualStore {
    /// Create store with the default seed
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a key
    #[must_use]
    pub fn get(&self, area: StorageArea, key: &str) -> Option<&str> {
        self.areas.get(&area)?.get(key).map(String::as_str)
    }

    /// Write a key
    pub fn set(&mut self, area: StorageArea, key: impl Into<String>, value: impl Into<String>) {
        self.areas
            .entry(area)
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Delete a key
    pub fn remove(&mut self, area: StorageArea, key: &str) -> Option<String> {
        self.areas.get_mut(&area)?.remove(key)
    }

    /// Number of keys in an area
    #[must_use]
    pub fn len(&self, area: StorageArea) -> usize {
        self.areas.get(&area).map_or(0, HashMap::len)
    }
}

/// `getItem` / `setItem` / `removeItem` over one area of the sandbox's store
#[derive(Clone)]
pub struct StorageFacade {
    env: Arc<SandboxEnv>,
    area: StorageArea,
}

impl fmt::Debug for StorageFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageFacade")
            .field("area", &self.area)
            .finish_non_exhaustive()
    }
}

impl StorageFacade {
    /// Facade over `area`
    #[must_use]
    pub fn new(env: Arc<SandboxEnv>, area: StorageArea) -> Self {
        Self { env, area }
    }

    /// Area this facade writes to
    #[inline]
    #[must_use]
    pub fn area(&self) -> StorageArea {
        self.area
    }

    /// `getItem`
    #[must_use]
    pub fn get_item(&self, key: &str) -> Option<String> {
        self.env.storage_get(self.area, key)
    }

    /// `setItem`
    pub fn set_item(&self, key: &str, value: &str) {
        tracing::debug!("{:?} storage set {}", self.area, key);
        self.env.storage_set(self.area, key, value);
    }

    /// `removeItem`
    pub fn remove_item(&self, key: &str) {
        self.env.storage_remove(self.area, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_with_logging_flag() {
        let store = VirtualStore::new();
        assert_eq!(store.get(StorageArea::Local, "log-enabled"), Some("true"));
        assert_eq!(store.get(StorageArea::Session, "log-enabled"), None);
    }

    #[test]
    fn areas_are_separate() {
        let mut store = VirtualStore::new();
        store.set(StorageArea::Cookie, "id", "1");
        store.set(StorageArea::Session, "id", "2");
        assert_eq!(store.get(StorageArea::Cookie, "id"), Some("1"));
        assert_eq!(store.remove(StorageArea::Session, "id"), Some("2".to_string()));
        assert_eq!(store.len(StorageArea::Session), 0);
    }
}
