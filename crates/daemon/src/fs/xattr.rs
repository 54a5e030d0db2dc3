//! Extended attribute store.
//!
//! A process-wide map from absolute path to a name → value map,
//! guarded by its own read/write lock. Entries follow their path
//! through rename and are dropped when the path is removed.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::error::{FsError, Result};

/// Path-keyed extended attributes.
#[derive(Debug, Default)]
pub struct XattrStore {
    entries: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl XattrStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        self.entries
            .read()
            .get(path)
            .and_then(|attrs| attrs.get(name))
            .cloned()
            .ok_or(FsError::NoData)
    }

    pub fn set(&self, path: &str, name: &str, value: &[u8]) {
        self.entries
            .write()
            .entry(path.to_string())
            .or_default()
            .insert(name.to_string(), value.to_vec());
    }

    /// Lexicographically sorted attribute names, starting at
    /// `position` and truncated to `size` names when `size` is
    /// nonzero.
    pub fn list(&self, path: &str, position: usize, size: usize) -> Vec<String> {
        let entries = self.entries.read();
        let Some(attrs) = entries.get(path) else {
            return Vec::new();
        };
        let names = attrs.keys().skip(position);
        if size == 0 {
            names.cloned().collect()
        } else {
            names.take(size).cloned().collect()
        }
    }

    pub fn remove(&self, path: &str, name: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let removed = entries
            .get_mut(path)
            .and_then(|attrs| attrs.remove(name))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(FsError::NoData)
        }
    }

    /// Drop every attribute attached to a removed path.
    pub fn remove_path(&self, path: &str) {
        self.entries.write().remove(path);
    }

    /// Re-key attributes when their path is renamed.
    pub fn rename_path(&self, old_path: &str, new_path: &str) {
        let mut entries = self.entries.write();
        if let Some(attrs) = entries.remove(old_path) {
            entries.insert(new_path.to_string(), attrs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_listing_with_window() {
        let store = XattrStore::new();
        store.set("p", "c", b"3");
        store.set("p", "a", b"1");
        store.set("p", "b", b"2");

        assert_eq!(store.list("p", 0, 0), vec!["a", "b", "c"]);
        assert_eq!(store.list("p", 1, 0), vec!["b", "c"]);
        assert_eq!(store.list("p", 1, 1), vec!["b"]);
        assert!(store.list("p", 3, 0).is_empty());
        assert!(store.list("q", 0, 0).is_empty());
    }

    #[test]
    fn test_set_replaces() {
        let store = XattrStore::new();
        store.set("p", "a", b"1");
        store.set("p", "a", b"2");
        assert_eq!(store.get("p", "a").unwrap(), b"2");
    }

    #[test]
    fn test_remove_and_missing() {
        let store = XattrStore::new();
        store.set("p", "a", b"1");

        store.remove("p", "a").unwrap();
        assert!(matches!(store.get("p", "a"), Err(FsError::NoData)));
        assert!(matches!(store.remove("p", "a"), Err(FsError::NoData)));
    }

    #[test]
    fn test_follows_rename_and_removal() {
        let store = XattrStore::new();
        store.set("old", "a", b"1");

        store.rename_path("old", "new");
        assert!(store.get("old", "a").is_err());
        assert_eq!(store.get("new", "a").unwrap(), b"1");

        store.remove_path("new");
        assert!(store.get("new", "a").is_err());
    }
}
