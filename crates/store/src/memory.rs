//! In-memory store.
//!
//! A flat name → object map with the same delimiter and marker
//! semantics as the remote container. This is the test seam for the
//! filesystem layer: integration tests seed it with objects and drive
//! the full node/handle protocol against it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::{BackingStore, EntryKind, StoreEntry, StoreStat};

#[derive(Debug, Clone)]
struct MemObject {
    data: Vec<u8>,
    dir_marker: bool,
    mtime: SystemTime,
}

/// Backing store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, MemObject>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail with a transient error. Lets tests
    /// exercise the dispatcher's undo paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Names of all stored objects, in order.
    pub fn object_names(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    fn key(name: &str) -> String {
        name.trim_end_matches('/').to_string()
    }
}

#[async_trait::async_trait]
impl BackingStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>> {
        let objects = self.objects.lock();
        let mut entries: BTreeMap<String, StoreEntry> = BTreeMap::new();

        for (name, object) in objects.range(prefix.to_string()..) {
            let Some(rest) = name.strip_prefix(prefix) else {
                break;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                // A deeper key induces a directory entry for its first
                // segment, exactly like a delimiter listing.
                Some((head, _)) => {
                    entries
                        .entry(head.to_string())
                        .and_modify(|e| e.kind = EntryKind::Dir)
                        .or_insert_with(|| StoreEntry {
                            name: head.to_string(),
                            size: 0,
                            mtime: SystemTime::now(),
                            kind: EntryKind::Dir,
                        });
                }
                None => {
                    let kind = if object.dir_marker {
                        EntryKind::Dir
                    } else {
                        EntryKind::File
                    };
                    entries
                        .entry(rest.to_string())
                        .and_modify(|e| {
                            if kind == EntryKind::Dir {
                                e.kind = EntryKind::Dir;
                            }
                        })
                        .or_insert_with(|| StoreEntry {
                            name: rest.to_string(),
                            size: object.data.len() as u64,
                            mtime: object.mtime,
                            kind,
                        });
                }
            }
        }

        Ok(entries.into_values().collect())
    }

    async fn read(&self, name: &str, _expected_size: u64) -> Result<Vec<u8>> {
        let objects = self.objects.lock();
        objects
            .get(&Self::key(name))
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn write(&self, name: &str, data: &[u8], dir_marker: bool) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("injected write failure".into()));
        }
        self.objects.lock().insert(
            Self::key(name),
            MemObject {
                data: data.to_vec(),
                dir_marker,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn stat(&self, name: &str) -> Result<StoreStat> {
        let objects = self.objects.lock();
        let object = objects
            .get(&Self::key(name))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(StoreStat {
            size: object.data.len() as u64,
            mtime: object.mtime,
            is_dir: object.dir_marker,
        })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.objects
            .lock()
            .remove(&Self::key(name))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delimiter_listing() {
        let store = MemoryStore::new();
        store.write("a", b"", true).await.unwrap();
        store.write("a/1", b"one", false).await.unwrap();
        store.write("a/b/2", b"two", false).await.unwrap();
        store.write("top", b"t", false).await.unwrap();

        let root = store.list("").await.unwrap();
        let names: Vec<(&str, EntryKind)> =
            root.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            names,
            vec![("a", EntryKind::Dir), ("top", EntryKind::File)]
        );

        let sub = store.list("a/").await.unwrap();
        let names: Vec<(&str, EntryKind)> =
            sub.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            names,
            vec![("1", EntryKind::File), ("b", EntryKind::Dir)]
        );
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store.write("f", b"x", false).await.unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));

        store.set_fail_writes(false);
        store.write("f", b"x", false).await.unwrap();
        assert_eq!(store.read("f", 0).await.unwrap(), b"x");
    }
}
