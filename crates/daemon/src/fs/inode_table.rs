//! Inode allocation and node indexing.
//!
//! Inodes are handed out from a process-wide monotonic counter and
//! never reused within a daemon run; the root always receives 1. Two
//! indices are kept: by inode, for kernel re-entry, and by canonical
//! path, for parent discovery and rename bookkeeping. Both live under
//! a single exclusive lock that is only ever held for map operations,
//! never across store I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::node::Node;

/// Inode of the filesystem root.
pub const ROOT_INODE: u64 = 1;

#[derive(Debug, Default)]
struct Indices {
    by_ino: HashMap<u64, Arc<Node>>,
    by_path: HashMap<String, u64>,
}

/// Process-wide inode table.
#[derive(Debug)]
pub struct InodeTable {
    next: AtomicU64,
    indices: Mutex<Indices>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(ROOT_INODE),
            indices: Mutex::new(Indices::default()),
        }
    }

    /// Hand out a fresh inode. The first call returns [`ROOT_INODE`].
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Index a node under its inode and path.
    pub fn insert(&self, node: Arc<Node>) {
        let path = node.state.read().path.clone();
        let mut indices = self.indices.lock();
        indices.by_path.insert(path, node.ino());
        indices.by_ino.insert(node.ino(), node);
    }

    pub fn get(&self, ino: u64) -> Option<Arc<Node>> {
        self.indices.lock().by_ino.get(&ino).cloned()
    }

    pub fn ino_for_path(&self, path: &str) -> Option<u64> {
        self.indices.lock().by_path.get(path).copied()
    }

    /// Drop the path index entry, leaving the inode entry for the
    /// kernel to forget. Used when a node is unlinked or displaced.
    pub fn remove_path(&self, path: &str) {
        self.indices.lock().by_path.remove(path);
    }

    /// Re-key a node's path index entry after a rename.
    pub fn rename_path(&self, old_path: &str, new_path: &str) {
        let mut indices = self.indices.lock();
        if let Some(ino) = indices.by_path.remove(old_path) {
            indices.by_path.insert(new_path.to_string(), ino);
        }
    }

    /// Fully unregister a node that was never exposed to the kernel.
    /// Used to undo a registration after a failed store write.
    pub fn remove(&self, ino: u64, path: &str) {
        let mut indices = self.indices.lock();
        indices.by_ino.remove(&ino);
        if indices.by_path.get(path) == Some(&ino) {
            indices.by_path.remove(path);
        }
    }

    /// Kernel-driven release of an inode. Only unlinked nodes are
    /// dropped; a forgotten-but-live node stays reachable through its
    /// parent. Idempotent.
    pub fn forget(&self, ino: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let mut indices = self.indices.lock();
        let unlinked = indices
            .by_ino
            .get(&ino)
            .map(|node| node.is_unlinked())
            .unwrap_or(false);
        if unlinked {
            indices.by_ino.remove(&ino);
        }
    }

    /// Number of indexed nodes. Test hook.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.indices.lock().by_ino.len()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
