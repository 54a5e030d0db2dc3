//! Filesystem core.
//!
//! [`CaskFs`] owns everything the dispatcher needs: the injected
//! backing store, the inode table, the handle registry, the xattr
//! store, and the filesystem-wide counters. Operations are keyed by
//! inode and return typed errors; the FUSE driver is a thin adapter
//! over them, and integration tests call them directly.
//!
//! Locking: a node's lock is taken before the inode table's, and the
//! table lock is only ever held for map operations. Two-directory
//! operations lock in ascending inode order. The `size` and
//! `node_count` counters are atomics and need no lock.

mod dir_ops;
mod error;
mod file_ops;
mod inode_table;
mod node;
mod xattr;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use fuser::FileAttr;
use parking_lot::Mutex;
use tokio::runtime::Handle;

use caskfs_store::BackingStore;

pub use dir_ops::DirEntry;
pub use error::{FsError, Result};
pub use file_ops::SetattrRequest;
pub use inode_table::{InodeTable, ROOT_INODE};
pub use node::{leaf_name, parent_path, Node};

use node::BLOCK_SIZE;
use xattr::XattrStore;

/// Filesystem-level statistics reported through statfs.
#[derive(Debug, Clone, Copy)]
pub struct FsStatfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// The filesystem root: inode table, handle registry, xattr store,
/// counters, and the backing store everything is mirrored from.
pub struct CaskFs {
    rt: Handle,
    store: Arc<dyn BackingStore>,
    inodes: InodeTable,
    xattrs: XattrStore,
    handles: Mutex<HashMap<u64, u64>>,
    next_fh: AtomicU64,
    size: AtomicI64,
    node_count: AtomicU64,
}

impl CaskFs {
    /// Build a filesystem over `store`. The root directory receives
    /// inode 1.
    pub fn new(rt: Handle, store: Arc<dyn BackingStore>) -> Self {
        let inodes = InodeTable::new();
        let root_ino = inodes.allocate();
        assert_eq!(root_ino, ROOT_INODE, "root must receive inode 1");
        inodes.insert(Node::new_dir(root_ino, String::new(), SystemTime::now()));

        Self {
            rt,
            store,
            inodes,
            xattrs: XattrStore::new(),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            size: AtomicI64::new(0),
            node_count: AtomicU64::new(1),
        }
    }

    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    pub(crate) fn store(&self) -> &dyn BackingStore {
        self.store.as_ref()
    }

    pub(crate) fn node(&self, ino: u64) -> Result<Arc<Node>> {
        self.inodes.get(ino).ok_or(FsError::NotFound)
    }

    pub(crate) fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub(crate) fn xattrs(&self) -> &XattrStore {
        &self.xattrs
    }

    pub(crate) fn add_size(&self, delta: i64) {
        self.size.fetch_add(delta, Ordering::SeqCst);
    }

    pub(crate) fn add_nodes(&self, delta: i64) {
        if delta >= 0 {
            self.node_count.fetch_add(delta as u64, Ordering::SeqCst);
        } else {
            self.node_count.fetch_sub((-delta) as u64, Ordering::SeqCst);
        }
    }

    /// Sum of live file sizes, best effort.
    pub fn logical_size(&self) -> u64 {
        self.size.load(Ordering::SeqCst).max(0) as u64
    }

    /// Number of live nodes, including the root.
    pub fn node_count(&self) -> u64 {
        self.node_count.load(Ordering::SeqCst)
    }

    pub(crate) fn alloc_handle(&self, ino: u64) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().insert(fh, ino);
        fh
    }

    pub(crate) fn handle_node(&self, fh: u64) -> Result<Arc<Node>> {
        let ino = self
            .handles
            .lock()
            .get(&fh)
            .copied()
            .ok_or(FsError::NotFound)?;
        self.node(ino)
    }

    pub(crate) fn drop_handle(&self, fh: u64) -> Result<Arc<Node>> {
        let ino = self.handles.lock().remove(&fh).ok_or(FsError::NotFound)?;
        self.node(ino)
    }

    /// Attribute snapshot for a node.
    pub fn getattr(&self, ino: u64) -> Result<FileAttr> {
        let node = self.node(ino)?;
        let state = node.state.read();
        Ok(state.file_attr(node.ino()))
    }

    /// Inode of a node's parent directory; the root is its own parent.
    pub fn parent_ino(&self, ino: u64) -> Result<u64> {
        if ino == ROOT_INODE {
            return Ok(ROOT_INODE);
        }
        let node = self.node(ino)?;
        let parent = {
            let state = node.state.read();
            parent_path(&state.path).to_string()
        };
        Ok(self.inodes.ino_for_path(&parent).unwrap_or(ROOT_INODE))
    }

    /// Kernel signal that an inode is no longer referenced.
    pub fn forget(&self, ino: u64) {
        self.inodes.forget(ino);
    }

    pub fn statfs(&self) -> FsStatfs {
        if let Some(s) = self.store.statfs() {
            return FsStatfs {
                blocks: s.blocks,
                bfree: s.bfree,
                bavail: s.bavail,
                files: s.files,
                ffree: s.ffree,
                bsize: s.bsize,
                namelen: s.namelen,
                frsize: s.frsize,
            };
        }
        FsStatfs {
            blocks: self.logical_size().div_ceil(BLOCK_SIZE as u64),
            bfree: 0,
            bavail: 0,
            files: self.node_count(),
            ffree: 0,
            bsize: BLOCK_SIZE,
            namelen: 255,
            frsize: BLOCK_SIZE,
        }
    }

    fn path_of(&self, ino: u64) -> Result<String> {
        let node = self.node(ino)?;
        let state = node.state.read();
        Ok(state.path.clone())
    }

    pub fn getxattr(&self, ino: u64, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(ino)?;
        self.xattrs.get(&path, name)
    }

    pub fn setxattr(&self, ino: u64, name: &str, value: &[u8]) -> Result<()> {
        let path = self.path_of(ino)?;
        self.xattrs.set(&path, name, value);
        Ok(())
    }

    /// Sorted attribute names for a node, windowed by `position` and,
    /// when nonzero, `size`.
    pub fn listxattr(&self, ino: u64, position: usize, size: usize) -> Result<Vec<String>> {
        let path = self.path_of(ino)?;
        Ok(self.xattrs.list(&path, position, size))
    }

    pub fn removexattr(&self, ino: u64, name: &str) -> Result<()> {
        let path = self.path_of(ino)?;
        self.xattrs.remove(&path, name)
    }
}

impl std::fmt::Debug for CaskFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaskFs")
            .field("node_count", &self.node_count())
            .field("logical_size", &self.logical_size())
            .finish()
    }
}
