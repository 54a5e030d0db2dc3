//! In-memory node records.
//!
//! One node exists per observed path. Directory nodes own their
//! children by name; file nodes carry the content buffer that backs
//! open handles. The owning graph is the child map rooted at the
//! filesystem root; parents are discovered through the path string
//! rather than a back-pointer, which keeps the graph acyclic.
//!
//! Path convention: the root is the empty string, directory paths end
//! in `/`, file paths do not. The store key for a node is its path
//! with any trailing slash removed, so a directory `a/b/` is the
//! marker object `a/b`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use fuser::{FileAttr, FileType};
use parking_lot::RwLock;

use super::error::{FsError, Result};

/// Reported block size, also used for the block count in attrs.
pub(crate) const BLOCK_SIZE: u32 = 512;

pub(crate) const DIR_PERM: u16 = 0o755;
pub(crate) const FILE_PERM: u16 = 0o644;

/// Stat-visible attributes of a node.
#[derive(Debug, Clone, Copy)]
pub struct NodeAttrs {
    pub size: u64,
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
}

impl NodeAttrs {
    fn new(perm: u16, size: u64, mtime: SystemTime) -> Self {
        let now = SystemTime::now();
        Self {
            size,
            perm,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            nlink: 1,
            atime: now,
            mtime,
            ctime: now,
            crtime: now,
        }
    }

    pub fn dir(mtime: SystemTime) -> Self {
        Self::new(DIR_PERM, 0, mtime)
    }

    pub fn file(size: u64, mtime: SystemTime) -> Self {
        Self::new(FILE_PERM, size, mtime)
    }
}

/// Per-open-file state. The buffer is authoritative between Open and
/// Release; a node that was only ever listed has an empty buffer and
/// `open_handles == 0`.
#[derive(Debug, Default)]
pub struct FileState {
    pub buffer: Vec<u8>,
    pub dirty: bool,
    pub open_handles: u32,
}

/// Directory contents, keyed by leaf name. Ordered so listings are
/// stable across readdir calls that resume at an offset.
#[derive(Debug, Default)]
pub struct DirState {
    pub children: BTreeMap<String, Arc<Node>>,
}

/// The two node shapes.
#[derive(Debug)]
pub enum NodeKind {
    File(FileState),
    Dir(DirState),
}

/// Lock-protected portion of a node.
#[derive(Debug)]
pub struct NodeState {
    pub path: String,
    pub attrs: NodeAttrs,
    pub kind: NodeKind,
}

impl NodeState {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir(_))
    }

    pub fn dir(&self) -> Result<&DirState> {
        match &self.kind {
            NodeKind::Dir(d) => Ok(d),
            NodeKind::File(_) => Err(FsError::NotSupported),
        }
    }

    pub fn dir_mut(&mut self) -> Result<&mut DirState> {
        match &mut self.kind {
            NodeKind::Dir(d) => Ok(d),
            NodeKind::File(_) => Err(FsError::NotSupported),
        }
    }

    pub fn file(&self) -> Result<&FileState> {
        match &self.kind {
            NodeKind::File(f) => Ok(f),
            NodeKind::Dir(_) => Err(FsError::NotSupported),
        }
    }

    pub fn file_mut(&mut self) -> Result<&mut FileState> {
        match &mut self.kind {
            NodeKind::File(f) => Ok(f),
            NodeKind::Dir(_) => Err(FsError::NotSupported),
        }
    }

    /// Store key for this node: the path without the directory slash.
    pub fn store_key(&self) -> &str {
        self.path.trim_end_matches('/')
    }

    pub fn file_type(&self) -> FileType {
        if self.is_dir() {
            FileType::Directory
        } else {
            FileType::RegularFile
        }
    }

    pub fn file_attr(&self, ino: u64) -> FileAttr {
        FileAttr {
            ino,
            size: self.attrs.size,
            blocks: self.attrs.size.div_ceil(BLOCK_SIZE as u64),
            atime: self.attrs.atime,
            mtime: self.attrs.mtime,
            ctime: self.attrs.ctime,
            crtime: self.attrs.crtime,
            kind: self.file_type(),
            perm: self.attrs.perm,
            nlink: self.attrs.nlink,
            uid: self.attrs.uid,
            gid: self.attrs.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

/// One entry per observed path.
#[derive(Debug)]
pub struct Node {
    ino: u64,
    unlinked: AtomicBool,
    pub state: RwLock<NodeState>,
}

impl Node {
    pub fn new_dir(ino: u64, path: String, mtime: SystemTime) -> Arc<Self> {
        Arc::new(Self {
            ino,
            unlinked: AtomicBool::new(false),
            state: RwLock::new(NodeState {
                path,
                attrs: NodeAttrs::dir(mtime),
                kind: NodeKind::Dir(DirState::default()),
            }),
        })
    }

    pub fn new_file(ino: u64, path: String, size: u64, mtime: SystemTime) -> Arc<Self> {
        Arc::new(Self {
            ino,
            unlinked: AtomicBool::new(false),
            state: RwLock::new(NodeState {
                path,
                attrs: NodeAttrs::file(size, mtime),
                kind: NodeKind::File(FileState::default()),
            }),
        })
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Whether the node has been removed from its parent. The inode
    /// table keeps unlinked nodes alive until the kernel forgets them.
    pub fn is_unlinked(&self) -> bool {
        self.unlinked.load(Ordering::Acquire)
    }

    pub fn mark_unlinked(&self) {
        self.unlinked.store(true, Ordering::Release);
    }
}

/// Leaf name of a path: `a/b/` and `a/b` both yield `b`.
pub fn leaf_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Parent directory path: `a/b/c` yields `a/b/`, `a` yields the root.
pub fn parent_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &path[..=pos],
        None => "",
    }
}

/// Path of a child inside `dir_path`, with the directory convention
/// applied.
pub fn child_path(dir_path: &str, name: &str, is_dir: bool) -> String {
    if is_dir {
        format!("{dir_path}{name}/")
    } else {
        format!("{dir_path}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name(""), "");
        assert_eq!(leaf_name("f.txt"), "f.txt");
        assert_eq!(leaf_name("a/"), "a");
        assert_eq!(leaf_name("a/b/c"), "c");
        assert_eq!(leaf_name("a/b/c/"), "c");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("f.txt"), "");
        assert_eq!(parent_path("a/"), "");
        assert_eq!(parent_path("a/b"), "a/");
        assert_eq!(parent_path("a/b/"), "a/");
        assert_eq!(parent_path("a/b/c.txt"), "a/b/");
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("", "a", true), "a/");
        assert_eq!(child_path("a/", "f.txt", false), "a/f.txt");
        assert_eq!(child_path("a/", "b", true), "a/b/");
    }

    #[test]
    fn test_store_key_strips_dir_slash() {
        let dir = Node::new_dir(2, "a/b/".to_string(), SystemTime::now());
        assert_eq!(dir.state.read().store_key(), "a/b");

        let file = Node::new_file(3, "a/b/f".to_string(), 0, SystemTime::now());
        assert_eq!(file.state.read().store_key(), "a/b/f");
    }
}
