//! Directory operations.
//!
//! Create and Mkdir hold the parent's write lock across the store
//! write so concurrent creates of the same name serialize; when the
//! store rejects the write the registration is undone. ReadDirAll
//! holds the directory's exclusive lock across the store listing and
//! only ever adds to the cache: locally created entries survive a
//! listing that missed them, and on a name conflict the cached entry
//! wins.

use std::sync::Arc;
use std::time::SystemTime;

use fuser::{FileAttr, FileType};
use tracing::{debug, warn};

use caskfs_store::{EntryKind, StoreError};

use super::error::{FsError, Result};
use super::node::{child_path, Node, NodeKind, NodeState};
use super::CaskFs;

/// One directory listing entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: FileType,
}

impl CaskFs {
    /// Resolve `name` in a directory's cached children. Does not fall
    /// through to the store: a name becomes visible through a prior
    /// listing or a local create.
    pub fn lookup(&self, parent: u64, name: &str) -> Result<FileAttr> {
        let dir = self.node(parent)?;
        let child = {
            let state = dir.state.read();
            state
                .dir()?
                .children
                .get(name)
                .cloned()
                .ok_or(FsError::NotFound)?
        };
        let state = child.state.read();
        Ok(state.file_attr(child.ino()))
    }

    /// Refresh a directory from the store and return the union of
    /// cached and listed entries.
    pub fn readdir(&self, ino: u64) -> Result<Vec<DirEntry>> {
        let dir = self.node(ino)?;
        let mut state = dir.state.write();
        state.dir()?;
        let prefix = state.path.clone();

        let listed = self
            .block_on(self.store().list(&prefix))
            .map_err(FsError::from)?;

        for entry in listed {
            let existing = state.dir()?.children.get(&entry.name).cloned();
            match existing {
                Some(node) => {
                    let cached_is_dir = node.state.read().is_dir();
                    if cached_is_dir != (entry.kind == EntryKind::Dir) {
                        warn!(
                            name = %entry.name,
                            path = %prefix,
                            "listing disagrees with cached entry kind, keeping cache"
                        );
                    }
                }
                None => {
                    let is_dir = entry.kind == EntryKind::Dir;
                    let path = child_path(&prefix, &entry.name, is_dir);
                    let child_ino = self.inodes().allocate();
                    let node = if is_dir {
                        Node::new_dir(child_ino, path, entry.mtime)
                    } else {
                        Node::new_file(child_ino, path, entry.size, entry.mtime)
                    };
                    state
                        .dir_mut()?
                        .children
                        .insert(entry.name.clone(), node.clone());
                    self.inodes().insert(node);
                    self.add_nodes(1);
                    if !is_dir {
                        self.add_size(entry.size as i64);
                    }
                }
            }
        }

        let entries = state
            .dir()?
            .children
            .iter()
            .map(|(name, node)| DirEntry {
                ino: node.ino(),
                name: name.clone(),
                kind: node.state.read().file_type(),
            })
            .collect();
        Ok(entries)
    }

    /// The directory's cached children without a store round trip.
    /// Serves readdir continuations after the initial refresh.
    pub fn readdir_cached(&self, ino: u64) -> Result<Vec<DirEntry>> {
        let dir = self.node(ino)?;
        let state = dir.state.read();
        let entries = state
            .dir()?
            .children
            .iter()
            .map(|(name, node)| DirEntry {
                ino: node.ino(),
                name: name.clone(),
                kind: node.state.read().file_type(),
            })
            .collect();
        Ok(entries)
    }

    /// Create a directory: register it, then persist its marker
    /// object. A store failure rolls the registration back.
    pub fn mkdir(&self, parent: u64, name: &str, mode: u32) -> Result<FileAttr> {
        let dir = self.node(parent)?;
        let mut state = dir.state.write();
        if state.dir()?.children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let path = child_path(&state.path, name, true);
        let ino = self.inodes().allocate();
        let node = Node::new_dir(ino, path.clone(), SystemTime::now());
        node.state.write().attrs.perm = (mode & 0o7777) as u16;

        state.dir_mut()?.children.insert(name.to_string(), node.clone());
        self.inodes().insert(node.clone());
        self.add_nodes(1);

        let key = path.trim_end_matches('/');
        if let Err(e) = self.block_on(self.store().write(key, &[], true)) {
            warn!(%path, error = %e, "marker upload failed, undoing mkdir");
            state.dir_mut()?.children.remove(name);
            self.inodes().remove(ino, &path);
            self.add_nodes(-1);
            return Err(FsError::NoData);
        }

        debug!(%path, ino, "created directory");
        let attr = node.state.read().file_attr(ino);
        Ok(attr)
    }

    /// Create a file: register it, persist an empty object, and open
    /// a handle on the empty buffer. A store failure rolls the
    /// registration back.
    pub fn create(&self, parent: u64, name: &str, mode: u32) -> Result<(FileAttr, u64)> {
        let dir = self.node(parent)?;
        let mut state = dir.state.write();
        if state.dir()?.children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let path = child_path(&state.path, name, false);
        let ino = self.inodes().allocate();
        let node = Node::new_file(ino, path.clone(), 0, SystemTime::now());
        node.state.write().attrs.perm = (mode & 0o7777) as u16;

        state.dir_mut()?.children.insert(name.to_string(), node.clone());
        self.inodes().insert(node.clone());
        self.add_nodes(1);

        if let Err(e) = self.block_on(self.store().write(&path, &[], false)) {
            warn!(%path, error = %e, "empty object upload failed, undoing create");
            state.dir_mut()?.children.remove(name);
            self.inodes().remove(ino, &path);
            self.add_nodes(-1);
            return Err(FsError::NoData);
        }

        {
            let mut ns = node.state.write();
            ns.file_mut()?.open_handles += 1;
        }
        let fh = self.alloc_handle(ino);

        debug!(%path, ino, fh, "created file");
        let attr = node.state.read().file_attr(ino);
        Ok((attr, fh))
    }

    /// Move an entry, overwriting any displaced destination entry.
    /// Both directories are locked in ascending inode order.
    pub fn rename(&self, parent: u64, name: &str, new_parent: u64, new_name: &str) -> Result<()> {
        let src_dir = self.node(parent)?;
        let dst_dir = self.node(new_parent)?;

        if src_dir.ino() == dst_dir.ino() {
            let mut src = src_dir.state.write();
            self.rename_locked(&mut src, None, name, new_name)
        } else if src_dir.ino() < dst_dir.ino() {
            let mut src = src_dir.state.write();
            let mut dst = dst_dir.state.write();
            self.rename_locked(&mut src, Some(&mut dst), name, new_name)
        } else {
            let mut dst = dst_dir.state.write();
            let mut src = src_dir.state.write();
            self.rename_locked(&mut src, Some(&mut dst), name, new_name)
        }
    }

    fn rename_locked(
        &self,
        src: &mut NodeState,
        mut dst: Option<&mut NodeState>,
        name: &str,
        new_name: &str,
    ) -> Result<()> {
        let child = src
            .dir()?
            .children
            .get(name)
            .cloned()
            .ok_or(FsError::NotFound)?;
        if let Some(d) = dst.as_deref() {
            d.dir()?;
        }

        let dst_path = match dst.as_deref() {
            Some(d) => d.path.clone(),
            None => src.path.clone(),
        };

        let (old_path, is_dir, file_size, buffer) = {
            let cs = child.state.read();
            let buffer = match &cs.kind {
                // The buffer is only authoritative while a handle is
                // open.
                NodeKind::File(f) if f.open_handles > 0 => Some(f.buffer.clone()),
                _ => None,
            };
            (cs.path.clone(), cs.is_dir(), cs.attrs.size, buffer)
        };
        let new_path = child_path(&dst_path, new_name, is_dir);
        if new_path == old_path {
            return Ok(());
        }
        // A directory cannot move into its own subtree.
        if is_dir && new_path.starts_with(&old_path) {
            return Err(FsError::NotSupported);
        }

        // The object moves with a file. Directory renames rewire the
        // cache only; descendant objects keep their keys until they
        // are next written.
        if !is_dir {
            let bytes = match buffer {
                Some(b) => b,
                None => self
                    .block_on(self.store().read(&old_path, file_size))
                    .map_err(|e| {
                        warn!(%old_path, error = %e, "source object unreadable for rename");
                        FsError::NoData
                    })?,
            };
            if let Err(e) = self.block_on(self.store().write(&new_path, &bytes, false)) {
                warn!(%new_path, error = %e, "object copy failed, aborting rename");
                return Err(FsError::NoData);
            }
            match self.block_on(self.store().remove(&old_path)) {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => warn!(%old_path, error = %e, "stale object left behind by rename"),
            }
        } else {
            debug!(%old_path, %new_path, "directory rename is cache-only");
        }

        // An existing destination entry is displaced, decrementing the
        // node count and, for files, the logical size.
        let displaced = match dst.as_deref_mut() {
            Some(d) => d.dir_mut()?.children.remove(new_name),
            None => src.dir_mut()?.children.remove(new_name),
        };
        if let Some(old) = displaced {
            let (dpath, displaced_file_size) = {
                let s = old.state.read();
                let size = if s.is_dir() { None } else { Some(s.attrs.size) };
                (s.path.clone(), size)
            };
            self.add_nodes(-1);
            if let Some(size) = displaced_file_size {
                self.add_size(-(size as i64));
            }
            old.mark_unlinked();
            self.inodes().remove_path(&dpath);
            self.xattrs().remove_path(&dpath);
        }

        let moved = src
            .dir_mut()?
            .children
            .remove(name)
            .ok_or(FsError::NotFound)?;
        match dst.as_deref_mut() {
            Some(d) => d.dir_mut()?.children.insert(new_name.to_string(), moved),
            None => src.dir_mut()?.children.insert(new_name.to_string(), moved),
        };

        self.rebase_subtree(&child, new_path);
        Ok(())
    }

    /// Rewrite a moved node's path, and its descendants' paths, in the
    /// node states, the inode table, and the xattr store.
    fn rebase_subtree(&self, node: &Arc<Node>, new_path: String) {
        let mut state = node.state.write();
        let old_path = std::mem::replace(&mut state.path, new_path.clone());
        state.attrs.ctime = SystemTime::now();
        self.inodes().rename_path(&old_path, &new_path);
        self.xattrs().rename_path(&old_path, &new_path);

        if let NodeKind::Dir(dir) = &state.kind {
            for (name, child) in dir.children.clone() {
                let is_dir = child.state.read().is_dir();
                let child_new = child_path(&new_path, &name, is_dir);
                self.rebase_subtree(&child, child_new);
            }
        }
    }

    /// Remove a directory entry and its object. A non-empty directory
    /// is refused; a store failure other than NotFound leaves the
    /// cache unchanged.
    pub fn remove(&self, parent: u64, name: &str, is_dir_request: bool) -> Result<()> {
        let dir = self.node(parent)?;
        let mut state = dir.state.write();
        let child = state
            .dir()?
            .children
            .get(name)
            .cloned()
            .ok_or(FsError::NotFound)?;

        let (child_full_path, child_is_dir, child_size) = {
            let cs = child.state.read();
            if is_dir_request {
                match &cs.kind {
                    NodeKind::Dir(d) if !d.children.is_empty() => return Err(FsError::NoData),
                    NodeKind::Dir(_) => {}
                    NodeKind::File(_) => return Err(FsError::NotSupported),
                }
            }
            (cs.path.clone(), cs.is_dir(), cs.attrs.size)
        };

        let key = child_full_path.trim_end_matches('/');
        match self.block_on(self.store().remove(key)) {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                warn!(path = %child_full_path, error = %e, "object delete failed");
                return Err(FsError::NoData);
            }
        }

        state.dir_mut()?.children.remove(name);
        child.mark_unlinked();
        self.inodes().remove_path(&child_full_path);
        self.xattrs().remove_path(&child_full_path);
        self.add_nodes(-1);
        if !child_is_dir {
            self.add_size(-(child_size as i64));
        }

        debug!(path = %child_full_path, "removed entry");
        Ok(())
    }
}
