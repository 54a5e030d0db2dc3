//! File and handle operations.
//!
//! Open installs the full object content as the node's buffer; the
//! buffer is authoritative until the last handle is released. Writes
//! mutate the buffer and mark it dirty; Flush uploads it; Release of
//! the last handle flushes a still-dirty buffer best effort.

use std::sync::Arc;
use std::time::SystemTime;

use fuser::{FileAttr, TimeOrNow};
use tracing::{debug, warn};

use super::error::{FsError, Result};
use super::node::Node;
use super::CaskFs;

/// Fields of a setattr call, each applied only when present.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetattrRequest {
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<TimeOrNow>,
    pub mtime: Option<TimeOrNow>,
}

fn resolve(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl CaskFs {
    /// Open a file: fetch its content from the store, install it as
    /// the buffer, and hand out a fresh handle.
    pub fn open(&self, ino: u64) -> Result<u64> {
        let node = self.node(ino)?;
        let mut state = node.state.write();
        state.file()?;

        let key = state.store_key().to_string();
        let expected = state.attrs.size;
        let bytes = self
            .block_on(self.store().read(&key, expected))
            .map_err(FsError::from)?;

        let now = SystemTime::now();
        let delta = bytes.len() as i64 - state.attrs.size as i64;
        state.attrs.size = bytes.len() as u64;
        state.attrs.atime = now;
        state.attrs.mtime = now;
        state.attrs.crtime = now;

        let file = state.file_mut()?;
        file.buffer = bytes;
        file.dirty = false;
        file.open_handles += 1;
        drop(state);

        // Keep the logical size aligned when the store disagreed with
        // the cached attributes.
        if delta != 0 {
            self.add_size(delta);
        }

        let fh = self.alloc_handle(ino);
        debug!(ino, fh, "opened file");
        Ok(fh)
    }

    /// The whole buffer, under the node's read lock.
    pub fn read_all(&self, fh: u64) -> Result<Vec<u8>> {
        let node = self.handle_node(fh)?;
        let state = node.state.read();
        Ok(state.file()?.buffer.clone())
    }

    /// A byte range of the buffer. Reads past the end return what is
    /// there.
    pub fn read(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        let node = self.handle_node(fh)?;
        let state = node.state.read();
        let buffer = &state.file()?.buffer;

        let start = offset.max(0) as usize;
        if start >= buffer.len() {
            return Ok(Vec::new());
        }
        let end = usize::min(start + size as usize, buffer.len());
        Ok(buffer[start..end].to_vec())
    }

    /// Copy `data` into the buffer at `offset`, zero-filling any gap,
    /// and mark the buffer dirty. Returns the number of bytes written.
    pub fn write(&self, fh: u64, offset: i64, data: &[u8]) -> Result<u32> {
        let node = self.handle_node(fh)?;
        let mut state = node.state.write();

        let start = offset.max(0) as usize;
        let end = start + data.len();
        let (new_len, delta) = {
            let file = state.file_mut()?;
            let mut delta = 0i64;
            if end > file.buffer.len() {
                delta = (end - file.buffer.len()) as i64;
                file.buffer.resize(end, 0);
            }
            file.buffer[start..end].copy_from_slice(data);
            file.dirty = true;
            (file.buffer.len(), delta)
        };
        state.attrs.size = new_len as u64;
        drop(state);

        if delta != 0 {
            self.add_size(delta);
        }
        Ok(data.len() as u32)
    }

    /// Upload the buffer if it is dirty. Idempotent: a successful
    /// flush leaves the buffer clean.
    pub fn flush(&self, fh: u64) -> Result<()> {
        let node = self.handle_node(fh)?;
        self.flush_node(&node)
    }

    /// Fsync maps onto the same write-back path as Flush; the
    /// loopback store syncs to disk before acknowledging the write.
    pub fn fsync(&self, fh: u64) -> Result<()> {
        self.flush(fh)
    }

    pub(crate) fn flush_node(&self, node: &Arc<Node>) -> Result<()> {
        let mut state = node.state.write();
        if !state.file()?.dirty {
            return Ok(());
        }

        let key = state.store_key().to_string();
        let result = self.block_on(self.store().write(&key, &state.file()?.buffer, false));
        if let Err(e) = result {
            warn!(path = %key, error = %e, "buffer upload failed");
            return Err(FsError::NoData);
        }

        state.file_mut()?.dirty = false;
        debug!(path = %key, size = state.attrs.size, "flushed buffer");
        Ok(())
    }

    /// Drop a handle. The buffer stays with the node; a later Open
    /// refreshes it. Releasing the last handle of a dirty node
    /// flushes it, best effort.
    pub fn release(&self, fh: u64) -> Result<()> {
        let node = self.drop_handle(fh)?;

        let flush_needed = {
            let mut state = node.state.write();
            let file = state.file_mut()?;
            file.open_handles = file.open_handles.saturating_sub(1);
            file.open_handles == 0 && file.dirty
        };

        if flush_needed {
            if let Err(e) = self.flush_node(&node) {
                warn!(ino = node.ino(), error = %e, "flush on last release failed");
            }
        }
        Ok(())
    }

    /// Apply the present fields of a setattr call and return the
    /// resulting attributes.
    pub fn setattr(&self, ino: u64, req: SetattrRequest) -> Result<FileAttr> {
        let node = self.node(ino)?;
        let mut state = node.state.write();

        let mut delta = 0i64;
        if let Some(new_size) = req.size {
            if !state.is_dir() {
                delta = new_size as i64 - state.attrs.size as i64;
                state.file_mut()?.buffer.resize(new_size as usize, 0);
                state.attrs.size = new_size;
            }
        }

        if let Some(mode) = req.mode {
            state.attrs.perm = (mode & 0o7777) as u16;
        }
        if let Some(uid) = req.uid {
            state.attrs.uid = uid;
        }
        if let Some(gid) = req.gid {
            state.attrs.gid = gid;
        }
        if let Some(atime) = req.atime {
            state.attrs.atime = resolve(atime);
        }
        if let Some(mtime) = req.mtime {
            state.attrs.mtime = resolve(mtime);
        }
        state.attrs.ctime = SystemTime::now();

        let attr = state.file_attr(node.ino());
        drop(state);

        if delta != 0 {
            self.add_size(delta);
        }
        Ok(attr)
    }
}
