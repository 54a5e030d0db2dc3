//! Loopback store.
//!
//! Maps every logical path directly onto a subtree of a local
//! directory: the directory tree under the loopback root IS the
//! persisted state, bit for bit. Directory markers become real
//! directories, writes are fsynced before they are acknowledged, and
//! statfs is passed through from the underlying filesystem.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nix::sys::statvfs::statvfs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::{BackingStore, EntryKind, StoreEntry, StoreStat, StoreStatfs};

/// Backing store over a local directory.
#[derive(Debug)]
pub struct LoopbackStore {
    root: PathBuf,
}

impl LoopbackStore {
    /// Open a loopback store rooted at `root`. The root must already
    /// exist and be a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = std::fs::metadata(&root)
            .map_err(|e| StoreError::Fatal(format!("loopback root {}: {e}", root.display())))?;
        if !meta.is_dir() {
            return Err(StoreError::Fatal(format!(
                "loopback root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn real_path(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl BackingStore for LoopbackStore {
    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>> {
        let dir = self.real_path(prefix);
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::from_io(e, prefix))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(e, prefix))?
        {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(?raw, "skipping entry with non-utf8 name");
                    continue;
                }
            };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(%name, error = %e, "skipping unstattable entry");
                    continue;
                }
            };
            entries.push(StoreEntry {
                name,
                size: meta.len(),
                mtime: meta.modified().unwrap_or_else(|_| SystemTime::now()),
                kind: if meta.is_dir() {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                },
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(prefix, count = entries.len(), "listed loopback directory");
        Ok(entries)
    }

    async fn read(&self, name: &str, _expected_size: u64) -> Result<Vec<u8>> {
        tokio::fs::read(self.real_path(name))
            .await
            .map_err(|e| StoreError::from_io(e, name))
    }

    async fn write(&self, name: &str, data: &[u8], dir_marker: bool) -> Result<()> {
        let path = self.real_path(name);

        if dir_marker {
            return tokio::fs::create_dir(&path)
                .await
                .map_err(|e| StoreError::from_io(e, name));
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| StoreError::from_io(e, name))?;
        file.write_all(data)
            .await
            .map_err(|e| StoreError::from_io(e, name))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::from_io(e, name))?;
        debug!(name, size = data.len(), "wrote loopback file");
        Ok(())
    }

    async fn stat(&self, name: &str) -> Result<StoreStat> {
        let meta = tokio::fs::metadata(self.real_path(name))
            .await
            .map_err(|e| StoreError::from_io(e, name))?;
        Ok(StoreStat {
            size: meta.len(),
            mtime: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            is_dir: meta.is_dir(),
        })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.real_path(name);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StoreError::from_io(e, name))?;
        if meta.is_dir() {
            tokio::fs::remove_dir(&path)
                .await
                .map_err(|e| StoreError::from_io(e, name))
        } else {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StoreError::from_io(e, name))
        }
    }

    fn statfs(&self) -> Option<StoreStatfs> {
        match statvfs(&self.root) {
            Ok(stats) => Some(StoreStatfs {
                blocks: stats.blocks() as u64,
                bfree: stats.blocks_free() as u64,
                bavail: stats.blocks_available() as u64,
                files: stats.files() as u64,
                ffree: stats.files_free() as u64,
                bsize: stats.block_size() as u32,
                namelen: stats.name_max() as u32,
                frsize: stats.fragment_size() as u32,
            }),
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "statvfs failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_persists_on_disk() {
        let temp = tempfile::tempdir().unwrap();
        let store = LoopbackStore::open(temp.path()).unwrap();

        store.write("hello.txt", b"hi there", false).await.unwrap();

        // The logical name maps straight onto the local tree.
        let on_disk = std::fs::read(temp.path().join("hello.txt")).unwrap();
        assert_eq!(on_disk, b"hi there");
        assert_eq!(store.read("hello.txt", 0).await.unwrap(), b"hi there");
    }

    #[tokio::test]
    async fn test_dir_marker_creates_directory() {
        let temp = tempfile::tempdir().unwrap();
        let store = LoopbackStore::open(temp.path()).unwrap();

        store.write("sub", b"", true).await.unwrap();
        assert!(temp.path().join("sub").is_dir());

        store.write("sub/f", b"x", false).await.unwrap();

        let entries = store.list("sub/").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "f");
        assert_eq!(entries[0].kind, EntryKind::File);
    }

    #[tokio::test]
    async fn test_list_mixes_dirs_and_files() {
        let temp = tempfile::tempdir().unwrap();
        let store = LoopbackStore::open(temp.path()).unwrap();

        store.write("b.txt", b"b", false).await.unwrap();
        store.write("a", b"", true).await.unwrap();

        let entries = store.list("").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b.txt"]);
        assert_eq!(entries[0].kind, EntryKind::Dir);
        assert_eq!(entries[1].kind, EntryKind::File);
    }

    #[tokio::test]
    async fn test_remove_translates_errno() {
        let temp = tempfile::tempdir().unwrap();
        let store = LoopbackStore::open(temp.path()).unwrap();

        let err = store.remove("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        store.write("f", b"1", false).await.unwrap();
        store.remove("f").await.unwrap();
        assert!(!temp.path().join("f").exists());
    }

    #[tokio::test]
    async fn test_open_rejects_missing_root() {
        let err = LoopbackStore::open("/definitely/not/here").unwrap_err();
        assert!(matches!(err, StoreError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_statfs_passthrough() {
        let temp = tempfile::tempdir().unwrap();
        let store = LoopbackStore::open(temp.path()).unwrap();

        let stats = store.statfs().expect("statvfs should work on tempdir");
        assert!(stats.bsize > 0);
        assert!(stats.blocks > 0);
    }
}
