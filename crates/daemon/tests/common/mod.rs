//! Shared test utilities for filesystem integration tests
#![allow(dead_code)]

use std::sync::Arc;

use tokio::runtime::Runtime;

use caskfs_daemon::fs::CaskFs;
use caskfs_store::{BackingStore, LoopbackStore, MemoryStore};

/// A filesystem over an in-memory store, plus the runtime that backs
/// its store calls.
pub struct TestFs {
    pub fs: Arc<CaskFs>,
    pub store: Arc<MemoryStore>,
    pub rt: Runtime,
}

/// Set up a filesystem over a fresh in-memory store.
pub fn setup() -> TestFs {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let fs = Arc::new(CaskFs::new(
        rt.handle().clone(),
        store.clone() as Arc<dyn BackingStore>,
    ));
    TestFs { fs, store, rt }
}

impl TestFs {
    /// Seed an object directly into the backing store.
    pub fn seed(&self, name: &str, data: &[u8], dir_marker: bool) {
        self.rt
            .block_on(self.store.write(name, data, dir_marker))
            .unwrap();
    }
}

/// A filesystem over a loopback store rooted in a temp directory.
pub struct TestLoopback {
    pub fs: Arc<CaskFs>,
    pub dir: tempfile::TempDir,
    pub rt: Runtime,
}

/// Set up a filesystem whose backing store is a temp directory.
pub fn setup_loopback() -> TestLoopback {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LoopbackStore::open(dir.path()).unwrap());
    let fs = Arc::new(CaskFs::new(
        rt.handle().clone(),
        store as Arc<dyn BackingStore>,
    ));
    TestLoopback { fs, dir, rt }
}
