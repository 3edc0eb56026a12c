use std::path::PathBuf;

use papl::store::VersionedStore;
use tempfile::TempDir;

/// File-backed store in a temporary directory with automatic cleanup
pub struct TestStore {
    store: VersionedStore,
    path: PathBuf,
    _dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("store.db");
        let store = VersionedStore::open("file", &path).expect("Failed to open file store");
        Self {
            store,
            path,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Close the current instance and open a fresh one on the same file.
    pub fn reopen(mut self) -> Self {
        self.store.close().expect("Failed to close store");
        self.store = VersionedStore::open("file", &self.path).expect("Failed to reopen store");
        self
    }
}
