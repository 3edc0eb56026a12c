//! Versioned key-value store for policy and data documents.
//!
//! Every key holds a value, an opaque version tag and a stamp (seconds
//! since the Unix epoch unless the caller supplies its own). `save` is an
//! unconditional upsert; the version is recorded, never compared. Stamps
//! drive range listing and eviction.

pub mod errors;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use errors::{OpenCause, StoreError};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub version: String,
    pub stamp: i64,
}

/// Inclusive bound on entry stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampRange {
    /// `stamp >= n`
    Since(i64),
    /// `stamp <= n`
    Until(i64),
}

impl StampRange {
    pub fn contains(self, stamp: i64) -> bool {
        match self {
            StampRange::Since(n) => stamp >= n,
            StampRange::Until(n) => stamp <= n,
        }
    }
}

/// Zero-based page of a key listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    fn offset(self) -> usize {
        self.number.saturating_mul(self.size)
    }
}

/// Storage backend behind a [`VersionedStore`].
pub trait StoreBackend: Send + Sync + fmt::Debug {
    fn save(&self, key: &str, value: &str, version: &str, stamp: i64) -> Result<(), StoreError>;
    fn load(&self, key: &str) -> Result<Option<Entry>, StoreError>;
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
    /// Keys sorted ascending.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
    /// Keys whose stamp is in `range`, sorted ascending, optionally paged.
    fn keys_in(&self, range: StampRange, page: Option<Page>) -> Result<Vec<String>, StoreError>;
    /// Delete every entry whose stamp is in `range`; returns the count.
    fn evict(&self, range: StampRange) -> Result<usize, StoreError>;
    fn close(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

impl FromStr for StoreKind {
    type Err = OpenCause;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            _ => Err(OpenCause::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreKind::Memory => "memory",
            StoreKind::File => "file",
        })
    }
}

/// Current time as a store stamp.
pub fn now_stamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug)]
pub struct VersionedStore {
    kind: StoreKind,
    backend: Box<dyn StoreBackend>,
}

impl VersionedStore {
    /// Open a store of the given kind. `path` is ignored for `memory`.
    pub fn open(kind: &str, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let kind = kind.parse::<StoreKind>().map_err(|cause| StoreError::Open {
            path: path.as_ref().display().to_string(),
            cause,
        })?;
        match kind {
            StoreKind::Memory => Ok(Self::memory()),
            StoreKind::File => Self::file(path),
        }
    }

    pub fn memory() -> Self {
        Self {
            kind: StoreKind::Memory,
            backend: Box::new(MemoryBackend::new()),
        }
    }

    pub fn file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let backend = SqliteBackend::open(path)?;
        tracing::info!(path = %path.display(), "Opened versioned store");
        Ok(Self {
            kind: StoreKind::File,
            backend: Box::new(backend),
        })
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Upsert stamped with the current time.
    pub fn save(&self, key: &str, value: &str, version: &str) -> Result<(), StoreError> {
        self.save_stamped(key, value, version, now_stamp())
    }

    pub fn save_stamped(
        &self,
        key: &str,
        value: &str,
        version: &str,
        stamp: i64,
    ) -> Result<(), StoreError> {
        self.backend.save(key, value, version, stamp)?;
        tracing::debug!(key, version, stamp, "Saved entry");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        Ok(self.entry(key)?.value)
    }

    pub fn version(&self, key: &str) -> Result<String, StoreError> {
        Ok(self.entry(key)?.version)
    }

    pub fn stamp(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.entry(key)?.stamp)
    }

    /// Value and version read together.
    pub fn value_with_version(&self, key: &str) -> Result<(String, String), StoreError> {
        let entry = self.entry(key)?;
        Ok((entry.value, entry.version))
    }

    /// Returns whether the key existed.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.backend.delete(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.backend.keys()
    }

    /// Keys stamped at or after `stamp`.
    pub fn keys_since(&self, stamp: i64) -> Result<Vec<String>, StoreError> {
        self.backend.keys_in(StampRange::Since(stamp), None)
    }

    /// Keys stamped at or before `stamp`.
    pub fn keys_until(&self, stamp: i64) -> Result<Vec<String>, StoreError> {
        self.backend.keys_in(StampRange::Until(stamp), None)
    }

    pub fn keys_since_page(&self, stamp: i64, page: Page) -> Result<Vec<String>, StoreError> {
        self.backend.keys_in(StampRange::Since(stamp), Some(page))
    }

    pub fn keys_until_page(&self, stamp: i64, page: Page) -> Result<Vec<String>, StoreError> {
        self.backend.keys_in(StampRange::Until(stamp), Some(page))
    }

    /// Delete entries stamped at or after `stamp`.
    pub fn evict_since(&self, stamp: i64) -> Result<usize, StoreError> {
        self.evict(StampRange::Since(stamp))
    }

    /// Delete entries stamped at or before `stamp`.
    pub fn evict_until(&self, stamp: i64) -> Result<usize, StoreError> {
        self.evict(StampRange::Until(stamp))
    }

    pub fn close(&self) -> Result<(), StoreError> {
        self.backend.close()
    }

    fn evict(&self, range: StampRange) -> Result<usize, StoreError> {
        let evicted = self.backend.evict(range)?;
        tracing::info!(?range, evicted, "Evicted entries");
        Ok(evicted)
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        self.backend
            .load(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_by_kind() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(VersionedStore::open("memory", "").unwrap().kind(), StoreKind::Memory);
        assert_eq!(
            VersionedStore::open("FILE", dir.path().join("s.db")).unwrap().kind(),
            StoreKind::File
        );
        match VersionedStore::open("redis", "/tmp/x") {
            Err(StoreError::Open {
                path,
                cause: OpenCause::UnknownKind(kind),
            }) => {
                assert_eq!(path, "/tmp/x");
                assert_eq!(kind, "redis");
            }
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[test]
    fn test_not_found() {
        let store = VersionedStore::memory();
        assert!(matches!(store.get("x"), Err(StoreError::NotFound(k)) if k == "x"));
        assert!(matches!(store.value_with_version("x"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.version("x"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.stamp("x"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_value_with_version() {
        let store = VersionedStore::memory();
        store.save("k", "v1", "1").unwrap();
        store.save("k", "v2", "2").unwrap();
        assert_eq!(store.value_with_version("k").unwrap(), ("v2".to_string(), "2".to_string()));
        assert_eq!(store.version("k").unwrap(), "2");
    }

    #[test]
    fn test_save_stamps_current_time() {
        let store = VersionedStore::memory();
        let before = now_stamp();
        store.save("k", "v", "1").unwrap();
        let stamp = store.stamp("k").unwrap();
        assert!(stamp >= before && stamp <= now_stamp());
    }

    #[test]
    fn test_stamp_range() {
        assert!(StampRange::Since(5).contains(5));
        assert!(!StampRange::Since(5).contains(4));
        assert!(StampRange::Until(5).contains(5));
        assert!(!StampRange::Until(5).contains(6));
        assert_eq!(Page::new(2, 10).offset(), 20);
        assert_eq!(Page::new(usize::MAX, 2).offset(), usize::MAX);
    }

    #[test]
    fn test_kind_serde() {
        assert_eq!(serde_json::to_string(&StoreKind::File).unwrap(), "\"file\"");
        assert_eq!(StoreKind::Memory.to_string(), "memory");
    }
}
