use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::store::errors::StoreError;
use crate::store::{Entry, Page, StampRange, StoreBackend};

/// Process-local backend. Contents die with the instance.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreBackend for MemoryBackend {
    fn save(&self, key: &str, value: &str, version: &str, stamp: i64) -> Result<(), StoreError> {
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                version: version.to_string(),
                stamp,
            },
        );
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn keys_in(&self, range: StampRange, page: Option<Page>) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read();
        let matching = entries
            .iter()
            .filter(|(_, e)| range.contains(e.stamp))
            .map(|(k, _)| k.clone());
        Ok(match page {
            Some(page) => matching.skip(page.offset()).take(page.size).collect(),
            None => matching.collect(),
        })
    }

    fn evict(&self, range: StampRange) -> Result<usize, StoreError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !range.contains(e.stamp));
        Ok(before - entries.len())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
