//! Rule modules stored per folder path.
//!
//! A module saved under `a/b/` governs that folder; one saved under
//! `a/b/c.txt` governs a single file. [`FolderPolicy::fold_eval`] walks from
//! a file up through its parent folders until some module yields a
//! defined result.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::PaplError;
use crate::rules::{QueryResults, RuleEngine};
use crate::store::{StoreError, VersionedStore};

#[derive(Debug)]
struct CachedEngine {
    version: String,
    data: String,
    engine: RuleEngine,
}

#[derive(Debug)]
pub struct FolderPolicy {
    store: Arc<VersionedStore>,
    engines: Mutex<HashMap<String, CachedEngine>>,
}

impl FolderPolicy {
    pub fn new(store: Arc<VersionedStore>) -> Self {
        Self {
            store,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Store the module governing `path`.
    pub fn prepare(&self, path: &str, policy: &str, version: &str) -> Result<(), PaplError> {
        self.store.save(path, policy, version)?;
        Ok(())
    }

    /// Evaluate `query` with the module stored at exactly `path`. `None`
    /// when no module is stored there.
    pub fn eval(
        &self,
        query: &str,
        path: &str,
        input: &str,
        data: &str,
    ) -> Result<Option<QueryResults>, PaplError> {
        let (policy, version) = match self.store.value_with_version(path) {
            Ok(entry) => entry,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if policy.trim().is_empty() {
            return Ok(None);
        }

        let mut engines = self.engines.lock();
        let stale = engines
            .get(path)
            .map_or(true, |c| c.version != version || c.data != data);
        if stale {
            let mut engine = RuleEngine::new();
            engine.add_policy_from_string(path, &policy)?;
            if !data.trim().is_empty() {
                engine.add_data_from_string(data)?;
            }
            tracing::debug!(path, version = %version, "Compiled folder policy");
            engines.insert(
                path.to_string(),
                CachedEngine {
                    version,
                    data: data.to_string(),
                    engine,
                },
            );
        }

        let Some(cached) = engines.get_mut(path) else {
            return Ok(None);
        };
        cached
            .engine
            .add_input_json(if input.trim().is_empty() { "{}" } else { input })?;
        Ok(Some(cached.engine.eval_query(query)?))
    }

    /// Evaluate at `path`, then at each parent folder (`a/b/c.txt`,
    /// `a/b/`, `a/`) until a module yields a defined result.
    pub fn fold_eval(
        &self,
        query: &str,
        path: &str,
        input: &str,
        data: &str,
    ) -> Result<Option<QueryResults>, PaplError> {
        let mut current = path.to_string();
        loop {
            if let Some(results) = self.eval(query, &current, input, data)? {
                if !results.is_undefined() {
                    tracing::debug!(query, path, decided_at = %current, "Folder policy decided");
                    return Ok(Some(results));
                }
            }
            match parent_folder(&current) {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }
}

/// `a/b/c.txt` → `a/b/`, `a/b/` → `a/`, `a/` → none.
fn parent_folder(path: &str) -> Option<String> {
    let parent = Path::new(path).parent()?;
    if parent.as_os_str().is_empty() {
        return None;
    }
    Some(format!("{}/", parent.display()))
}
