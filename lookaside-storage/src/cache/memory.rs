//! In-process cache store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use lookaside_core::{CacheError, LookasideResult};

use super::traits::{CacheStats, CacheStore};

/// `HashMap`-backed cache store for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    stats: RwLock<CacheStats>,
}

fn poisoned() -> CacheError {
    CacheError::Backend {
        reason: "cache lock poisoned".to_string(),
    }
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes stored under `key`, if any.
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Store raw bytes, bypassing statistics.
    pub fn insert_raw(&self, key: impl Into<String>, value: Vec<u8>) -> LookasideResult<()> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.into(), value);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> LookasideResult<()> {
        self.entries.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn multi_get(&self, keys: &[String]) -> LookasideResult<HashMap<String, Vec<u8>>> {
        let found: HashMap<String, Vec<u8>> = {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            keys.iter()
                .filter_map(|key| entries.get(key).map(|v| (key.clone(), v.clone())))
                .collect()
        };

        if let Ok(mut stats) = self.stats.write() {
            stats.hits += found.len() as u64;
            stats.misses += (keys.len() - found.len()) as u64;
        }
        Ok(found)
    }

    async fn multi_set(&self, new_entries: Vec<(String, Vec<u8>)>) -> LookasideResult<()> {
        let entry_count = {
            let mut entries = self.entries.write().map_err(|_| poisoned())?;
            entries.extend(new_entries);
            entries.len() as u64
        };

        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = entry_count;
            stats.writes += 1;
        }
        Ok(())
    }

    async fn stats(&self) -> LookasideResult<CacheStats> {
        let mut stats = self.stats.read().map_err(|_| poisoned())?.clone();
        stats.entry_count = self.len() as u64;
        Ok(stats)
    }
}
