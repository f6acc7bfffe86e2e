//! Backing store abstraction: the durable source of truth.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use lookaside_core::{EntityId, EntityKind, LookasideResult, StorageError};

/// Batched read access to the durable store.
///
/// Implementations return whatever records exist for `ids`, in any order.
/// Identifiers with no record are simply absent from the result.
#[async_trait]
pub trait BackingStore<R: Send + 'static>: Send + Sync {
    /// Fetch all records of `kind` whose identifier is in `ids`.
    async fn fetch_batch(&self, kind: EntityKind, ids: &[EntityId]) -> LookasideResult<Vec<R>>;
}

// ============================================================================
// MOCK BACKING STORE
// ============================================================================

/// In-memory backing store that records every batch it serves.
///
/// Records come back in reverse request order so callers cannot depend on
/// the order of the result.
pub struct MockBackingStore<R> {
    records: Arc<RwLock<HashMap<EntityId, R>>>,
    calls: Arc<RwLock<Vec<(EntityKind, Vec<EntityId>)>>>,
    failure: Arc<RwLock<Option<StorageError>>>,
}

impl<R> Default for MockBackingStore<R> {
    fn default() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            failure: Arc::new(RwLock::new(None)),
        }
    }
}

impl<R> Clone for MockBackingStore<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            calls: Arc::clone(&self.calls),
            failure: Arc::clone(&self.failure),
        }
    }
}

impl<R: Clone> MockBackingStore<R> {
    /// Create a new mock backing store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: EntityId, record: R) -> LookasideResult<()> {
        self.records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(id, record);
        Ok(())
    }

    pub fn remove(&self, id: EntityId) -> LookasideResult<Option<R>> {
        Ok(self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&id))
    }

    /// Make every following fetch fail with `error` until cleared.
    pub fn fail_with(&self, error: Option<StorageError>) -> LookasideResult<()> {
        *self.failure.write().map_err(|_| StorageError::LockPoisoned)? = error;
        Ok(())
    }

    /// Every batch served so far, oldest first.
    pub fn calls(&self) -> Vec<(EntityKind, Vec<EntityId>)> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().map(|c| c.len()).unwrap_or(0)
    }

    /// How many times `id` was asked for, across all batches.
    pub fn times_fetched(&self, id: EntityId) -> usize {
        self.calls()
            .iter()
            .map(|(_, ids)| ids.iter().filter(|&&i| i == id).count())
            .sum()
    }
}

#[async_trait]
impl<R> BackingStore<R> for MockBackingStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn fetch_batch(&self, kind: EntityKind, ids: &[EntityId]) -> LookasideResult<Vec<R>> {
        self.calls
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .push((kind, ids.to_vec()));

        if let Some(error) = self
            .failure
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .clone()
        {
            return Err(error.into());
        }

        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| records.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_present_records_in_reverse() {
        let store = MockBackingStore::new();
        store.insert(1, "one").unwrap();
        store.insert(3, "three").unwrap();

        let records = store
            .fetch_batch(EntityKind::User, &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(records, vec!["three", "one"]);
        assert_eq!(store.calls(), vec![(EntityKind::User, vec![1, 2, 3])]);
        assert_eq!(store.times_fetched(2), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_is_surfaced() {
        let store: MockBackingStore<&str> = MockBackingStore::new();
        store
            .fail_with(Some(StorageError::ConnectionFailed {
                reason: "refused".to_string(),
            }))
            .unwrap();

        let err = store.fetch_batch(EntityKind::User, &[1]).await.unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(store.call_count(), 1);
    }
}
