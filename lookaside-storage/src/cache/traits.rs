//! Cache store traits and cacheable entity marker.
//!
//! This module defines the traits that must be implemented by cache stores
//! and entities that can be cached.

use std::collections::HashMap;

use async_trait::async_trait;
use lookaside_core::{Attachment, CacheError, EntityId, EntityKind, LookasideResult, User};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for types that can be cached.
///
/// # Implementation Requirements
///
/// - `entity_kind()` must return a consistent value for all instances
/// - `entity_id()` must return the identifier the entity was stored under;
///   the loader derives cache keys from it
/// - Implementations must be `Serialize` and `DeserializeOwned`; the probe
///   and the write-back share the JSON encoding
pub trait CacheableEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the entity kind for this cacheable.
    fn entity_kind() -> EntityKind;

    /// Get the identifier for this entity.
    fn entity_id(&self) -> EntityId;
}

/// Encode an entity as the cache value stored under `key`.
pub fn encode_entry<E: CacheableEntity>(key: &str, entity: &E) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(entity).map_err(|e| CacheError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Decode the cache value stored under `key`.
pub fn decode_entry<E: CacheableEntity>(key: &str, bytes: &[u8]) -> Result<E, CacheError> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Key-value store used as a lookaside cache.
///
/// Implementations must be safe to share between tasks. Each call is
/// expected to be atomic on its own; the loader adds no locking across
/// calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch every key that is present.
    ///
    /// Absent keys are simply missing from the returned map.
    async fn multi_get(&self, keys: &[String]) -> LookasideResult<HashMap<String, Vec<u8>>>;

    /// Store every entry, overwriting existing values.
    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>) -> LookasideResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> LookasideResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of keys found.
    pub hits: u64,
    /// Number of keys not found.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of `multi_set` batches written.
    pub writes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// IMPLEMENTATIONS FOR LOOKASIDE ENTITIES
// ============================================================================

impl CacheableEntity for Attachment {
    fn entity_kind() -> EntityKind {
        EntityKind::Attachment
    }

    fn entity_id(&self) -> EntityId {
        self.object.id
    }
}

impl CacheableEntity for User {
    fn entity_kind() -> EntityKind {
        EntityKind::User
    }

    fn entity_id(&self) -> EntityId {
        self.id
    }
}
