//! Error types for lookaside operations

use crate::{EntityId, EntityKind};
use thiserror::Error;

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Query failed for {kind}: {reason}")]
    QueryFailed { kind: EntityKind, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Record decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed {kind} record {id}: {reason}")]
    MalformedRecord {
        kind: EntityKind,
        id: EntityId,
        reason: String,
    },

    #[error("Malformed serialized value at byte {offset}: {reason}")]
    Serialized { offset: usize, reason: String },
}

/// Filter chain errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Filter on '{hook}' failed: {reason}")]
    CallbackFailed { hook: String, reason: String },

    #[error("Filter on '{hook}' returned {got} results, expected {expected}")]
    LengthMismatch {
        hook: String,
        expected: usize,
        got: usize,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Cache store errors.
///
/// The loader never surfaces these to its callers; they only degrade a load
/// to a cache miss or drop a write-back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Failed to serialize cache value for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Failed to deserialize cache value for {key}: {reason}")]
    Deserialization { key: String, reason: String },
}

/// Identifiers that neither the cache nor the backing store could resolve.
///
/// Built once, after the whole pipeline ran, in request order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Missing resources: {ids:?}")]
pub struct MissingResourcesError {
    ids: Vec<EntityId>,
}

impl MissingResourcesError {
    pub fn new(ids: Vec<EntityId>) -> Self {
        Self { ids }
    }

    /// Unresolved identifiers in request order.
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<EntityId> {
        self.ids
    }
}

/// Master error type for all lookaside errors.
#[derive(Debug, Clone, Error)]
pub enum LookasideError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    MissingResources(#[from] MissingResourcesError),
}

impl LookasideError {
    /// Unresolved identifiers when this is a missing-resources error.
    pub fn missing_ids(&self) -> Option<&[EntityId]> {
        match self {
            LookasideError::MissingResources(err) => Some(err.ids()),
            _ => None,
        }
    }
}

/// Result type alias for lookaside operations.
pub type LookasideResult<T> = Result<T, LookasideError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_query_failed() {
        let err = StorageError::QueryFailed {
            kind: EntityKind::Attachment,
            reason: "relation does not exist".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Query failed"));
        assert!(msg.contains("attachment"));
        assert!(msg.contains("relation does not exist"));
    }

    #[test]
    fn test_decode_error_display_malformed_record() {
        let err = DecodeError::MalformedRecord {
            kind: EntityKind::User,
            id: 42,
            reason: "bad date".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("user record 42"));
        assert!(msg.contains("bad date"));
    }

    #[test]
    fn test_filter_error_display_length_mismatch() {
        let err = FilterError::LengthMismatch {
            hook: "after_get_users".to_string(),
            expected: 3,
            got: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("after_get_users"));
        assert!(msg.contains("returned 2"));
        assert!(msg.contains("expected 3"));
    }

    #[test]
    fn test_missing_resources_display_keeps_order() {
        let err = MissingResourcesError::new(vec![9, 3, 9]);
        assert_eq!(err.ids(), &[9, 3, 9]);
        assert_eq!(format!("{}", err), "Missing resources: [9, 3, 9]");
    }

    #[test]
    fn test_lookaside_error_from_variants() {
        let storage = LookasideError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, LookasideError::Storage(_)));

        let config = LookasideError::from(ConfigError::MissingRequired {
            field: "siteurl".to_string(),
        });
        assert!(matches!(config, LookasideError::Config(_)));

        let cache = LookasideError::from(CacheError::Backend {
            reason: "down".to_string(),
        });
        assert!(matches!(cache, LookasideError::Cache(_)));
        assert!(cache.missing_ids().is_none());

        let missing = LookasideError::from(MissingResourcesError::new(vec![3]));
        assert_eq!(missing.missing_ids(), Some(&[3][..]));
    }
}
