//! Lookaside Test Utilities
//!
//! Centralized test infrastructure for the lookaside workspace:
//! - Proptest generators for identifiers and records
//! - Cache stores that fail on demand
//! - Test fixtures for common scenarios
//! - Custom assertions for lookaside-specific errors

// Re-export mock storage from its source crate
pub use lookaside_storage::{InMemoryCacheStore, MockBackingStore};

// Re-export core types for convenience
pub use lookaside_core::{
    Attachment, CacheError, ConfigError, DecodeError, EntityId, EntityKind, FilterError,
    LoaderConfig, LookasideError, LookasideResult, ObjectRecord, SiteOptions, StorageError,
    Timestamp, User, UserRecord, ATTACHMENT_METADATA_KEY,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use lookaside_storage::{CacheStats, CacheStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lookaside_storage=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
///
/// Returns whether the condition was observed.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// CACHE STORES
// ============================================================================

/// In-memory cache store whose reads and writes can be made to fail.
///
/// Counts every call so tests can tell whether the cache was touched.
#[derive(Debug, Default)]
pub struct FlakyCacheStore {
    inner: InMemoryCacheStore,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
}

impl FlakyCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }
}

#[async_trait]
impl CacheStore for FlakyCacheStore {
    async fn multi_get(&self, keys: &[String]) -> LookasideResult<HashMap<String, Vec<u8>>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(CacheError::Backend {
                reason: "injected get failure".to_string(),
            }
            .into());
        }
        self.inner.multi_get(keys).await
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>) -> LookasideResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(CacheError::Backend {
                reason: "injected set failure".to_string(),
            }
            .into());
        }
        self.inner.multi_set(entries).await
    }

    async fn stats(&self) -> LookasideResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating lookaside inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate an identifier from a small pool so duplicates are common.
    pub fn arb_small_id() -> impl Strategy<Value = EntityId> {
        1i64..=12
    }

    /// Generate a non-empty request that may repeat identifiers.
    pub fn arb_request() -> impl Strategy<Value = Vec<EntityId>> {
        prop::collection::vec(arb_small_id(), 1..24)
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2005-2030)
        (1104537600i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate a UserRecord with the given id.
    pub fn arb_user_record(id: EntityId) -> impl Strategy<Value = UserRecord> {
        ("[a-z]{3,10}", "[A-Z][a-z]{2,8} [A-Z][a-z]{2,8}", arb_timestamp()).prop_map(
            move |(slug, name, registered)| UserRecord {
                id,
                email: format!("{}@example.com", slug),
                website: format!("https://{}.example.com", slug),
                slug,
                name,
                description: String::new(),
                registered,
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Site options pointing at `https://example.com`.
    pub fn test_site() -> SiteOptions {
        SiteOptions::new("https://example.com")
    }

    /// A valid loader configuration with write-back enabled.
    pub fn test_config() -> LoaderConfig {
        LoaderConfig::default().with_site(test_site())
    }

    /// A user row for `id`.
    pub fn user_record(id: EntityId) -> UserRecord {
        UserRecord {
            id,
            slug: format!("user-{}", id),
            name: format!("User {}", id),
            description: format!("Description of user {}", id),
            email: format!("User{}@Example.com", id),
            website: format!("https://user{}.example.com", id),
            registered: Utc
                .with_ymd_and_hms(2015, 6, 1, 12, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    /// PHP-serialized metadata for a 640x480 image named `file`.
    pub fn attachment_metadata(file: &str) -> String {
        format!(
            "a:4:{{s:5:\"width\";i:640;s:6:\"height\";i:480;s:4:\"file\";s:{}:\"{}\";s:10:\"image_meta\";a:2:{{s:7:\"caption\";s:0:\"\";s:5:\"title\";s:3:\"Alt\";}}}}",
            file.len(),
            file
        )
    }

    /// An attachment post row for `id` with well-formed metadata.
    pub fn attachment_record(id: EntityId) -> ObjectRecord {
        let mut meta = BTreeMap::new();
        meta.insert(
            ATTACHMENT_METADATA_KEY.to_string(),
            attachment_metadata(&format!("file-{}.png", id)),
        );
        ObjectRecord {
            id,
            date: Utc
                .with_ymd_and_hms(2020, 2, 3, 4, 5, 6)
                .single()
                .unwrap_or_else(Utc::now),
            title: format!("Attachment {}", id),
            slug: format!("attachment-{}", id),
            post_type: "attachment".to_string(),
            mime_type: "image/png".to_string(),
            guid: format!("https://example.com/?attachment_id={}", id),
            excerpt: String::new(),
            meta,
        }
    }

    /// A mock backing store holding a user row for each of `ids`.
    pub fn user_store(ids: &[EntityId]) -> MockBackingStore<UserRecord> {
        let store = MockBackingStore::new();
        for &id in ids {
            let _ = store.insert(id, user_record(id));
        }
        store
    }

    /// A mock backing store holding an attachment row for each of `ids`.
    pub fn attachment_store(ids: &[EntityId]) -> MockBackingStore<ObjectRecord> {
        let store = MockBackingStore::new();
        for &id in ids {
            let _ = store.insert(id, attachment_record(id));
        }
        store
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for lookaside-specific validation.

    use super::*;

    /// Assert that a LookasideResult is a MissingResources error naming
    /// exactly `expected`, in order.
    #[track_caller]
    pub fn assert_missing<T: std::fmt::Debug>(result: &LookasideResult<T>, expected: &[EntityId]) {
        match result {
            Err(LookasideError::MissingResources(err)) => {
                assert_eq!(err.ids(), expected, "Wrong identifiers in MissingResources");
            }
            other => panic!("Expected MissingResources {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that a LookasideResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &LookasideResult<T>) {
        match result {
            Err(LookasideError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a LookasideResult is a Decode error.
    #[track_caller]
    pub fn assert_decode_error<T: std::fmt::Debug>(result: &LookasideResult<T>) {
        match result {
            Err(LookasideError::Decode(_)) => {}
            other => panic!("Expected Decode error, got: {:?}", other),
        }
    }

    /// Assert that a LookasideResult is a Filter error.
    #[track_caller]
    pub fn assert_filter_error<T: std::fmt::Debug>(result: &LookasideResult<T>) {
        match result {
            Err(LookasideError::Filter(_)) => {}
            other => panic!("Expected Filter error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use lookaside_core::{AttachmentDecoder, EntityDecoder};

    #[test]
    fn test_attachment_fixture_decodes() {
        let decoder = AttachmentDecoder::new(&test_site());
        let attachment = decoder.decode(attachment_record(5)).unwrap();
        assert_eq!(attachment.file_name, "file-5.png");
        assert_eq!(attachment.alt_text, "Alt");
        assert_eq!(attachment.width, Some(640));
    }

    #[tokio::test]
    async fn test_flaky_cache_store_injects_failures() {
        let cache = FlakyCacheStore::new();
        cache.fail_gets(true);
        assert!(cache.multi_get(&["k".to_string()]).await.is_err());
        cache.fail_gets(false);
        assert!(cache.multi_get(&["k".to_string()]).await.is_ok());
        assert_eq!(cache.get_calls(), 2);
    }
}
