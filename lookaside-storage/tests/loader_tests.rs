//! End-to-end tests for the batched cache-aside loader.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lookaside_core::{
    AttachmentDecoder, EntityDecoder, EntityId, EntityKind, FilterError, LookasideResult,
    StorageError, User, UserDecoder, UserRecord, FILTER_AFTER_GET_USERS,
};
use lookaside_storage::{
    attachment_loader, user_loader, BackingStore, CacheAsideLoader, CacheKeyRule, CacheStore,
    FilterChain, FilterContext, HookRegistry, InMemoryCacheStore, LmdbCacheStore,
    MockBackingStore, Slots,
};
use lookaside_test_utils::assertions::*;
use lookaside_test_utils::fixtures::*;
use lookaside_test_utils::{init_test_tracing, wait_until, FlakyCacheStore};
use proptest::prelude::*;

type TestUserLoader = CacheAsideLoader<FlakyCacheStore, MockBackingStore<UserRecord>, UserDecoder>;

fn loader_with(ids: &[EntityId]) -> (TestUserLoader, MockBackingStore<UserRecord>) {
    init_test_tracing();
    let store = user_store(ids);
    let loader = CacheAsideLoader::new(
        Arc::new(FlakyCacheStore::new()),
        Arc::new(store.clone()),
        UserDecoder,
    );
    (loader, store)
}

/// Put the decoded user for `id` straight into the cache.
fn seed_cache(cache: &FlakyCacheStore, id: EntityId) {
    let user = UserDecoder.decode(user_record(id)).unwrap();
    cache
        .inner()
        .insert_raw(format!("wp_user_{}", id), serde_json::to_vec(&user).unwrap())
        .unwrap();
}

fn ids_of(users: &[Arc<User>]) -> Vec<EntityId> {
    users.iter().map(|u| u.id).collect()
}

#[tokio::test]
async fn test_empty_request_touches_nothing() {
    let (loader, store) = loader_with(&[1]);

    let users = loader.load(&[]).await.unwrap();

    assert!(users.is_empty());
    assert_eq!(store.call_count(), 0);
    assert_eq!(loader.cache().get_calls(), 0);
}

#[tokio::test]
async fn test_all_cached_makes_no_backing_call() {
    let (loader, store) = loader_with(&[]);
    seed_cache(loader.cache(), 1);
    seed_cache(loader.cache(), 2);

    let users = loader.load(&[2, 1]).await.unwrap();

    assert_eq!(ids_of(&users), vec![2, 1]);
    assert_eq!(store.call_count(), 0);
    assert_eq!(loader.cache().set_calls(), 0);
}

#[tokio::test]
async fn test_duplicates_fetched_once_and_shared() {
    let (loader, store) = loader_with(&[7, 3]);

    let users = loader.load(&[7, 3, 7]).await.unwrap();

    assert_eq!(ids_of(&users), vec![7, 3, 7]);
    assert!(Arc::ptr_eq(&users[0], &users[2]));
    assert_eq!(store.call_count(), 1);
    assert_eq!(store.calls()[0], (EntityKind::User, vec![7, 3]));
}

#[tokio::test]
async fn test_mixed_hits_and_misses_keep_request_order() {
    let (loader, store) = loader_with(&[1, 3]);
    seed_cache(loader.cache(), 2);

    let users = loader.load(&[3, 2, 1]).await.unwrap();

    assert_eq!(ids_of(&users), vec![3, 2, 1]);
    assert_eq!(store.calls()[0].1, vec![3, 1]);
    assert_eq!(store.times_fetched(2), 0);
}

#[tokio::test]
async fn test_unresolved_identifiers_fail_whole_call() {
    let (loader, _store) = loader_with(&[2]);
    seed_cache(loader.cache(), 1);

    let result = loader.load(&[1, 2, 3]).await;

    assert_missing(&result, &[3]);
}

#[tokio::test]
async fn test_missing_duplicates_reported_per_position() {
    let (loader, _store) = loader_with(&[]);

    let result = loader.load(&[9, 4, 9]).await;

    assert_missing(&result, &[9, 4, 9]);
}

#[tokio::test]
async fn test_fetched_entities_written_back() {
    let (loader, store) = loader_with(&[5, 6]);

    loader.load(&[5, 6]).await.unwrap();

    let cache = loader.cache();
    let refilled = wait_until(Duration::from_secs(2), || {
        cache.inner().contains("wp_user_5") && cache.inner().contains("wp_user_6")
    })
    .await;
    assert!(refilled, "write-back never landed");

    let again = loader.load(&[6, 5]).await.unwrap();
    assert_eq!(ids_of(&again), vec![6, 5]);
    assert_eq!(store.call_count(), 1);
}

#[tokio::test]
async fn test_partial_fetch_still_writes_back_found_entities() {
    let (loader, _store) = loader_with(&[1]);

    assert_missing(&loader.load(&[1, 2]).await, &[2]);

    let cache = loader.cache();
    assert!(wait_until(Duration::from_secs(2), || cache.inner().contains("wp_user_1")).await);
    assert!(!cache.inner().contains("wp_user_2"));
}

#[tokio::test]
async fn test_refill_disabled_leaves_cache_alone() {
    let (loader, _store) = loader_with(&[1]);
    let loader = loader.with_refill(false);

    loader.load(&[1]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(loader.cache().set_calls(), 0);
    assert!(loader.cache().inner().is_empty());
}

#[tokio::test]
async fn test_cached_values_equal_fresh_values() {
    let (loader, _store) = loader_with(&[4]);

    let fresh = loader.load(&[4]).await.unwrap();
    let cache = loader.cache();
    assert!(wait_until(Duration::from_secs(2), || cache.inner().contains("wp_user_4")).await);
    let cached = loader.load(&[4]).await.unwrap();

    assert_eq!(*fresh[0], *cached[0]);
}

#[tokio::test]
async fn test_probe_failure_degrades_to_backing_store() {
    let (loader, store) = loader_with(&[1, 2]);
    seed_cache(loader.cache(), 1);
    loader.cache().fail_gets(true);

    let users = loader.load(&[1, 2]).await.unwrap();

    assert_eq!(ids_of(&users), vec![1, 2]);
    assert_eq!(store.calls()[0].1, vec![1, 2]);
}

#[tokio::test]
async fn test_write_back_failure_is_invisible() {
    let (loader, _store) = loader_with(&[1]);
    loader.cache().fail_sets(true);

    let users = loader.load(&[1]).await.unwrap();

    assert_eq!(ids_of(&users), vec![1]);
    let cache = loader.cache();
    assert!(wait_until(Duration::from_secs(2), || cache.set_calls() == 1).await);
    assert!(cache.inner().is_empty());
}

#[tokio::test]
async fn test_unreadable_cache_entry_is_a_miss() {
    let (loader, store) = loader_with(&[8]);
    loader
        .cache()
        .inner()
        .insert_raw("wp_user_8", b"not json".to_vec())
        .unwrap();

    let users = loader.load(&[8]).await.unwrap();

    assert_eq!(ids_of(&users), vec![8]);
    assert_eq!(store.times_fetched(8), 1);
}

#[tokio::test]
async fn test_backing_failure_is_surfaced() {
    let (loader, store) = loader_with(&[1]);
    store
        .fail_with(Some(StorageError::ConnectionFailed {
            reason: "connection refused".to_string(),
        }))
        .unwrap();

    let result = loader.load(&[1]).await;

    assert_storage_error(&result);
    assert_eq!(loader.cache().set_calls(), 0);
}

#[tokio::test]
async fn test_decode_failure_is_surfaced() {
    init_test_tracing();
    let store = attachment_store(&[1]);
    let mut broken = attachment_record(2);
    broken.post_type = "page".to_string();
    store.insert(2, broken).unwrap();

    let loader = attachment_loader(
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(store),
        &test_config(),
        &HookRegistry::new(),
    );

    assert_decode_error(&loader.load(&[1, 2]).await);
}

/// Backing store that answers every batch with one row nobody asked for.
struct OverEagerStore {
    inner: MockBackingStore<UserRecord>,
    extra: EntityId,
}

#[async_trait]
impl BackingStore<UserRecord> for OverEagerStore {
    async fn fetch_batch(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> LookasideResult<Vec<UserRecord>> {
        let mut records = self.inner.fetch_batch(kind, ids).await?;
        records.push(user_record(self.extra));
        Ok(records)
    }
}

#[tokio::test]
async fn test_unrequested_record_is_ignored_and_not_written_back() {
    init_test_tracing();
    let loader = CacheAsideLoader::new(
        Arc::new(FlakyCacheStore::new()),
        Arc::new(OverEagerStore {
            inner: user_store(&[1, 2]),
            extra: 999,
        }),
        UserDecoder,
    );

    let users = loader.load(&[1, 2, 1]).await.unwrap();
    assert_eq!(ids_of(&users), vec![1, 2, 1]);

    let cache = loader.cache();
    assert!(
        wait_until(Duration::from_secs(2), || {
            cache.inner().contains("wp_user_1") && cache.inner().contains("wp_user_2")
        })
        .await
    );
    assert!(wait_until(Duration::from_secs(2), || cache.set_calls() == 1).await);
    assert!(!cache.inner().contains("wp_user_999"));
    assert_eq!(cache.inner().len(), 2);
}

// ============================================================================
// FILTERS
// ============================================================================

fn recording_chain(log: &Arc<Mutex<Vec<&'static str>>>) -> FilterChain<User> {
    let first = Arc::clone(log);
    let second = Arc::clone(log);
    FilterChain::new(FILTER_AFTER_GET_USERS)
        .with(move |_: &FilterContext<'_>, results: Slots<User>| {
            first.lock().unwrap().push("first");
            Ok(results)
        })
        .with(move |_: &FilterContext<'_>, results: Slots<User>| {
            second.lock().unwrap().push("second");
            Ok(results)
        })
}

#[tokio::test]
async fn test_filters_run_once_in_order_on_miss() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (loader, _store) = loader_with(&[1, 2]);
    let loader = loader.with_filters(recording_chain(&log));

    loader.load(&[1, 2, 1]).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_filters_skipped_when_everything_hits() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (loader, _store) = loader_with(&[]);
    let loader = loader.with_filters(recording_chain(&log));
    seed_cache(loader.cache(), 1);

    loader.load(&[1]).await.unwrap();

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_filters_see_cache_hits_and_request() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let (loader, _store) = loader_with(&[2]);
    seed_cache(loader.cache(), 1);
    let loader = loader.with_filters(FilterChain::new(FILTER_AFTER_GET_USERS).with(
        move |ctx: &FilterContext<'_>, results: Slots<User>| {
            let ids: Vec<Option<EntityId>> =
                results.iter().map(|s| s.as_ref().map(|u| u.id)).collect();
            sink.lock().unwrap().push((ctx.requested.to_vec(), ids));
            Ok(results)
        },
    ));

    loader.load(&[1, 2]).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(vec![1, 2], vec![Some(1), Some(2)])]
    );
}

#[tokio::test]
async fn test_filter_replacement_is_returned() {
    let (loader, _store) = loader_with(&[1]);
    let loader = loader.with_filters(FilterChain::new(FILTER_AFTER_GET_USERS).with(
        |_: &FilterContext<'_>, results: Slots<User>| {
            Ok(results
                .into_iter()
                .map(|slot| {
                    slot.map(|user| {
                        let mut user = (*user).clone();
                        user.name = user.name.to_uppercase();
                        Arc::new(user)
                    })
                })
                .collect())
        },
    ));

    let users = loader.load(&[1]).await.unwrap();

    assert_eq!(users[0].name, "USER 1");
}

#[tokio::test]
async fn test_filter_can_fill_unresolved_slot() {
    let (loader, _store) = loader_with(&[1]);
    let loader = loader.with_filters(FilterChain::new(FILTER_AFTER_GET_USERS).with(
        |_: &FilterContext<'_>, results: Slots<User>| {
            let fallback = results.iter().flatten().next().cloned();
            Ok(results
                .into_iter()
                .map(|slot| slot.or_else(|| fallback.clone()))
                .collect())
        },
    ));

    let users = loader.load(&[1, 99]).await.unwrap();

    assert_eq!(ids_of(&users), vec![1, 1]);
}

#[tokio::test]
async fn test_filter_error_returns_no_entities() {
    let (loader, _store) = loader_with(&[1]);
    let loader = loader.with_filters(FilterChain::new(FILTER_AFTER_GET_USERS).with(
        |ctx: &FilterContext<'_>, _: Slots<User>| {
            Err(FilterError::CallbackFailed {
                hook: ctx.hook.to_string(),
                reason: "blocked".to_string(),
            }
            .into())
        },
    ));

    assert_filter_error(&loader.load(&[1]).await);
}

#[tokio::test]
async fn test_registry_wires_user_loader() {
    init_test_tracing();
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    let mut hooks = HookRegistry::new();
    hooks.register::<User, _>(
        FILTER_AFTER_GET_USERS,
        move |_: &FilterContext<'_>, results: Slots<User>| {
            *counter.lock().unwrap() += 1;
            Ok(results)
        },
    );

    let loader = user_loader(
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(user_store(&[1])),
        &test_config().with_refill(false),
        &hooks,
    );
    assert!(!loader.filters().is_empty());

    loader.load(&[1]).await.unwrap();
    assert_eq!(*calls.lock().unwrap(), 1);
}

// ============================================================================
// KEYS AND BACKENDS
// ============================================================================

#[tokio::test]
async fn test_custom_key_rule_is_used_for_probe_and_refill() {
    let (loader, _store) = loader_with(&[3]);
    let loader = loader.with_key_rule(CacheKeyRule::new("site2_user"));

    loader.load(&[3]).await.unwrap();

    let cache = loader.cache();
    assert!(wait_until(Duration::from_secs(2), || cache.inner().contains("site2_user_3")).await);
    assert!(!cache.inner().contains("wp_user_3"));
}

#[tokio::test]
async fn test_attachment_loader_over_lmdb() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(LmdbCacheStore::new(dir.path(), 16).unwrap());
    let store = attachment_store(&[10, 11]);

    let loader = attachment_loader(
        Arc::clone(&cache),
        Arc::new(store.clone()),
        &test_config(),
        &HookRegistry::new(),
    );

    let attachments = loader.load(&[11, 10]).await.unwrap();
    assert_eq!(attachments[0].id(), 11);
    assert_eq!(
        attachments[1].url,
        "https://example.com/wp-content/uploads/2020/02/file-10.png"
    );

    let keys = vec!["wp_attachment_10".to_string(), "wp_attachment_11".to_string()];
    let landed = {
        let mut landed = false;
        for _ in 0..200 {
            if cache.multi_get(&keys).await.unwrap().len() == 2 {
                landed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        landed
    };
    assert!(landed, "write-back never landed in LMDB");

    let again = loader.load(&[10]).await.unwrap();
    assert_eq!(*again[0], *attachments[1]);
    assert_eq!(store.call_count(), 1);
}

#[test]
fn test_loaders_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AttachmentDecoder>();
    assert_send_sync::<TestUserLoader>();
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_results_follow_request(
        request in lookaside_test_utils::generators::arb_request(),
        cached in prop::collection::vec(1i64..=12, 0..6),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (loader, store) = loader_with(&(1..=12).collect::<Vec<_>>());
            for &id in &cached {
                seed_cache(loader.cache(), id);
            }

            let users = loader.load(&request).await.unwrap();

            prop_assert_eq!(ids_of(&users), request.clone());
            for (i, a) in request.iter().enumerate() {
                for (j, b) in request.iter().enumerate() {
                    if a == b {
                        prop_assert!(Arc::ptr_eq(&users[i], &users[j]));
                    }
                }
            }
            prop_assert!(store.call_count() <= 1);
            for id in 1..=12 {
                prop_assert!(store.times_fetched(id) <= 1);
                if cached.contains(&id) {
                    prop_assert_eq!(store.times_fetched(id), 0);
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
