//! Batched cache-aside loader.
//!
//! One call to [`CacheAsideLoader::load`] runs these stages in order:
//!
//! 1. Probe the cache for every distinct key of the request.
//! 2. Collect the identifiers whose key missed (once per key).
//! 3. Fetch all misses from the backing store in one batch.
//! 4. Decode each record and scatter it into every slot of its key.
//! 5. Run the filter chain, if anything missed.
//! 6. Spawn a detached write-back of the fetched entities.
//! 7. Fail with the unresolved identifiers if any slot is still empty.
//!
//! Cache failures never reach the caller: a failed probe is an all-miss and
//! a failed write-back is logged and dropped.

use std::sync::Arc;

use lookaside_core::{
    Attachment, AttachmentDecoder, EntityDecoder, EntityId, EntityKind, LoaderConfig,
    LookasideResult, MissingResourcesError, ObjectRecord, User, UserDecoder, UserRecord,
};

use crate::backing::BackingStore;
use crate::cache::{
    decode_entry, encode_entry, CacheKeyRule, CacheStore, CacheableEntity, KeyIndex,
};
use crate::filter::{FilterChain, FilterContext, HookRegistry, Slots};

/// Loads entities of one kind through a cache, falling back to a backing
/// store in a single batch.
///
/// # Type Parameters
///
/// - `C`: the cache store probed first and refilled afterwards
/// - `B`: the backing store queried for misses
/// - `D`: the decoder turning backing-store records into entities
pub struct CacheAsideLoader<C, B, D>
where
    C: CacheStore + 'static,
    D: EntityDecoder,
    D::Entity: CacheableEntity,
    B: BackingStore<D::Record>,
{
    kind: EntityKind,
    key_rule: CacheKeyRule,
    cache: Arc<C>,
    store: Arc<B>,
    decoder: D,
    filters: FilterChain<D::Entity>,
    refill_enabled: bool,
}

impl<C, B, D> CacheAsideLoader<C, B, D>
where
    C: CacheStore + 'static,
    D: EntityDecoder,
    D::Entity: CacheableEntity,
    B: BackingStore<D::Record>,
{
    /// Create a loader with the default key rule and hook for the entity
    /// kind, no filters, and write-back enabled.
    pub fn new(cache: Arc<C>, store: Arc<B>, decoder: D) -> Self {
        let kind = <D::Entity as CacheableEntity>::entity_kind();
        Self {
            kind,
            key_rule: CacheKeyRule::for_kind(kind),
            cache,
            store,
            decoder,
            filters: FilterChain::new(kind.filter_hook()),
            refill_enabled: true,
        }
    }

    pub fn with_key_rule(mut self, key_rule: CacheKeyRule) -> Self {
        self.key_rule = key_rule;
        self
    }

    pub fn with_filters(mut self, filters: FilterChain<D::Entity>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_refill(mut self, enabled: bool) -> Self {
        self.refill_enabled = enabled;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn key_rule(&self) -> &CacheKeyRule {
        &self.key_rule
    }

    pub fn filters(&self) -> &FilterChain<D::Entity> {
        &self.filters
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Load one entity per identifier, in request order.
    ///
    /// Repeated identifiers share one `Arc`. If any identifier cannot be
    /// resolved the whole call fails with
    /// [`LookasideError::MissingResources`](lookaside_core::LookasideError::MissingResources)
    /// naming every unresolved identifier, and no entities are returned.
    pub async fn load(&self, ids: &[EntityId]) -> LookasideResult<Vec<Arc<D::Entity>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let index = KeyIndex::build(ids, &self.key_rule);
        let mut slots: Slots<D::Entity> = vec![None; ids.len()];

        self.probe(&index, &mut slots).await;

        let missed: Vec<EntityId> = index
            .iter()
            .filter(|(_, positions)| slots[positions[0]].is_none())
            .map(|(_, positions)| ids[positions[0]])
            .collect();

        tracing::debug!(
            kind = %self.kind,
            requested = ids.len(),
            keys = index.len(),
            misses = missed.len(),
            "Probed cache"
        );

        if !missed.is_empty() {
            let fetched = self.fetch_and_scatter(&index, &missed, &mut slots).await?;

            let ctx = FilterContext {
                hook: self.filters.hook(),
                kind: self.kind,
                requested: ids,
            };
            slots = self.filters.apply(&ctx, slots)?;

            if self.refill_enabled && !fetched.is_empty() {
                self.spawn_refill(fetched);
            }
        }

        let unresolved: Vec<EntityId> = slots
            .iter()
            .zip(ids)
            .filter(|(slot, _)| slot.is_none())
            .map(|(_, &id)| id)
            .collect();
        if !unresolved.is_empty() {
            tracing::debug!(kind = %self.kind, missing = ?unresolved, "Unresolved identifiers");
            return Err(MissingResourcesError::new(unresolved).into());
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Fill slots from the cache. Failures degrade to misses.
    async fn probe(&self, index: &KeyIndex, slots: &mut Slots<D::Entity>) {
        let found = match self.cache.multi_get(index.keys()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "Cache probe failed, treating as all-miss");
                return;
            }
        };

        for (key, positions) in index.iter() {
            let Some(bytes) = found.get(key) else {
                continue;
            };
            match decode_entry::<D::Entity>(key, bytes) {
                Ok(entity) => {
                    let entity = Arc::new(entity);
                    for &position in positions {
                        slots[position] = Some(Arc::clone(&entity));
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = %self.kind, error = %e, "Unreadable cache entry, treating as miss");
                }
            }
        }
    }

    /// Fetch the misses in one batch, decode them, and scatter each entity
    /// under the key derived from its own identifier.
    ///
    /// Returns the scattered entities with their keys, for write-back.
    async fn fetch_and_scatter(
        &self,
        index: &KeyIndex,
        missed: &[EntityId],
        slots: &mut Slots<D::Entity>,
    ) -> LookasideResult<Vec<(String, Arc<D::Entity>)>> {
        let records = self.store.fetch_batch(self.kind, missed).await?;
        tracing::debug!(
            kind = %self.kind,
            requested = missed.len(),
            returned = records.len(),
            "Fetched misses from backing store"
        );

        let mut fetched = Vec::with_capacity(records.len());
        for record in records {
            let entity = Arc::new(self.decoder.decode(record)?);
            let key = self.key_rule.key(entity.entity_id());
            match index.positions(&key) {
                Some(positions) => {
                    for &position in positions {
                        slots[position] = Some(Arc::clone(&entity));
                    }
                    fetched.push((key, entity));
                }
                None => {
                    tracing::warn!(
                        kind = %self.kind,
                        key = %key,
                        "Fetched record matches no requested key, dropping it"
                    );
                }
            }
        }
        Ok(fetched)
    }

    /// Write fetched entities back to the cache without waiting.
    ///
    /// Nothing about the outcome reaches the caller.
    fn spawn_refill(&self, fetched: Vec<(String, Arc<D::Entity>)>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(kind = %self.kind, "No async runtime available, skipping cache refill");
            return;
        };

        let cache = Arc::clone(&self.cache);
        let kind = self.kind;
        runtime.spawn(async move {
            let mut entries = Vec::with_capacity(fetched.len());
            for (key, entity) in fetched {
                match encode_entry(&key, entity.as_ref()) {
                    Ok(bytes) => entries.push((key, bytes)),
                    Err(e) => {
                        tracing::warn!(%kind, error = %e, "Failed to serialize entity for cache");
                    }
                }
            }
            if entries.is_empty() {
                return;
            }

            let count = entries.len();
            match cache.multi_set(entries).await {
                Ok(()) => tracing::debug!(%kind, count, "Refilled cache"),
                Err(e) => tracing::warn!(%kind, count, error = %e, "Cache refill failed"),
            }
        });
    }
}

// ============================================================================
// ENTITY LOADERS
// ============================================================================

/// Loader for attachments.
pub type AttachmentLoader<C, B> = CacheAsideLoader<C, B, AttachmentDecoder>;

/// Loader for users.
pub type UserLoader<C, B> = CacheAsideLoader<C, B, UserDecoder>;

/// Wire an attachment loader from configuration and the callbacks
/// registered for `after_get_attachments`.
///
/// # Panics
///
/// If the hook has callbacks registered for another entity type.
pub fn attachment_loader<C, B>(
    cache: Arc<C>,
    store: Arc<B>,
    config: &LoaderConfig,
    hooks: &HookRegistry,
) -> AttachmentLoader<C, B>
where
    C: CacheStore + 'static,
    B: BackingStore<ObjectRecord>,
{
    let kind = EntityKind::Attachment;
    CacheAsideLoader::new(cache, store, AttachmentDecoder::new(&config.site))
        .with_filters(hooks.chain::<Attachment>(kind.filter_hook()))
        .with_refill(config.refill_enabled)
}

/// Wire a user loader from configuration and the callbacks registered for
/// `after_get_users`.
///
/// # Panics
///
/// If the hook has callbacks registered for another entity type.
pub fn user_loader<C, B>(
    cache: Arc<C>,
    store: Arc<B>,
    config: &LoaderConfig,
    hooks: &HookRegistry,
) -> UserLoader<C, B>
where
    C: CacheStore + 'static,
    B: BackingStore<UserRecord>,
{
    let kind = EntityKind::User;
    CacheAsideLoader::new(cache, store, UserDecoder)
        .with_filters(hooks.chain::<User>(kind.filter_hook()))
        .with_refill(config.refill_enabled)
}
