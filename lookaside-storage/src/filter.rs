//! Filter chains: ordered post-processing callbacks run after a load.
//!
//! A [`FilterChain`] is a typed, ordered list of callbacks bound to one hook
//! name. The loader owns its chain; nothing here is global.
//!
//! [`HookRegistry`] is for callers that register callbacks by name at
//! runtime. The first typed access to a hook fixes its entity type. A later
//! registration or resolution with another type is a deployment bug and
//! panics on the spot instead of being skipped.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lookaside_core::{EntityId, EntityKind, FilterError, LookasideResult};

/// One result slot per requested identifier; `None` until resolved.
pub type Slots<E> = Vec<Option<Arc<E>>>;

/// What a filter callback gets to know about the load that invoked it.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// Hook the chain is bound to.
    pub hook: &'a str,
    /// Kind of entity being loaded.
    pub kind: EntityKind,
    /// Identifiers as requested, duplicates included.
    pub requested: &'a [EntityId],
}

/// A post-processing callback.
///
/// Receives the whole result set (cache hits included) and returns its
/// replacement. Returning an error aborts the load.
pub trait Filter<E>: Send + Sync {
    fn apply(&self, ctx: &FilterContext<'_>, results: Slots<E>) -> LookasideResult<Slots<E>>;
}

impl<E, F> Filter<E> for F
where
    F: Fn(&FilterContext<'_>, Slots<E>) -> LookasideResult<Slots<E>> + Send + Sync,
{
    fn apply(&self, ctx: &FilterContext<'_>, results: Slots<E>) -> LookasideResult<Slots<E>> {
        self(ctx, results)
    }
}

/// Ordered callbacks for one hook, run in registration order.
pub struct FilterChain<E> {
    hook: String,
    filters: Vec<Arc<dyn Filter<E>>>,
}

impl<E> Clone for FilterChain<E> {
    fn clone(&self) -> Self {
        Self {
            hook: self.hook.clone(),
            filters: self.filters.clone(),
        }
    }
}

impl<E> fmt::Debug for FilterChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("hook", &self.hook)
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl<E> FilterChain<E> {
    /// An empty chain for `hook`.
    pub fn new(hook: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            filters: Vec::new(),
        }
    }

    pub fn hook(&self) -> &str {
        &self.hook
    }

    /// Append a callback; it runs after every callback registered before it.
    pub fn register(&mut self, filter: impl Filter<E> + 'static) {
        self.filters.push(Arc::new(filter));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, filter: impl Filter<E> + 'static) -> Self {
        self.register(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every callback in order, threading the result set through.
    ///
    /// The first error stops the chain. A callback that changes the number
    /// of slots breaks the slot/identifier correspondence and is reported
    /// as [`FilterError::LengthMismatch`].
    pub fn apply(&self, ctx: &FilterContext<'_>, mut results: Slots<E>) -> LookasideResult<Slots<E>> {
        let expected = results.len();
        for (position, filter) in self.filters.iter().enumerate() {
            results = filter.apply(ctx, results)?;
            if results.len() != expected {
                tracing::warn!(
                    hook = %self.hook,
                    position,
                    expected,
                    got = results.len(),
                    "Filter changed the number of result slots"
                );
                return Err(FilterError::LengthMismatch {
                    hook: self.hook.clone(),
                    expected,
                    got: results.len(),
                }
                .into());
            }
        }
        Ok(results)
    }
}

// ============================================================================
// RUNTIME REGISTRATION
// ============================================================================

struct HookEntry {
    entity_type: TypeId,
    entity_type_name: &'static str,
    /// Each element is an `Arc<dyn Filter<E>>` for the declared `E`.
    filters: Vec<Box<dyn Any + Send + Sync>>,
}

/// Name-keyed callback registrations.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, HookEntry>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, entry) in &self.hooks {
            map.entry(name, &(entry.entity_type_name, entry.filters.len()));
        }
        map.finish()
    }
}

fn bad_filter(hook: &str, expected: &str, got: &str) -> ! {
    panic!(
        "got a bad filter for '{}': hook handles {}, callback handles {}",
        hook, expected, got
    )
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_for<E: 'static>(&mut self, hook: &str) -> &mut HookEntry {
        let entry = self
            .hooks
            .entry(hook.to_string())
            .or_insert_with(|| HookEntry {
                entity_type: TypeId::of::<E>(),
                entity_type_name: std::any::type_name::<E>(),
                filters: Vec::new(),
            });
        if entry.entity_type != TypeId::of::<E>() {
            bad_filter(hook, entry.entity_type_name, std::any::type_name::<E>());
        }
        entry
    }

    /// Fix the entity type handled by `hook`.
    ///
    /// # Panics
    ///
    /// If `hook` was already declared or registered with another type.
    pub fn declare<E: 'static>(&mut self, hook: &str) {
        self.entry_for::<E>(hook);
    }

    /// Append a callback to `hook`.
    ///
    /// # Panics
    ///
    /// If `hook` handles a different entity type than the callback.
    pub fn register<E, F>(&mut self, hook: &str, filter: F)
    where
        E: 'static,
        F: Filter<E> + 'static,
    {
        let filter: Arc<dyn Filter<E>> = Arc::new(filter);
        self.entry_for::<E>(hook).filters.push(Box::new(filter));
    }

    /// Number of callbacks registered for `hook`.
    pub fn count(&self, hook: &str) -> usize {
        self.hooks.get(hook).map(|e| e.filters.len()).unwrap_or(0)
    }

    /// Resolve `hook` into a typed chain, in registration order.
    ///
    /// An unknown hook resolves to an empty chain.
    ///
    /// # Panics
    ///
    /// If `hook` handles a different entity type than `E`.
    pub fn chain<E: 'static>(&self, hook: &str) -> FilterChain<E> {
        let mut chain = FilterChain::new(hook);
        let Some(entry) = self.hooks.get(hook) else {
            return chain;
        };
        if entry.entity_type != TypeId::of::<E>() {
            bad_filter(hook, entry.entity_type_name, std::any::type_name::<E>());
        }
        for filter in &entry.filters {
            match filter.downcast_ref::<Arc<dyn Filter<E>>>() {
                Some(filter) => chain.filters.push(Arc::clone(filter)),
                None => bad_filter(hook, entry.entity_type_name, std::any::type_name::<E>()),
            }
        }
        chain
    }
}
