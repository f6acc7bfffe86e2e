//! Lookaside Storage - Cache-Aside Loading
//!
//! Batched, multi-key cache-aside reads: probe a cache for a whole request,
//! fetch every miss from the backing store in one query, decode, scatter,
//! post-process through a filter chain, and refill the cache in the
//! background.

pub mod backing;
pub mod cache;
pub mod filter;
pub mod loader;

pub use backing::{BackingStore, MockBackingStore};
pub use cache::{
    CacheConfig, CacheKeyRule, CacheStats, CacheStore, CacheableEntity, InMemoryCacheStore,
    KeyIndex, LmdbCacheError, LmdbCacheStore,
};
pub use filter::{Filter, FilterChain, FilterContext, HookRegistry, Slots};
pub use loader::{attachment_loader, user_loader, AttachmentLoader, CacheAsideLoader, UserLoader};
