//! Cache layer: key naming, per-call key index, and cache stores.
//!
//! The loader talks to caches only through [`CacheStore`], a batch
//! get/set interface over string keys and JSON-encoded values. Two stores
//! ship with the crate:
//!
//! - [`InMemoryCacheStore`] keeps entries in a process-local map.
//! - [`LmdbCacheStore`] keeps entries in an LMDB environment on disk.
//!
//! # Example
//!
//! ```ignore
//! let rule = CacheKeyRule::for_kind(EntityKind::User);
//! let index = KeyIndex::build(&[7, 3, 7], &rule);
//! let found = cache.multi_get(index.keys()).await?;
//! ```

pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use key::{CacheKeyRule, KeyIndex};
pub use lmdb_backend::{CacheConfig, LmdbCacheError, LmdbCacheStore};
pub use memory::InMemoryCacheStore;
pub use traits::{decode_entry, encode_entry, CacheStats, CacheStore, CacheableEntity};
