//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - One read transaction per `multi_get`
//! - One write transaction per `multi_set`, so a batch lands atomically
//! - Statistics behind an `RwLock`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use lookaside_core::{CacheError, LookasideError, LookasideResult};

use super::traits::{CacheStats, CacheStore};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to LookasideError.
impl From<LmdbCacheError> for LookasideError {
    fn from(e: LmdbCacheError) -> Self {
        LookasideError::Cache(CacheError::Backend {
            reason: e.to_string(),
        })
    }
}

/// Configuration for the LMDB cache store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory where LMDB files are stored.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub max_size_mb: usize,
}

impl CacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size_mb: 256,
        }
    }

    /// Set the maximum map size.
    pub fn with_max_size_mb(mut self, max_size_mb: usize) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use lookaside_storage::cache::{CacheConfig, LmdbCacheStore};
///
/// let store = LmdbCacheStore::from_config(&CacheConfig::new("/var/cache/lookaside"))?;
/// store.multi_set(vec![("wp_user_7".into(), bytes)]).await?;
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbCacheStore {
    /// Create a new LMDB cache store.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, LmdbCacheError> {
        Self::new(&config.path, config.max_size_mb)
    }

    fn entry_count(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn multi_get(&self, keys: &[String]) -> LookasideResult<HashMap<String, Vec<u8>>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self
                .db
                .get(&rtxn, key.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            if let Some(bytes) = value {
                found.insert(key.clone(), bytes.to_vec());
            }
        }
        drop(rtxn);

        if let Ok(mut stats) = self.stats.write() {
            stats.hits += found.len() as u64;
            stats.misses += (keys.len() - found.len()) as u64;
        }
        Ok(found)
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>) -> LookasideResult<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        for (key, value) in &entries {
            self.db
                .put(&mut wtxn, key.as_bytes(), value)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.writes += 1;
        }
        Ok(())
    }

    async fn stats(&self) -> LookasideResult<CacheStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| CacheError::Backend {
                reason: "stats lock poisoned".to_string(),
            })?
            .clone();
        stats.entry_count = self.entry_count()?;
        Ok(stats)
    }
}
