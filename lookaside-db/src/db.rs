//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, and the batched
//! row queries behind [`PgBackingStore`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use lookaside_core::{
    ConfigError, EntityId, EntityKind, LookasideResult, ObjectRecord, StorageError, Timestamp,
    UserRecord,
};
use lookaside_storage::BackingStore;
use tokio_postgres::{NoTls, Row};

/// Table prefix of a stock installation.
pub const DEFAULT_TABLE_PREFIX: &str = "wp_";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Time to wait for a pooled connection
    pub timeout: Duration,
    /// Prefix in front of every table name
    pub table_prefix: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "wordpress".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

impl DbConfig {
    /// Read the configuration from `LOOKASIDE_DB_*` environment variables,
    /// falling back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("LOOKASIDE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("LOOKASIDE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("LOOKASIDE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("LOOKASIDE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("LOOKASIDE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("LOOKASIDE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("LOOKASIDE_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            table_prefix: std::env::var("LOOKASIDE_DB_TABLE_PREFIX")
                .unwrap_or(defaults.table_prefix),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> LookasideResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::ConnectionFailed {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// TABLE NAMES
// ============================================================================

/// Fully prefixed names of the tables the store reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub posts: String,
    pub postmeta: String,
    pub users: String,
    pub usermeta: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self::build(DEFAULT_TABLE_PREFIX)
    }
}

impl TableNames {
    /// Prefix every table with `prefix`.
    ///
    /// The prefix is spliced into SQL text, so only ASCII letters, digits and
    /// underscores are accepted.
    pub fn with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                field: "table_prefix".to_string(),
                value: prefix.to_string(),
                reason: "only ASCII letters, digits and '_' are allowed".to_string(),
            });
        }
        Ok(Self::build(prefix))
    }

    fn build(prefix: &str) -> Self {
        Self {
            posts: format!("{}posts", prefix),
            postmeta: format!("{}postmeta", prefix),
            users: format!("{}users", prefix),
            usermeta: format!("{}usermeta", prefix),
        }
    }

    fn posts_query(&self) -> String {
        format!(
            "SELECT \"ID\", post_date, post_title, post_name, post_type, post_mime_type, guid, post_excerpt \
             FROM {} WHERE \"ID\" = ANY($1) AND post_type = $2",
            self.posts
        )
    }

    fn postmeta_query(&self) -> String {
        format!(
            "SELECT post_id, meta_key, meta_value FROM {} WHERE post_id = ANY($1)",
            self.postmeta
        )
    }

    fn users_query(&self) -> String {
        format!(
            "SELECT u.\"ID\", u.user_nicename, u.display_name, u.user_email, u.user_url, \
             u.user_registered, m.meta_value AS description \
             FROM {} u LEFT JOIN {} m ON m.user_id = u.\"ID\" AND m.meta_key = 'description' \
             WHERE u.\"ID\" = ANY($1)",
            self.users, self.usermeta
        )
    }
}

// ============================================================================
// BACKING STORE
// ============================================================================

/// Backing store over a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgBackingStore {
    pool: Pool,
    tables: TableNames,
}

impl PgBackingStore {
    /// Create a store over an existing pool.
    pub fn new(pool: Pool, tables: TableNames) -> Self {
        Self { pool, tables }
    }

    /// Create a store and its pool from configuration.
    pub fn from_config(config: &DbConfig) -> LookasideResult<Self> {
        let tables = TableNames::with_prefix(&config.table_prefix)?;
        Ok(Self::new(config.create_pool()?, tables))
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> LookasideResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!(error = ?e, "Connection pool error");
            StorageError::ConnectionFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn query_failed(kind: EntityKind) -> impl Fn(tokio_postgres::Error) -> StorageError {
    move |e| {
        tracing::error!(%kind, error = ?e, "Database error");
        StorageError::QueryFailed {
            kind,
            reason: e.to_string(),
        }
    }
}

fn timestamp(row: &Row, column: &str, kind: EntityKind) -> Result<Timestamp, StorageError> {
    let naive: NaiveDateTime = row.try_get(column).map_err(query_failed(kind))?;
    Ok(naive.and_utc())
}

fn text(row: &Row, column: &str, kind: EntityKind) -> Result<String, StorageError> {
    let value: Option<String> = row.try_get(column).map_err(query_failed(kind))?;
    Ok(value.unwrap_or_default())
}

#[async_trait]
impl BackingStore<ObjectRecord> for PgBackingStore {
    /// Fetch posts of `kind` together with all of their meta rows.
    async fn fetch_batch(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> LookasideResult<Vec<ObjectRecord>> {
        let conn = self.get_conn().await?;
        let post_type = kind.as_db_str();

        let rows = conn
            .query(self.tables.posts_query().as_str(), &[&ids, &post_type])
            .await
            .map_err(query_failed(kind))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(ObjectRecord {
                id: row.try_get("ID").map_err(query_failed(kind))?,
                date: timestamp(row, "post_date", kind)?,
                title: text(row, "post_title", kind)?,
                slug: text(row, "post_name", kind)?,
                post_type: text(row, "post_type", kind)?,
                mime_type: text(row, "post_mime_type", kind)?,
                guid: text(row, "guid", kind)?,
                excerpt: text(row, "post_excerpt", kind)?,
                meta: BTreeMap::new(),
            });
        }
        if records.is_empty() {
            return Ok(records);
        }

        let found: Vec<EntityId> = records.iter().map(|r| r.id).collect();
        let meta_rows = conn
            .query(self.tables.postmeta_query().as_str(), &[&found])
            .await
            .map_err(query_failed(kind))?;

        let mut meta: HashMap<EntityId, BTreeMap<String, String>> = HashMap::new();
        for row in &meta_rows {
            let post_id: EntityId = row.try_get("post_id").map_err(query_failed(kind))?;
            let key = text(row, "meta_key", kind)?;
            let value = text(row, "meta_value", kind)?;
            // First row wins for repeated keys.
            meta.entry(post_id).or_default().entry(key).or_insert(value);
        }
        for record in &mut records {
            if let Some(values) = meta.remove(&record.id) {
                record.meta = values;
            }
        }

        tracing::debug!(
            %kind,
            requested = ids.len(),
            found = records.len(),
            meta_rows = meta_rows.len(),
            "Fetched posts"
        );
        Ok(records)
    }
}

#[async_trait]
impl BackingStore<UserRecord> for PgBackingStore {
    /// Fetch users with their profile description.
    async fn fetch_batch(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> LookasideResult<Vec<UserRecord>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(self.tables.users_query().as_str(), &[&ids])
            .await
            .map_err(query_failed(kind))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(UserRecord {
                id: row.try_get("ID").map_err(query_failed(kind))?,
                slug: text(row, "user_nicename", kind)?,
                name: text(row, "display_name", kind)?,
                description: text(row, "description", kind)?,
                email: text(row, "user_email", kind)?,
                website: text(row, "user_url", kind)?,
                registered: timestamp(row, "user_registered", kind)?,
            });
        }

        tracing::debug!(%kind, requested = ids.len(), found = records.len(), "Fetched users");
        Ok(records)
    }
}
