//! Lookaside DB - PostgreSQL Backing Store
//!
//! Serves attachment and user rows from a WordPress-shaped schema through
//! a deadpool-postgres connection pool. Each batch is one query per table.

pub mod db;

pub use db::{DbConfig, PgBackingStore, TableNames, DEFAULT_TABLE_PREFIX};
