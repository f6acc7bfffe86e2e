//! Raw backing-store records.
//!
//! Records are what a backing store hands back for one row (plus any joined
//! meta rows). Turning them into finished entities is the decoders' job.

use crate::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row of the posts table together with its meta rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: EntityId,
    pub date: Timestamp,
    pub title: String,
    pub slug: String,
    pub post_type: String,
    pub mime_type: String,
    pub guid: String,
    pub excerpt: String,
    /// `meta_key -> meta_value`; the first row wins for repeated keys.
    pub meta: BTreeMap<String, String>,
}

impl ObjectRecord {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }
}

/// A row of the users table joined with its `description` meta row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: EntityId,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub email: String,
    pub website: String,
    pub registered: Timestamp,
}
