//! Entity types returned by the loader

use crate::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// Common post fields shared by every post-backed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub id: EntityId,
    pub date: Timestamp,
    pub title: String,
    pub slug: String,
    pub mime_type: String,
    pub guid: String,
    pub excerpt: String,
}

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(flatten)]
    pub object: Object,

    pub file_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    pub caption: String,
    pub alt_text: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl Attachment {
    pub fn id(&self) -> EntityId {
        self.object.id
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub slug: String,

    pub name: String,
    pub description: String,

    /// Kept for the cache round trip; presentation layers should not expose it.
    pub email: String,
    pub gravatar: String,
    pub website: String,

    pub registered: Timestamp,
}
