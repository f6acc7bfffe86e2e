//! Enum types for lookaside entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hook name invoked after attachments were loaded with at least one miss.
pub const FILTER_AFTER_GET_ATTACHMENTS: &str = "after_get_attachments";

/// Hook name invoked after users were loaded with at least one miss.
pub const FILTER_AFTER_GET_USERS: &str = "after_get_users";

/// Entity kind discriminator passed to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Attachment,
    User,
}

impl EntityKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EntityKind::Attachment => "attachment",
            EntityKind::User => "user",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EntityKindParseError> {
        match s.to_lowercase().as_str() {
            "attachment" => Ok(EntityKind::Attachment),
            "user" => Ok(EntityKind::User),
            _ => Err(EntityKindParseError(s.to_string())),
        }
    }

    /// Prefix of the cache keys for this kind (`wp_attachment_42`).
    pub fn cache_key_prefix(&self) -> &'static str {
        match self {
            EntityKind::Attachment => "wp_attachment",
            EntityKind::User => "wp_user",
        }
    }

    /// Name of the filter hook run after a load of this kind.
    pub fn filter_hook(&self) -> &'static str {
        match self {
            EntityKind::Attachment => FILTER_AFTER_GET_ATTACHMENTS,
            EntityKind::User => FILTER_AFTER_GET_USERS,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for EntityKind {
    type Err = EntityKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid entity kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKindParseError(pub String);

impl fmt::Display for EntityKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid entity kind: {}", self.0)
    }
}

impl std::error::Error for EntityKindParseError {}
