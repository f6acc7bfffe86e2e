//! Lookaside Core - Entity, Record and Error Types
//!
//! Data structures shared by every lookaside crate: identifiers, entity
//! kinds, raw backing-store records, finished entities, the decoders that
//! turn one into the other, configuration, and errors. Nothing here touches
//! a cache or a database.

pub mod config;
pub mod decode;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod php;
pub mod records;

pub use config::{LoaderConfig, SiteOptions, DEFAULT_UPLOAD_PATH};
pub use decode::{AttachmentDecoder, EntityDecoder, UserDecoder, ATTACHMENT_METADATA_KEY};
pub use entities::{Attachment, Object, User};
pub use enums::{
    EntityKind, EntityKindParseError, FILTER_AFTER_GET_ATTACHMENTS, FILTER_AFTER_GET_USERS,
};
pub use error::{
    CacheError, ConfigError, DecodeError, FilterError, LookasideError, LookasideResult,
    MissingResourcesError, StorageError,
};
pub use identity::{gravatar_hash, EntityId, Timestamp};
pub use php::PhpValue;
pub use records::{ObjectRecord, UserRecord};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
