//! Entity decoders: raw backing-store records to finished entities.
//!
//! Decoders are pure. They never touch a store and never cache; a failure
//! aborts the whole batch being decoded.

use crate::config::SiteOptions;
use crate::entities::{Attachment, Object, User};
use crate::error::{DecodeError, LookasideResult};
use crate::identity::gravatar_hash;
use crate::php::{self, PhpValue};
use crate::records::{ObjectRecord, UserRecord};
use crate::EntityKind;

/// Meta key holding the serialized attachment metadata.
pub const ATTACHMENT_METADATA_KEY: &str = "_wp_attachment_metadata";

/// Turns one raw record into one finished entity.
pub trait EntityDecoder: Send + Sync + 'static {
    type Record: Send + 'static;
    type Entity: Send + Sync + 'static;

    fn decode(&self, record: Self::Record) -> LookasideResult<Self::Entity>;
}

/// Decodes post rows of type `attachment`.
#[derive(Debug, Clone)]
pub struct AttachmentDecoder {
    base_url: String,
}

impl AttachmentDecoder {
    pub fn new(site: &SiteOptions) -> Self {
        Self {
            base_url: site.upload_base_url(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl EntityDecoder for AttachmentDecoder {
    type Record = ObjectRecord;
    type Entity = Attachment;

    fn decode(&self, record: ObjectRecord) -> LookasideResult<Attachment> {
        if record.post_type != EntityKind::Attachment.as_db_str() {
            return Err(DecodeError::MalformedRecord {
                kind: EntityKind::Attachment,
                id: record.id,
                reason: format!("unexpected post type '{}'", record.post_type),
            }
            .into());
        }

        let metadata = match record.meta(ATTACHMENT_METADATA_KEY) {
            Some(encoded) if !encoded.is_empty() => {
                Some(php::unserialize(encoded).map_err(|e| DecodeError::MalformedRecord {
                    kind: EntityKind::Attachment,
                    id: record.id,
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };

        let mut attachment = Attachment {
            object: Object {
                id: record.id,
                date: record.date,
                title: record.title,
                slug: record.slug,
                mime_type: record.mime_type,
                guid: record.guid,
                excerpt: record.excerpt,
            },
            file_name: String::new(),
            width: None,
            height: None,
            caption: String::new(),
            alt_text: String::new(),
            url: String::new(),
        };

        // Fields of the wrong type are skipped, not rejected.
        if let Some(meta) = metadata.as_ref().filter(|m| m.is_array()) {
            if let Some(file) = meta.get("file").and_then(PhpValue::as_str) {
                attachment.file_name = file.to_string();
            }
            attachment.width = meta
                .get("width")
                .and_then(PhpValue::as_int)
                .and_then(|w| u32::try_from(w).ok());
            attachment.height = meta
                .get("height")
                .and_then(PhpValue::as_int)
                .and_then(|h| u32::try_from(h).ok());

            if let Some(image_meta) = meta.get("image_meta") {
                if let Some(caption) = image_meta.get("caption").and_then(PhpValue::as_str) {
                    attachment.caption = caption.to_string();
                }
                if let Some(title) = image_meta.get("title").and_then(PhpValue::as_str) {
                    attachment.alt_text = title.to_string();
                }
            }
        }

        attachment.url = format!(
            "{}{}{}",
            self.base_url,
            attachment.object.date.format("/%Y/%m/"),
            attachment.file_name
        );

        Ok(attachment)
    }
}

/// Decodes user rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserDecoder;

impl EntityDecoder for UserDecoder {
    type Record = UserRecord;
    type Entity = User;

    fn decode(&self, record: UserRecord) -> LookasideResult<User> {
        let gravatar = gravatar_hash(&record.email);
        Ok(User {
            id: record.id,
            slug: record.slug,
            name: record.name,
            description: record.description,
            email: record.email,
            gravatar,
            website: record.website,
            registered: record.registered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn attachment_record(meta: Option<&str>) -> ObjectRecord {
        let mut meta_map = BTreeMap::new();
        if let Some(m) = meta {
            meta_map.insert(ATTACHMENT_METADATA_KEY.to_string(), m.to_string());
        }
        ObjectRecord {
            id: 12,
            date: Utc.with_ymd_and_hms(2019, 3, 14, 9, 26, 53).unwrap(),
            title: "sunset".to_string(),
            slug: "sunset".to_string(),
            post_type: "attachment".to_string(),
            mime_type: "image/jpeg".to_string(),
            guid: "https://example.com/?attachment_id=12".to_string(),
            excerpt: String::new(),
            meta: meta_map,
        }
    }

    fn decoder() -> AttachmentDecoder {
        AttachmentDecoder::new(&SiteOptions::new("https://example.com"))
    }

    #[test]
    fn test_attachment_decoder_reads_metadata() {
        let meta = r#"a:4:{s:5:"width";i:640;s:6:"height";i:480;s:4:"file";s:10:"sunset.jpg";s:10:"image_meta";a:2:{s:7:"caption";s:3:"Sky";s:5:"title";s:6:"Sunset";}}"#;
        let attachment = decoder().decode(attachment_record(Some(meta))).unwrap();

        assert_eq!(attachment.id(), 12);
        assert_eq!(attachment.file_name, "sunset.jpg");
        assert_eq!(attachment.width, Some(640));
        assert_eq!(attachment.height, Some(480));
        assert_eq!(attachment.caption, "Sky");
        assert_eq!(attachment.alt_text, "Sunset");
        assert_eq!(
            attachment.url,
            "https://example.com/wp-content/uploads/2019/03/sunset.jpg"
        );
    }

    #[test]
    fn test_attachment_decoder_without_metadata() {
        let attachment = decoder().decode(attachment_record(None)).unwrap();
        assert_eq!(attachment.file_name, "");
        assert_eq!(attachment.width, None);
        assert_eq!(
            attachment.url,
            "https://example.com/wp-content/uploads/2019/03/"
        );
    }

    #[test]
    fn test_attachment_decoder_skips_mistyped_fields() {
        let meta = r#"a:2:{s:5:"width";s:3:"640";s:4:"file";i:3;}"#;
        let attachment = decoder().decode(attachment_record(Some(meta))).unwrap();
        assert_eq!(attachment.width, None);
        assert_eq!(attachment.file_name, "");
    }

    #[test]
    fn test_attachment_decoder_rejects_malformed_blob() {
        let err = decoder()
            .decode(attachment_record(Some("a:1:{s:4:\"file\";")))
            .unwrap_err();
        assert!(err.to_string().contains("attachment record 12"));
    }

    #[test]
    fn test_attachment_decoder_rejects_other_post_types() {
        let mut record = attachment_record(None);
        record.post_type = "page".to_string();
        assert!(decoder().decode(record).is_err());
    }

    #[test]
    fn test_user_decoder_computes_gravatar() {
        let record = UserRecord {
            id: 7,
            slug: "jdoe".to_string(),
            name: "Jane Doe".to_string(),
            description: "Writer".to_string(),
            email: " MyEmailAddress@example.com".to_string(),
            website: "https://jane.example".to_string(),
            registered: Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
        };
        let user = UserDecoder.decode(record).unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.gravatar, "0bc83cb571cd1c50ba6f3e8a78ef1346");
        assert_eq!(user.name, "Jane Doe");
    }
}
