//! Identity types for lookaside entities

use chrono::{DateTime, Utc};

/// Row identifier of an entity in the backing store.
///
/// Identifiers are opaque to the loader. Duplicates inside a single request
/// are legal and resolve to the same entity in every slot they occupy.
pub type EntityId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Lowercase hex MD5 of a trimmed, lowercased email address.
///
/// This is the hash Gravatar expects in avatar URLs.
pub fn gravatar_hash(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gravatar_hash_normalizes_email() {
        let a = gravatar_hash("  MyEmailAddress@example.com ");
        let b = gravatar_hash("myemailaddress@example.com");
        assert_eq!(a, b);
        assert_eq!(a, "0bc83cb571cd1c50ba6f3e8a78ef1346");
    }

    #[test]
    fn test_gravatar_hash_empty_email() {
        assert_eq!(gravatar_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
