//! Cache key naming and the per-call key index.

use std::collections::HashMap;

use lookaside_core::{EntityId, EntityKind};

/// Deterministic, injective mapping from identifier to cache key.
///
/// Keys are `"{prefix}_{id}"`, so two rules with different prefixes never
/// collide and one rule never maps two identifiers to the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyRule {
    prefix: String,
}

impl CacheKeyRule {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The rule used for an entity kind (`wp_attachment_{id}`, `wp_user_{id}`).
    pub fn for_kind(kind: EntityKind) -> Self {
        Self::new(kind.cache_key_prefix())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, id: EntityId) -> String {
        format!("{}_{}", self.prefix, id)
    }
}

/// Reverse map from cache key to the result positions it fills.
///
/// Built once per load. Keys keep the order of their first occurrence in the
/// request; a repeated identifier adds a position to its existing key
/// instead of a new key.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    keys: Vec<String>,
    positions: Vec<Vec<usize>>,
    lookup: HashMap<String, usize>,
}

impl KeyIndex {
    /// Index `ids` under `rule`. Pure; never fails.
    pub fn build(ids: &[EntityId], rule: &CacheKeyRule) -> Self {
        let mut index = Self::default();
        for (position, &id) in ids.iter().enumerate() {
            let key = rule.key(id);
            match index.lookup.get(&key) {
                Some(&slot) => index.positions[slot].push(position),
                None => {
                    index.lookup.insert(key.clone(), index.keys.len());
                    index.keys.push(key);
                    index.positions.push(vec![position]);
                }
            }
        }
        index
    }

    /// Distinct keys to probe, in first-occurrence order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Result positions for `key`, ascending.
    pub fn positions(&self, key: &str) -> Option<&[usize]> {
        self.lookup
            .get(key)
            .map(|&slot| self.positions[slot].as_slice())
    }

    /// `(key, positions)` pairs in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.keys
            .iter()
            .map(String::as_str)
            .zip(self.positions.iter().map(Vec::as_slice))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_rule_formats_prefix_and_id() {
        let rule = CacheKeyRule::for_kind(EntityKind::Attachment);
        assert_eq!(rule.key(42), "wp_attachment_42");
        assert_eq!(CacheKeyRule::for_kind(EntityKind::User).key(-1), "wp_user_-1");
    }

    #[test]
    fn test_key_index_collapses_duplicates() {
        let rule = CacheKeyRule::new("k");
        let index = KeyIndex::build(&[5, 3, 5, 9, 3, 5], &rule);

        assert_eq!(index.keys(), &["k_5", "k_3", "k_9"]);
        assert_eq!(index.positions("k_5"), Some(&[0, 2, 5][..]));
        assert_eq!(index.positions("k_3"), Some(&[1, 4][..]));
        assert_eq!(index.positions("k_9"), Some(&[3][..]));
        assert_eq!(index.positions("k_1"), None);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_key_index_iter_matches_keys() {
        let rule = CacheKeyRule::new("k");
        let index = KeyIndex::build(&[2, 1], &rule);
        let pairs: Vec<_> = index.iter().collect();
        assert_eq!(pairs, vec![("k_2", &[0][..]), ("k_1", &[1][..])]);
    }

    #[test]
    fn test_key_index_empty() {
        let index = KeyIndex::build(&[], &CacheKeyRule::new("k"));
        assert!(index.is_empty());
    }

    proptest! {
        #[test]
        fn prop_key_index_covers_every_position_once(ids in prop::collection::vec(0i64..20, 1..40)) {
            let rule = CacheKeyRule::new("p");
            let index = KeyIndex::build(&ids, &rule);

            let mut seen = vec![false; ids.len()];
            for (key, positions) in index.iter() {
                prop_assert!(!positions.is_empty());
                for &p in positions {
                    prop_assert!(!seen[p]);
                    seen[p] = true;
                    prop_assert_eq!(rule.key(ids[p]), key);
                }
            }
            prop_assert!(seen.into_iter().all(|s| s));
        }
    }
}
