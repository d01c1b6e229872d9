//! Hash operations: one sub-bucket of `field -> value` per key

use super::namespace::{member_key, member_of, member_range, KeyKind, HASH_TABLE};
use super::{claim_bucket, expect_kind, FileStore, TxnRead};
use crate::error::{CacheError, Result};
use std::collections::HashMap;
use tracing::debug;

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl FileStore {
    /// Set fields, returning how many were newly created
    pub fn hset(&self, key: &str, pairs: &[(String, String)]) -> Result<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let created = self.update(|txn| {
            claim_bucket(txn, key, KeyKind::Hash)?;
            let mut table = txn.open_table(HASH_TABLE)?;
            let mut created = 0;
            for (field, value) in pairs {
                let slot = member_key(key, field.as_bytes());
                if table.insert(slot.as_slice(), value.as_bytes())?.is_none() {
                    created += 1;
                }
            }
            Ok(created)
        })?;
        debug!(key, fields = pairs.len(), created, "HSET");
        Ok(created)
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<String> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::Hash)?;
            txn.fetch(HASH_TABLE, &member_key(key, field.as_bytes()))?
                .map(|bytes| text(&bytes))
                .ok_or(CacheError::KeyNotFound)
        })
    }

    /// Remove fields, returning how many existed
    pub fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        self.update(|txn| {
            expect_kind(txn, key, KeyKind::Hash)?;
            let mut table = txn.open_table(HASH_TABLE)?;
            let mut removed = 0;
            for field in fields {
                if table.remove(member_key(key, field.as_bytes()).as_slice())?.is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    pub fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::Hash)?;
            let table = txn.open_table(HASH_TABLE)?;
            let range = member_range(key);
            let mut out = HashMap::new();
            for item in table.range(range.start.as_slice()..range.end.as_slice())? {
                let (slot, value) = item?;
                out.insert(text(member_of(key, slot.value())), text(value.value()));
            }
            Ok(out)
        })
    }

    pub fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::Hash)?;
            txn.contains(HASH_TABLE, &member_key(key, field.as_bytes()))
        })
    }

    /// Field count; walks the sub-bucket
    pub fn hlen(&self, key: &str) -> Result<usize> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::Hash)?;
            let table = txn.open_table(HASH_TABLE)?;
            let range = member_range(key);
            let mut count = 0;
            for item in table.range(range.start.as_slice()..range.end.as_slice())? {
                item?;
                count += 1;
            }
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::open_store;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_hash_lifecycle() {
        let (store, _dir) = open_store();
        assert_eq!(store.hset("h", &pairs(&[("f", "v")])).unwrap(), 1);
        assert_eq!(store.hget("h", "f").unwrap(), "v");
        assert_eq!(store.hdel("h", &["f".to_string()]).unwrap(), 1);
        assert!(store.hget("h", "f").unwrap_err().is_not_found());
    }

    #[test]
    fn test_hset_counts_only_new_fields() {
        let (store, _dir) = open_store();
        assert_eq!(store.hset("h", &pairs(&[("a", "1"), ("b", "2")])).unwrap(), 2);
        assert_eq!(store.hset("h", &pairs(&[("a", "10"), ("c", "3")])).unwrap(), 1);
        assert_eq!(store.hget("h", "a").unwrap(), "10");
        assert_eq!(store.hlen("h").unwrap(), 3);
        assert!(store.hexists("h", "c").unwrap());
        assert!(!store.hexists("h", "zz").unwrap());

        let all = store.hget_all("h").unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all["b"], "2");
    }

    #[test]
    fn test_hashes_with_shared_prefix_stay_apart() {
        let (store, _dir) = open_store();
        store.hset("user", &pairs(&[("name", "a")])).unwrap();
        store.hset("user1", &pairs(&[("name", "b")])).unwrap();
        assert_eq!(store.hlen("user").unwrap(), 1);
        assert_eq!(store.hget_all("user1").unwrap()["name"], "b");
    }

    #[test]
    fn test_missing_hash() {
        let (store, _dir) = open_store();
        assert!(store.hget("nope", "f").unwrap_err().is_not_found());
        assert!(store.hlen("nope").unwrap_err().is_not_found());
        assert!(store.hdel("nope", &["f".to_string()]).unwrap_err().is_not_found());
    }
}
