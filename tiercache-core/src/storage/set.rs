//! Set operations: members map to a one-byte sentinel

use super::namespace::{member_key, member_of, member_range, KeyKind, SET_TABLE};
use super::{claim_bucket, expect_kind, FileStore, TxnRead};
use crate::error::Result;
use tracing::debug;

const PRESENT: &[u8] = &[1];

impl FileStore {
    /// Add members, returning how many were not already present
    pub fn sadd(&self, key: &str, members: &[String]) -> Result<usize> {
        let added = self.update(|txn| {
            claim_bucket(txn, key, KeyKind::Set)?;
            let mut table = txn.open_table(SET_TABLE)?;
            let mut added = 0;
            for member in members {
                if table
                    .insert(member_key(key, member.as_bytes()).as_slice(), PRESENT)?
                    .is_none()
                {
                    added += 1;
                }
            }
            Ok(added)
        })?;
        debug!(key, added, "SADD");
        Ok(added)
    }

    /// Remove members, returning how many were present
    pub fn srem(&self, key: &str, members: &[String]) -> Result<usize> {
        self.update(|txn| {
            expect_kind(txn, key, KeyKind::Set)?;
            let mut table = txn.open_table(SET_TABLE)?;
            let mut removed = 0;
            for member in members {
                if table.remove(member_key(key, member.as_bytes()).as_slice())?.is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    /// Members in byte order
    pub fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::Set)?;
            let table = txn.open_table(SET_TABLE)?;
            let range = member_range(key);
            let mut out = Vec::new();
            for item in table.range(range.start.as_slice()..range.end.as_slice())? {
                let (slot, _) = item?;
                out.push(String::from_utf8_lossy(member_of(key, slot.value())).into_owned());
            }
            Ok(out)
        })
    }

    pub fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::Set)?;
            txn.contains(SET_TABLE, &member_key(key, member.as_bytes()))
        })
    }

    pub fn scard(&self, key: &str) -> Result<usize> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::Set)?;
            let table = txn.open_table(SET_TABLE)?;
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
    use crate::error::CacheError;
    use crate::storage::test_support::open_store;

    fn members(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sadd_is_idempotent() {
        let (store, _dir) = open_store();
        assert_eq!(store.sadd("s", &members(&["m"])).unwrap(), 1);
        assert_eq!(store.sadd("s", &members(&["m"])).unwrap(), 0);
        assert_eq!(store.scard("s").unwrap(), 1);
    }

    #[test]
    fn test_set_membership() {
        let (store, _dir) = open_store();
        store.sadd("s", &members(&["b", "a", "c"])).unwrap();
        assert_eq!(store.smembers("s").unwrap(), members(&["a", "b", "c"]));
        assert!(store.sismember("s", "a").unwrap());
        assert!(!store.sismember("s", "z").unwrap());
        assert_eq!(store.srem("s", &members(&["a", "z"])).unwrap(), 1);
        assert_eq!(store.scard("s").unwrap(), 2);
    }

    #[test]
    fn test_set_on_hash_key() {
        let (store, _dir) = open_store();
        store
            .hset("h", &[("f".to_string(), "v".to_string())])
            .unwrap();
        assert!(matches!(
            store.sadd("h", &members(&["m"])),
            Err(CacheError::TypeMismatch(_))
        ));
        assert!(matches!(store.smembers("h"), Err(CacheError::TypeMismatch(_))));
    }
}
