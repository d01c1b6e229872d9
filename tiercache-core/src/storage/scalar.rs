//! String/counter operations on the `default` table

use super::expiration::add_expiration;
use super::namespace::{KeyKind, DEFAULT_TABLE};
use super::{codec, drop_bucket, live_scalar, structured_kind_of, zset, FileStore, TxnRead};
use crate::cache::value::{deadline_after, unix_now, CacheEntry, CacheValue, Ttl};
use crate::error::{CacheError, Result};
use redb::WriteTransaction;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Fail if `key` is a structured key; scalar writes never replace one
fn ensure_scalar_slot(txn: &impl TxnRead, key: &str) -> Result<()> {
    match structured_kind_of(txn, key)? {
        Some(kind) => Err(CacheError::type_mismatch(format!(
            "key '{}' holds a {}, not a string",
            key,
            kind.name()
        ))),
        None => Ok(()),
    }
}

impl FileStore {
    fn put_entry(&self, txn: &WriteTransaction, key: &str, entry: &CacheEntry) -> Result<()> {
        let bytes = codec::encode(entry, self.compression_threshold())?;
        txn.open_table(DEFAULT_TABLE)?
            .insert(key.as_bytes(), bytes.as_slice())?;
        add_expiration(txn, key, entry.expiration)
    }

    /// Text representation of the live value under `key`
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(self.get_value(key)?.to_text())
    }

    /// The live value under `key` exactly as it was stored
    pub fn get_value(&self, key: &str) -> Result<CacheValue> {
        if let Some(entry) = self.overlay().get(key) {
            debug!(key, "GET overlay hit");
            return Ok(entry.value);
        }

        let seen = self.overlay().generation(key);
        let entry = self.view(|txn| match live_scalar(txn, key, unix_now())? {
            Some(entry) => Ok(entry),
            None => {
                ensure_scalar_slot(txn, key)?;
                Err(CacheError::KeyNotFound)
            }
        })?;

        let value = entry.value.clone();
        self.overlay().fill(key.to_string(), entry, seen);
        Ok(value)
    }

    pub fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(value, ttl);
        self.update(|txn| {
            ensure_scalar_slot(txn, key)?;
            self.put_entry(txn, key, &entry)
        })?;
        debug!(key, expiration = entry.expiration, "SET");
        self.overlay().store(key.to_string(), entry);
        Ok(())
    }

    /// Set `key` only when no live value is stored; returns whether it wrote
    pub fn set_nx(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<bool> {
        let entry = CacheEntry::new(value, ttl);
        let written = self.update(|txn| {
            ensure_scalar_slot(txn, key)?;
            if live_scalar(txn, key, unix_now())?.is_some() {
                return Ok(false);
            }
            self.put_entry(txn, key, &entry)?;
            Ok(true)
        })?;
        if written {
            self.overlay().store(key.to_string(), entry);
        }
        Ok(written)
    }

    /// Delete keys of any kind; returns how many existed
    pub fn del(&self, keys: &[String]) -> Result<usize> {
        let now = unix_now();
        let removed = self.update(|txn| {
            let mut removed = 0;
            for key in keys {
                let scalar = txn
                    .open_table(DEFAULT_TABLE)?
                    .remove(key.as_bytes())?
                    .map(|bytes| codec::decode::<CacheEntry>(bytes.value()))
                    .transpose()?;
                if let Some(entry) = scalar {
                    if !entry.is_expired_at(now) {
                        removed += 1;
                    }
                    continue;
                }

                if let Some(kind) = structured_kind_of(txn, key)? {
                    if kind == KeyKind::SortedSet {
                        zset::drop_score_index(txn, key)?;
                    }
                    drop_bucket(txn, key, kind)?;
                    removed += 1;
                }
            }
            Ok(removed)
        })?;

        for key in keys {
            self.overlay().invalidate(key);
        }
        debug!(requested = keys.len(), removed, "DEL");
        Ok(removed)
    }

    /// Number of the given keys that are live, of any kind
    pub fn exists(&self, keys: &[String]) -> Result<usize> {
        let now = unix_now();
        self.view(|txn| {
            let mut found = 0;
            for key in keys {
                if live_scalar(txn, key, now)?.is_some()
                    || structured_kind_of(txn, key)?.is_some()
                {
                    found += 1;
                }
            }
            Ok(found)
        })
    }

    /// Replace the expiration of a scalar key; a zero `ttl` removes it
    pub fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.update(|txn| {
            let mut entry = match live_scalar(txn, key, unix_now())? {
                Some(entry) => entry,
                None => {
                    ensure_scalar_slot(txn, key)?;
                    return Err(CacheError::KeyNotFound);
                }
            };
            entry.expiration = deadline_after(Some(ttl));
            self.put_entry(txn, key, &entry)
        })?;
        self.overlay().invalidate(key);
        debug!(key, ttl_ms = ttl.as_millis() as u64, "EXPIRE");
        Ok(())
    }

    pub fn ttl(&self, key: &str) -> Result<Ttl> {
        let now = unix_now();
        self.view(|txn| match live_scalar(txn, key, now)? {
            Some(entry) => Ok(entry.ttl_at(now)),
            None => {
                ensure_scalar_slot(txn, key)?;
                Err(CacheError::KeyNotFound)
            }
        })
    }

    /// Atomically add `delta` to the counter under `key`
    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let value = self.update(|txn| {
            ensure_scalar_slot(txn, key)?;
            let entry = match live_scalar(txn, key, unix_now())? {
                Some(current) => {
                    let base = current.value.as_integer().ok_or_else(|| {
                        CacheError::type_mismatch(format!("value of '{}' is not an integer", key))
                    })?;
                    let next = base.checked_add(delta).ok_or_else(|| {
                        CacheError::type_mismatch(format!("increment of '{}' would overflow", key))
                    })?;
                    CacheEntry {
                        value: CacheValue::Int(next),
                        expiration: current.expiration,
                    }
                }
                None => CacheEntry::new(CacheValue::Int(delta), None),
            };
            let bytes = codec::encode(&entry, self.compression_threshold())?;
            txn.open_table(DEFAULT_TABLE)?
                .insert(key.as_bytes(), bytes.as_slice())?;
            match entry.value {
                CacheValue::Int(n) => Ok(n),
                _ => Err(CacheError::type_mismatch("counter is not an integer")),
            }
        })?;
        self.overlay().invalidate(key);
        Ok(value)
    }

    pub fn incr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, 1)
    }

    pub fn decr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, -1)
    }

    /// Live values of the given keys, read in one snapshot; missing keys are left out
    pub fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let now = unix_now();
        let seen: Vec<_> = keys.iter().map(|key| self.overlay().generation(key)).collect();
        let entries = self.view(|txn| {
            let mut found = Vec::with_capacity(keys.len());
            for (key, seen) in keys.iter().zip(seen) {
                if let Some(entry) = live_scalar(txn, key, now)? {
                    found.push((key.clone(), entry, seen));
                }
            }
            Ok(found)
        })?;

        let mut out = HashMap::with_capacity(entries.len());
        for (key, entry, seen) in entries {
            out.insert(key.clone(), entry.value.to_text());
            self.overlay().fill(key, entry, seen);
        }
        Ok(out)
    }

    /// Write every pair in one transaction with a shared TTL
    pub fn batch_set(&self, pairs: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
        let expiration = deadline_after(ttl);
        let entries: Vec<(String, CacheEntry)> = pairs
            .into_iter()
            .map(|(key, value)| (key, CacheEntry { value, expiration }))
            .collect();

        self.update(|txn| {
            for (key, entry) in &entries {
                ensure_scalar_slot(txn, key)?;
                self.put_entry(txn, key, entry)?;
            }
            Ok(())
        })?;

        debug!(count = entries.len(), expiration, "BATCH SET");
        for (key, entry) in entries {
            self.overlay().store(key, entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{open_store, open_store_with};
    use crate::storage::FileStoreOptions;
    use std::sync::Arc;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_get_round_trip() {
        let (store, _dir) = open_store();
        store.set("a", CacheValue::from("1"), None).unwrap();
        assert_eq!(store.get("a").unwrap(), "1");
        store.set("n", CacheValue::from(7i64), None).unwrap();
        assert_eq!(store.get("n").unwrap(), "7");
        assert!(store.get("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_bypassing_overlay_reads_disk() {
        let (store, _dir) = open_store();
        let doc = serde_json::json!({"name": "ada", "tags": ["x"]});
        store.set("doc", CacheValue::from(doc.clone()), None).unwrap();
        store.overlay().clear();
        let text = store.get("doc").unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), doc);
        assert_eq!(store.overlay().len(), 1);
    }

    #[test]
    fn test_large_values_round_trip_compressed() {
        let (store, _dir) = open_store_with(FileStoreOptions {
            compression_threshold: 128,
            ..FileStoreOptions::default()
        });
        let big = "payload ".repeat(1000);
        store.set("big", CacheValue::from(big.as_str()), None).unwrap();
        let raw = store
            .view(|txn| txn.fetch(DEFAULT_TABLE, b"big"))
            .unwrap()
            .unwrap();
        assert!(codec::is_compressed(&raw));
        store.overlay().clear();
        assert_eq!(store.get("big").unwrap(), big);
    }

    #[test]
    fn test_ttl_expiry() {
        let (store, _dir) = open_store();
        store
            .set("t", CacheValue::from("x"), Some(Duration::from_millis(50)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(store.get("t").unwrap_err().is_not_found());
        assert!(store.ttl("t").unwrap_err().is_not_found());
    }

    #[test]
    fn test_ttl_reporting() {
        let (store, _dir) = open_store();
        store.set("forever", CacheValue::from("x"), None).unwrap();
        assert_eq!(store.ttl("forever").unwrap(), Ttl::Never);
        assert_eq!(store.ttl("forever").unwrap().as_secs_i64(), -1);

        store.expire("forever", Duration::from_secs(100)).unwrap();
        match store.ttl("forever").unwrap() {
            Ttl::Expires(left) => assert!(left.as_secs() >= 98 && left.as_secs() <= 100),
            Ttl::Never => panic!("expected a deadline"),
        }

        store.expire("forever", Duration::ZERO).unwrap();
        assert_eq!(store.ttl("forever").unwrap(), Ttl::Never);
        assert!(store.expire("nope", Duration::from_secs(1)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_nx() {
        let (store, _dir) = open_store();
        assert!(store.set_nx("lock", CacheValue::from("1"), None).unwrap());
        assert!(!store.set_nx("lock", CacheValue::from("2"), None).unwrap());
        assert_eq!(store.get("lock").unwrap(), "1");
    }

    #[test]
    fn test_del_and_exists() {
        let (store, _dir) = open_store();
        store.set("a", CacheValue::from("1"), None).unwrap();
        store.sadd("s", &keys(&["m"])).unwrap();
        store.zadd("z", &[crate::cache::value::ScoredMember::new(1.0, "m")]).unwrap();

        assert_eq!(store.exists(&keys(&["a", "s", "z", "nope"])).unwrap(), 3);
        assert_eq!(store.del(&keys(&["a", "s", "z", "nope"])).unwrap(), 3);
        assert_eq!(store.exists(&keys(&["a", "s", "z"])).unwrap(), 0);
        assert!(store.get("a").unwrap_err().is_not_found());

        // Score index went with the forward map
        store.zadd("z", &[crate::cache::value::ScoredMember::new(2.0, "n")]).unwrap();
        assert_eq!(store.zrange("z", 0, -1).unwrap(), vec!["n"]);
    }

    #[test]
    fn test_incr_semantics() {
        let (store, _dir) = open_store();
        assert_eq!(store.incr("c").unwrap(), 1);
        assert_eq!(store.incr_by("c", 10).unwrap(), 11);
        assert_eq!(store.decr("c").unwrap(), 10);
        assert_eq!(store.get("c").unwrap(), "10");

        store.set("s", CacheValue::from("41"), None).unwrap();
        assert_eq!(store.incr("s").unwrap(), 42);

        store.set("word", CacheValue::from("abc"), None).unwrap();
        assert!(matches!(store.incr("word"), Err(CacheError::TypeMismatch(_))));

        store.set("max", CacheValue::from(i64::MAX), None).unwrap();
        assert!(matches!(store.incr("max"), Err(CacheError::TypeMismatch(_))));
    }

    #[test]
    fn test_incr_keeps_expiration() {
        let (store, _dir) = open_store();
        store
            .set("c", CacheValue::from(1i64), Some(Duration::from_secs(100)))
            .unwrap();
        store.incr("c").unwrap();
        assert!(matches!(store.ttl("c").unwrap(), Ttl::Expires(_)));
    }

    #[test]
    fn test_concurrent_incr() {
        let (store, _dir) = open_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.incr("hits").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("hits").unwrap(), "400");
    }

    #[test]
    fn test_read_fill_loses_to_concurrent_delete() {
        let (store, _dir) = open_store();
        store.set("k", CacheValue::from("old"), None).unwrap();
        store.overlay().clear();

        // A reader takes its generation and snapshot, then a delete commits
        let seen = store.overlay().generation("k");
        let snapshot = store
            .view(|txn| live_scalar(txn, "k", unix_now()))
            .unwrap()
            .unwrap();
        store.del(&keys(&["k"])).unwrap();

        assert!(!store.overlay().fill("k".to_string(), snapshot, seen));
        assert!(store.get("k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_readers_racing_deletes_never_resurrect() {
        let (store, _dir) = open_store();
        let store = Arc::new(store);

        for round in 0..50 {
            let key = format!("k{}", round);
            store.set(&key, CacheValue::from("v"), None).unwrap();
            store.overlay().invalidate(&key);

            let readers: Vec<_> = (0..4)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let key = key.clone();
                    std::thread::spawn(move || {
                        for _ in 0..20 {
                            let _ = store.get(&key);
                        }
                    })
                })
                .collect();
            store.del(&[key.clone()]).unwrap();
            for reader in readers {
                reader.join().unwrap();
            }

            assert!(store.get(&key).unwrap_err().is_not_found(), "round {}", round);
        }
    }

    #[test]
    fn test_batch_operations() {
        let (store, _dir) = open_store();
        store
            .batch_set(
                vec![
                    ("a".to_string(), CacheValue::from("1")),
                    ("b".to_string(), CacheValue::from(2i64)),
                ],
                None,
            )
            .unwrap();
        let found = store.batch_get(&keys(&["a", "b", "c"])).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], "1");
        assert_eq!(found["b"], "2");
    }

    #[test]
    fn test_scalar_write_onto_structure_is_rejected() {
        let (store, _dir) = open_store();
        store.rpush("q", &keys(&["a"])).unwrap();
        assert!(matches!(
            store.set("q", CacheValue::from("x"), None),
            Err(CacheError::TypeMismatch(_))
        ));
        assert!(matches!(store.incr("q"), Err(CacheError::TypeMismatch(_))));
        assert!(matches!(store.ttl("q"), Err(CacheError::TypeMismatch(_))));
    }
}
