//! Convenience operations built from the basic facade calls

use crate::cache::facade::{check, Cache};
use crate::cache::value::CacheValue;
use crate::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const LOCK_PREFIX: &str = "lock:";

fn lock_key(key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, key)
}

impl Cache {
    /// Store any serde value as a JSON document
    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let document = serde_json::to_value(value)
            .map_err(|e| CacheError::type_mismatch(format!("value is not serializable: {}", e)))?;
        self.set(key, CacheValue::Json(document), ttl)
    }

    pub fn set_json_cancellable<T: Serialize + ?Sized>(
        &self,
        token: &CancellationToken,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        check(token)?;
        self.set_json(key, value, ttl)
    }

    /// Read a value back into `T`
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let text = self.get(key)?;
        serde_json::from_str(&text).map_err(|e| {
            CacheError::type_mismatch(format!("value of '{}' is not the expected JSON: {}", key, e))
        })
    }

    pub fn get_json_cancellable<T: DeserializeOwned>(
        &self,
        token: &CancellationToken,
        key: &str,
    ) -> Result<T> {
        check(token)?;
        self.get_json(key)
    }

    /// Cached `T`, or compute it with `f`, store it and return it
    pub fn remember<T, F>(&self, key: &str, ttl: Option<Duration>, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        match self.get_json(key) {
            Ok(value) => return Ok(value),
            Err(CacheError::KeyNotFound) => {}
            Err(err) => return Err(err),
        }
        debug!(key, "cache miss, computing value");
        let value = f()?;
        self.set_json(key, &value, ttl)?;
        Ok(value)
    }

    pub fn remember_cancellable<T, F>(
        &self,
        token: &CancellationToken,
        key: &str,
        ttl: Option<Duration>,
        f: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        check(token)?;
        self.remember(key, ttl, f)
    }

    /// Current text value, or store `default` and return its text
    pub fn get_or_set(
        &self,
        key: &str,
        default: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<String> {
        match self.get(key) {
            Err(CacheError::KeyNotFound) => {
                let value = default.into();
                let text = value.to_text();
                self.set(key, value, ttl)?;
                Ok(text)
            }
            other => other,
        }
    }

    pub fn get_or_set_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        default: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<String> {
        check(token)?;
        self.get_or_set(key, default, ttl)
    }

    /// Delete every key matching the glob; returns how many went
    pub fn flush_by_pattern(&self, pattern: &str) -> Result<usize> {
        let keys = self.keys(pattern)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.del(&refs)
    }

    pub fn flush_by_pattern_cancellable(
        &self,
        token: &CancellationToken,
        pattern: &str,
    ) -> Result<usize> {
        check(token)?;
        self.flush_by_pattern(pattern)
    }

    /// Take the advisory lock `lock:<key>`; false if someone holds it
    pub fn try_lock(&self, key: &str, ttl: Option<Duration>) -> Result<bool> {
        self.set_nx(&lock_key(key), "locked", ttl)
    }

    pub fn try_lock_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        check(token)?;
        self.try_lock(key, ttl)
    }

    /// Release the lock; returns whether it was held
    pub fn unlock(&self, key: &str) -> Result<bool> {
        let lock = lock_key(key);
        Ok(self.del(&[lock.as_str()])? > 0)
    }

    pub fn unlock_cancellable(&self, token: &CancellationToken, key: &str) -> Result<bool> {
        check(token)?;
        self.unlock(key)
    }

    /// Run `f` while holding the lock. `Ok(None)` when the lock was taken.
    pub fn with_lock<T, F>(&self, key: &str, ttl: Option<Duration>, f: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        if !self.try_lock(key, ttl)? {
            debug!(key, "lock is held elsewhere");
            return Ok(None);
        }
        let outcome = f();
        if let Err(err) = self.unlock(key) {
            error!(key, error = %err, "failed to release lock");
        }
        outcome.map(Some)
    }

    pub fn with_lock_cancellable<T, F>(
        &self,
        token: &CancellationToken,
        key: &str,
        ttl: Option<Duration>,
        f: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        check(token)?;
        self.with_lock(key, ttl, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryStore;
    use serde::Deserialize;
    use std::cell::Cell;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryStore::new()), "app:")
    }

    #[test]
    fn test_json_round_trip() {
        let cache = cache();
        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };
        cache.set_json("p", &profile, None).unwrap();
        assert_eq!(cache.get_json::<Profile>("p").unwrap(), profile);

        cache.set("plain", "not json", None).unwrap();
        assert!(matches!(
            cache.get_json::<Profile>("plain"),
            Err(CacheError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_remember_computes_once() {
        let cache = cache();
        let calls = Cell::new(0);
        for _ in 0..3 {
            let value: Vec<i32> = cache
                .remember("nums", None, || {
                    calls.set(calls.get() + 1);
                    Ok(vec![1, 2, 3])
                })
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_get_or_set() {
        let cache = cache();
        assert_eq!(cache.get_or_set("k", 10i64, None).unwrap(), "10");
        assert_eq!(cache.get_or_set("k", 99i64, None).unwrap(), "10");
    }

    #[test]
    fn test_flush_by_pattern() {
        let cache = cache();
        cache.set("session:1", "a", None).unwrap();
        cache.set("session:2", "b", None).unwrap();
        cache.set("user:1", "c", None).unwrap();
        assert_eq!(cache.flush_by_pattern("session:*").unwrap(), 2);
        assert_eq!(cache.keys("*").unwrap(), vec!["user:1"]);
        assert_eq!(cache.flush_by_pattern("nothing*").unwrap(), 0);
    }

    #[test]
    fn test_lock_lifecycle() {
        let cache = cache();
        assert!(cache.try_lock("job", None).unwrap());
        assert!(!cache.try_lock("job", None).unwrap());
        assert_eq!(cache.with_lock("job", None, || Ok(1)).unwrap(), None);
        assert!(cache.unlock("job").unwrap());
        assert!(!cache.unlock("job").unwrap());

        assert_eq!(cache.with_lock("job", None, || Ok(7)).unwrap(), Some(7));
        // Released after the closure ran
        assert!(cache.try_lock("job", None).unwrap());
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let cache = cache();
        let result: Result<Option<()>> =
            cache.with_lock("job", None, || Err(CacheError::type_mismatch("boom")));
        assert!(result.is_err());
        assert!(cache.try_lock("job", None).unwrap());
    }
}
