//! Backend abstraction and selection
//!
//! Every method takes fully-qualified keys; prefixing happens in the facade.

use crate::cache::memory::MemoryStore;
use crate::cache::value::{CacheValue, ScoredMember, Ttl};
use crate::config::CacheSettings;
use crate::error::{CacheError, CompactionError, Result};
use crate::storage::compaction::CompactionStats;
use crate::storage::expiration::SweepStats;
use crate::storage::{FileStore, FileStoreOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Operations every cache backend provides
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn get(&self, key: &str) -> Result<String>;
    fn get_value(&self, key: &str) -> Result<CacheValue>;
    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()>;
    fn set_nx(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<bool>;
    fn del(&self, keys: &[String]) -> Result<usize>;
    fn exists(&self, keys: &[String]) -> Result<usize>;
    fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    fn ttl(&self, key: &str) -> Result<Ttl>;
    fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;
    fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, String>>;
    fn batch_set(&self, pairs: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()>;

    fn hset(&self, key: &str, pairs: &[(String, String)]) -> Result<usize>;
    fn hget(&self, key: &str, field: &str) -> Result<String>;
    fn hdel(&self, key: &str, fields: &[String]) -> Result<usize>;
    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;
    fn hexists(&self, key: &str, field: &str) -> Result<bool>;
    fn hlen(&self, key: &str) -> Result<usize>;

    fn lpush(&self, key: &str, values: &[String]) -> Result<usize>;
    fn rpush(&self, key: &str, values: &[String]) -> Result<usize>;
    fn lpop(&self, key: &str) -> Result<String>;
    fn rpop(&self, key: &str) -> Result<String>;
    fn llen(&self, key: &str) -> Result<usize>;
    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    fn sadd(&self, key: &str, members: &[String]) -> Result<usize>;
    fn srem(&self, key: &str, members: &[String]) -> Result<usize>;
    fn smembers(&self, key: &str) -> Result<Vec<String>>;
    fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    fn scard(&self, key: &str) -> Result<usize>;

    fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize>;
    fn zrem(&self, key: &str, members: &[String]) -> Result<usize>;
    fn zscore(&self, key: &str, member: &str) -> Result<f64>;
    fn zcard(&self, key: &str) -> Result<usize>;
    fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    fn zrange_with_scores(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>>;
    fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;

    /// Every live key, fully qualified
    fn keys(&self) -> Result<Vec<String>>;

    /// Reclaim at most `limit` expired keys
    fn sweep_expired(&self, limit: usize) -> Result<SweepStats>;

    /// Shrink backing storage; `None` when the backend has nothing to compact
    fn compact(&self) -> std::result::Result<Option<CompactionStats>, CompactionError>;

    fn ping(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Configured backend flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
    Redis,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Redis => "redis",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "redis" => Ok(BackendKind::Redis),
            other => Err(CacheError::Config(format!("unknown cache backend '{}'", other))),
        }
    }
}

/// Build the backend named by `settings`
pub fn open_backend(settings: &CacheSettings) -> Result<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match settings.backend {
        BackendKind::Memory => Arc::new(MemoryStore::new()),
        BackendKind::File => Arc::new(FileStore::open(
            &settings.file_path,
            FileStoreOptions::from(settings),
        )?),
        BackendKind::Redis => {
            return Err(CacheError::Config(
                "the redis backend needs a network client and is not available".to_string(),
            ))
        }
    };
    info!(backend = %settings.backend, prefix = %settings.prefix, "cache backend ready");
    Ok(backend)
}

impl From<&CacheSettings> for FileStoreOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            compression_threshold: settings.compression_threshold,
            overlay_ttl: Duration::from_secs(settings.overlay_ttl_secs),
            engine_cache_bytes: settings.engine_cache_bytes,
        }
    }
}

impl CacheBackend for FileStore {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get(&self, key: &str) -> Result<String> {
        FileStore::get(self, key)
    }

    fn get_value(&self, key: &str) -> Result<CacheValue> {
        FileStore::get_value(self, key)
    }

    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        FileStore::set(self, key, value, ttl)
    }

    fn set_nx(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<bool> {
        FileStore::set_nx(self, key, value, ttl)
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        FileStore::del(self, keys)
    }

    fn exists(&self, keys: &[String]) -> Result<usize> {
        FileStore::exists(self, keys)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        FileStore::expire(self, key, ttl)
    }

    fn ttl(&self, key: &str) -> Result<Ttl> {
        FileStore::ttl(self, key)
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        FileStore::incr_by(self, key, delta)
    }

    fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        FileStore::batch_get(self, keys)
    }

    fn batch_set(&self, pairs: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
        FileStore::batch_set(self, pairs, ttl)
    }

    fn hset(&self, key: &str, pairs: &[(String, String)]) -> Result<usize> {
        FileStore::hset(self, key, pairs)
    }

    fn hget(&self, key: &str, field: &str) -> Result<String> {
        FileStore::hget(self, key, field)
    }

    fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        FileStore::hdel(self, key, fields)
    }

    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        FileStore::hget_all(self, key)
    }

    fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        FileStore::hexists(self, key, field)
    }

    fn hlen(&self, key: &str) -> Result<usize> {
        FileStore::hlen(self, key)
    }

    fn lpush(&self, key: &str, values: &[String]) -> Result<usize> {
        FileStore::lpush(self, key, values)
    }

    fn rpush(&self, key: &str, values: &[String]) -> Result<usize> {
        FileStore::rpush(self, key, values)
    }

    fn lpop(&self, key: &str) -> Result<String> {
        FileStore::lpop(self, key)
    }

    fn rpop(&self, key: &str) -> Result<String> {
        FileStore::rpop(self, key)
    }

    fn llen(&self, key: &str) -> Result<usize> {
        FileStore::llen(self, key)
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        FileStore::lrange(self, key, start, stop)
    }

    fn sadd(&self, key: &str, members: &[String]) -> Result<usize> {
        FileStore::sadd(self, key, members)
    }

    fn srem(&self, key: &str, members: &[String]) -> Result<usize> {
        FileStore::srem(self, key, members)
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        FileStore::smembers(self, key)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        FileStore::sismember(self, key, member)
    }

    fn scard(&self, key: &str) -> Result<usize> {
        FileStore::scard(self, key)
    }

    fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        FileStore::zadd(self, key, members)
    }

    fn zrem(&self, key: &str, members: &[String]) -> Result<usize> {
        FileStore::zrem(self, key, members)
    }

    fn zscore(&self, key: &str, member: &str) -> Result<f64> {
        FileStore::zscore(self, key, member)
    }

    fn zcard(&self, key: &str) -> Result<usize> {
        FileStore::zcard(self, key)
    }

    fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        FileStore::zrange(self, key, start, stop)
    }

    fn zrange_with_scores(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>> {
        FileStore::zrange_with_scores(self, key, start, stop)
    }

    fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        FileStore::zrange_by_score(self, key, min, max)
    }

    fn keys(&self) -> Result<Vec<String>> {
        FileStore::keys(self)
    }

    fn sweep_expired(&self, limit: usize) -> Result<SweepStats> {
        FileStore::sweep_expired(self, limit)
    }

    fn compact(&self) -> std::result::Result<Option<CompactionStats>, CompactionError> {
        FileStore::compact(self).map(Some)
    }

    fn ping(&self) -> Result<()> {
        FileStore::ping(self)
    }

    fn close(&self) -> Result<()> {
        FileStore::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("Memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!(matches!("mongo".parse::<BackendKind>(), Err(CacheError::Config(_))));
        assert_eq!(BackendKind::Redis.to_string(), "redis");
    }

    #[test]
    fn test_open_backend_selects_implementation() {
        let dir = TempDir::new().unwrap();
        let mut settings = CacheSettings {
            file_path: dir.path().join("cache.db"),
            ..CacheSettings::default()
        };

        settings.backend = BackendKind::File;
        let file = open_backend(&settings).unwrap();
        assert_eq!(file.kind(), BackendKind::File);
        file.ping().unwrap();

        settings.backend = BackendKind::Memory;
        assert_eq!(open_backend(&settings).unwrap().kind(), BackendKind::Memory);

        settings.backend = BackendKind::Redis;
        assert!(matches!(open_backend(&settings), Err(CacheError::Config(_))));
    }
}
