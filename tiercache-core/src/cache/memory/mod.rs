//! In-memory cache backend
//!
//! A DashMap of typed structures. Every key may carry a TTL, tracked in a
//! deadline heap that the sweep drains; reads treat expired keys as absent.

pub mod data_structures;
pub mod ttl_manager;

pub use data_structures::*;
pub use ttl_manager::*;

use crate::cache::backend::{BackendKind, CacheBackend};
use crate::cache::value::{CacheValue, ScoredMember, Ttl};
use crate::error::{CacheError, CompactionError, Result};
use crate::storage::compaction::CompactionStats;
use crate::storage::expiration::SweepStats;
use crate::storage::namespace::KeyKind;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// DashMap-backed cache
pub struct MemoryStore {
    entries: DashMap<String, CachedValue>,
    ttl_manager: TtlManager,
    closed: AtomicBool,
    stats: CacheStats,
}

fn mismatch(key: &str, expected: KeyKind, found: KeyKind) -> CacheError {
    CacheError::type_mismatch(format!(
        "key '{}' holds a {}, not a {}",
        key,
        found.name(),
        expected.name()
    ))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl_manager: TtlManager::new(),
            closed: AtomicBool::new(false),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of stored keys, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::engine("cache is closed"))
        } else {
            Ok(())
        }
    }

    fn track(&self, key: &str, cached: &CachedValue) {
        if let Some(at) = cached.expires_at {
            self.ttl_manager.add(key.to_string(), at);
        }
    }

    /// Run `f` on the live value under `key`
    fn read<T>(&self, key: &str, f: impl FnOnce(&CacheData) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        let now = Utc::now();
        match self.entries.get(key) {
            Some(slot) if !slot.is_expired_at(now) => {
                self.stats.record_hit();
                f(&slot.value)
            }
            Some(slot) => {
                drop(slot);
                self.entries.remove_if(key, |_, v| v.is_expired_at(now));
                self.stats.record_miss();
                Err(CacheError::KeyNotFound)
            }
            None => {
                self.stats.record_miss();
                Err(CacheError::KeyNotFound)
            }
        }
    }

    /// Run `f` on the live value under `key` with the shard locked, or fail
    /// with `KeyNotFound` when there is none
    fn modify<T>(&self, key: &str, f: impl FnOnce(&mut CachedValue) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired() => f(&mut slot),
            _ => Err(CacheError::KeyNotFound),
        }
    }

    /// Like `modify`, but creates the structure with `init` when the key is
    /// absent or expired
    fn upsert<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> CacheData,
        f: impl FnOnce(&mut CachedValue) -> Result<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        let mut slot = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CachedValue::new(init()));
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(CachedValue::new(init())),
        };
        f(&mut slot)
    }

    fn write_scalar(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        let cached = CachedValue::with_ttl(CacheData::String(value), ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if !current.is_expired() && current.value.kind() != KeyKind::Scalar {
                    return Err(mismatch(key, KeyKind::Scalar, current.value.kind()));
                }
                self.track(key, &cached);
                occupied.insert(cached);
            }
            Entry::Vacant(vacant) => {
                self.track(key, &cached);
                vacant.insert(cached);
            }
        }
        self.stats.record_set();
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! expect_data {
    ($data:expr, $key:expr, $variant:ident, $kind:expr) => {
        match $data {
            CacheData::$variant(inner) => inner,
            other => return Err(mismatch($key, $kind, other.kind())),
        }
    };
}

impl CacheBackend for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn get(&self, key: &str) -> Result<String> {
        self.read(key, |data| {
            let value = expect_data!(data, key, String, KeyKind::Scalar);
            Ok(value.to_text())
        })
    }

    fn get_value(&self, key: &str) -> Result<CacheValue> {
        self.read(key, |data| {
            let value = expect_data!(data, key, String, KeyKind::Scalar);
            Ok(value.clone())
        })
    }

    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.write_scalar(key, value, ttl)?;
        debug!(key, "SET");
        Ok(())
    }

    fn set_nx(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<bool> {
        self.ensure_open()?;
        let cached = CachedValue::with_ttl(CacheData::String(value), ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if !current.is_expired() {
                    return match current.value.kind() {
                        KeyKind::Scalar => Ok(false),
                        other => Err(mismatch(key, KeyKind::Scalar, other)),
                    };
                }
                self.track(key, &cached);
                occupied.insert(cached);
            }
            Entry::Vacant(vacant) => {
                self.track(key, &cached);
                vacant.insert(cached);
            }
        }
        self.stats.record_set();
        Ok(true)
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        self.ensure_open()?;
        let mut removed = 0;
        for key in keys {
            if let Some((_, cached)) = self.entries.remove(key) {
                if !cached.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn exists(&self, keys: &[String]) -> Result<usize> {
        self.ensure_open()?;
        let now = Utc::now();
        Ok(keys
            .iter()
            .filter(|key| {
                self.entries
                    .get(key.as_str())
                    .map(|slot| !slot.is_expired_at(now))
                    .unwrap_or(false)
            })
            .count())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.modify(key, |cached| {
            cached.expires_at = deadline(Some(ttl));
            self.track(key, cached);
            Ok(())
        })
    }

    fn ttl(&self, key: &str) -> Result<Ttl> {
        self.ensure_open()?;
        let now = Utc::now();
        match self.entries.get(key) {
            Some(slot) if !slot.is_expired_at(now) => Ok(match slot.expires_at {
                None => Ttl::Never,
                Some(at) => Ttl::Expires((at - now).to_std().unwrap_or(Duration::ZERO)),
            }),
            _ => Err(CacheError::KeyNotFound),
        }
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.upsert(
            key,
            || CacheData::String(CacheValue::Int(0)),
            |cached| {
                let current = expect_data!(&cached.value, key, String, KeyKind::Scalar);
                let base = current.as_integer().ok_or_else(|| {
                    CacheError::type_mismatch(format!("value of '{}' is not an integer", key))
                })?;
                let next = base.checked_add(delta).ok_or_else(|| {
                    CacheError::type_mismatch(format!("increment of '{}' would overflow", key))
                })?;
                cached.value = CacheData::String(CacheValue::Int(next));
                Ok(next)
            },
        )
    }

    fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = self.entries.get(key) {
                if let (false, CacheData::String(value)) = (slot.is_expired_at(now), &slot.value) {
                    out.insert(key.clone(), value.to_text());
                }
            }
        }
        Ok(out)
    }

    fn batch_set(&self, pairs: Vec<(String, CacheValue)>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in pairs {
            self.write_scalar(&key, value, ttl)?;
        }
        Ok(())
    }

    fn hset(&self, key: &str, pairs: &[(String, String)]) -> Result<usize> {
        self.upsert(
            key,
            || CacheData::Hash(CacheHash::new()),
            |cached| {
                let hash = expect_data!(&mut cached.value, key, Hash, KeyKind::Hash);
                Ok(pairs
                    .iter()
                    .filter(|(field, value)| hash.hset(field.clone(), value.clone()))
                    .count())
            },
        )
    }

    fn hget(&self, key: &str, field: &str) -> Result<String> {
        self.read(key, |data| {
            let hash = expect_data!(data, key, Hash, KeyKind::Hash);
            hash.hget(field).cloned().ok_or(CacheError::KeyNotFound)
        })
    }

    fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        self.modify(key, |cached| {
            let hash = expect_data!(&mut cached.value, key, Hash, KeyKind::Hash);
            Ok(fields.iter().filter(|field| hash.hdel(field)).count())
        })
    }

    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.read(key, |data| {
            let hash = expect_data!(data, key, Hash, KeyKind::Hash);
            Ok(hash.hgetall())
        })
    }

    fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.read(key, |data| {
            let hash = expect_data!(data, key, Hash, KeyKind::Hash);
            Ok(hash.hexists(field))
        })
    }

    fn hlen(&self, key: &str) -> Result<usize> {
        self.read(key, |data| {
            let hash = expect_data!(data, key, Hash, KeyKind::Hash);
            Ok(hash.hlen())
        })
    }

    fn lpush(&self, key: &str, values: &[String]) -> Result<usize> {
        self.upsert(
            key,
            || CacheData::List(CacheList::new()),
            |cached| {
                let list = expect_data!(&mut cached.value, key, List, KeyKind::List);
                for value in values {
                    list.lpush(value.clone());
                }
                Ok(list.llen())
            },
        )
    }

    fn rpush(&self, key: &str, values: &[String]) -> Result<usize> {
        self.upsert(
            key,
            || CacheData::List(CacheList::new()),
            |cached| {
                let list = expect_data!(&mut cached.value, key, List, KeyKind::List);
                for value in values {
                    list.rpush(value.clone());
                }
                Ok(list.llen())
            },
        )
    }

    fn lpop(&self, key: &str) -> Result<String> {
        self.modify(key, |cached| {
            let list = expect_data!(&mut cached.value, key, List, KeyKind::List);
            list.lpop().ok_or(CacheError::KeyNotFound)
        })
    }

    fn rpop(&self, key: &str) -> Result<String> {
        self.modify(key, |cached| {
            let list = expect_data!(&mut cached.value, key, List, KeyKind::List);
            list.rpop().ok_or(CacheError::KeyNotFound)
        })
    }

    fn llen(&self, key: &str) -> Result<usize> {
        self.read(key, |data| {
            let list = expect_data!(data, key, List, KeyKind::List);
            Ok(list.llen())
        })
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.read(key, |data| {
            let list = expect_data!(data, key, List, KeyKind::List);
            Ok(list.lrange(start, stop))
        })
    }

    fn sadd(&self, key: &str, members: &[String]) -> Result<usize> {
        self.upsert(
            key,
            || CacheData::Set(CacheSet::new()),
            |cached| {
                let set = expect_data!(&mut cached.value, key, Set, KeyKind::Set);
                Ok(members.iter().filter(|m| set.sadd((*m).clone())).count())
            },
        )
    }

    fn srem(&self, key: &str, members: &[String]) -> Result<usize> {
        self.modify(key, |cached| {
            let set = expect_data!(&mut cached.value, key, Set, KeyKind::Set);
            Ok(members.iter().filter(|m| set.srem(m)).count())
        })
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.read(key, |data| {
            let set = expect_data!(data, key, Set, KeyKind::Set);
            Ok(set.smembers())
        })
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.read(key, |data| {
            let set = expect_data!(data, key, Set, KeyKind::Set);
            Ok(set.sismember(member))
        })
    }

    fn scard(&self, key: &str) -> Result<usize> {
        self.read(key, |data| {
            let set = expect_data!(data, key, Set, KeyKind::Set);
            Ok(set.scard())
        })
    }

    fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        if members.iter().any(|m| !m.score.is_finite()) {
            return Err(CacheError::type_mismatch("sorted-set score must be a finite number"));
        }
        self.upsert(
            key,
            || CacheData::SortedSet(CacheSortedSet::new()),
            |cached| {
                let zset = expect_data!(&mut cached.value, key, SortedSet, KeyKind::SortedSet);
                Ok(members
                    .iter()
                    .filter(|m| zset.zadd(m.member.clone(), m.score))
                    .count())
            },
        )
    }

    fn zrem(&self, key: &str, members: &[String]) -> Result<usize> {
        self.modify(key, |cached| {
            let zset = expect_data!(&mut cached.value, key, SortedSet, KeyKind::SortedSet);
            Ok(members.iter().filter(|m| zset.zrem(m)).count())
        })
    }

    fn zscore(&self, key: &str, member: &str) -> Result<f64> {
        self.read(key, |data| {
            let zset = expect_data!(data, key, SortedSet, KeyKind::SortedSet);
            zset.zscore(member).ok_or(CacheError::KeyNotFound)
        })
    }

    fn zcard(&self, key: &str) -> Result<usize> {
        self.read(key, |data| {
            let zset = expect_data!(data, key, SortedSet, KeyKind::SortedSet);
            Ok(zset.zcard())
        })
    }

    fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .zrange_with_scores(key, start, stop)?
            .into_iter()
            .map(|m| m.member)
            .collect())
    }

    fn zrange_with_scores(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>> {
        self.read(key, |data| {
            let zset = expect_data!(data, key, SortedSet, KeyKind::SortedSet);
            Ok(zset.zrange(start, stop))
        })
    }

    fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        self.read(key, |data| {
            let zset = expect_data!(data, key, SortedSet, KeyKind::SortedSet);
            Ok(zset
                .zrangebyscore(min, max)
                .into_iter()
                .map(|m| m.member)
                .collect())
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn sweep_expired(&self, limit: usize) -> Result<SweepStats> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut stats = SweepStats::default();
        for due in self.ttl_manager.pop_expired(now, limit) {
            stats.processed += 1;
            // Skip keys rewritten with a later deadline since
            if self
                .entries
                .remove_if(&due.key, |_, cached| cached.is_expired_at(now))
                .is_some()
            {
                stats.removed += 1;
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        if stats.processed > 0 {
            info!(processed = stats.processed, removed = stats.removed, "memory sweep finished");
        }
        Ok(stats)
    }

    fn compact(&self) -> std::result::Result<Option<CompactionStats>, CompactionError> {
        Ok(None)
    }

    fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
        self.ttl_manager.clear();
        Ok(())
    }
}

/// Memory backend counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Keys removed by the sweep
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
