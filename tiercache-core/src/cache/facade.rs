//! Prefix-aware front door over a backend
//!
//! Every operation comes in two forms: `op(..)` and
//! `op_cancellable(&token, ..)`. The token is inspected once, before the call
//! is dispatched; a running operation is never interrupted.

use crate::cache::backend::{open_backend, BackendKind, CacheBackend};
use crate::cache::value::{CacheValue, ScoredMember, Ttl};
use crate::config::CacheSettings;
use crate::error::{CacheError, CompactionError, Result};
use crate::storage::compaction::CompactionStats;
use crate::storage::expiration::SweepStats;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Cheaply cloneable cache handle
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
}

pub(crate) fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(CacheError::Cancelled)
    } else {
        Ok(())
    }
}

fn texts<V: Into<CacheValue>>(values: impl IntoIterator<Item = V>) -> Vec<String> {
    values.into_iter().map(|v| v.into().to_text()).collect()
}

/// Compile a `*`/`?` glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| CacheError::type_mismatch(format!("bad key pattern: {}", e)))
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Build the configured backend and wrap it
    pub fn open(settings: &CacheSettings) -> Result<Self> {
        Ok(Self::new(open_backend(settings)?, settings.prefix.clone()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub(crate) fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn build_keys(&self, keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| self.build_key(k)).collect()
    }

    // ---- scalar ----

    pub fn get(&self, key: &str) -> Result<String> {
        self.backend.get(&self.build_key(key))
    }

    pub fn get_cancellable(&self, token: &CancellationToken, key: &str) -> Result<String> {
        check(token)?;
        self.get(key)
    }

    /// Stored value without text rendering; `Bytes` come back unchanged
    pub fn get_value(&self, key: &str) -> Result<CacheValue> {
        self.backend.get_value(&self.build_key(key))
    }

    pub fn get_value_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
    ) -> Result<CacheValue> {
        check(token)?;
        self.get_value(key)
    }

    /// Store a value; `None` or a zero TTL never expires
    pub fn set(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.backend.set(&self.build_key(key), value.into(), ttl)
    }

    pub fn set_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        check(token)?;
        self.set(key, value, ttl)
    }

    pub fn set_nx(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.backend.set_nx(&self.build_key(key), value.into(), ttl)
    }

    pub fn set_nx_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        check(token)?;
        self.set_nx(key, value, ttl)
    }

    pub fn del(&self, keys: &[&str]) -> Result<usize> {
        self.backend.del(&self.build_keys(keys))
    }

    pub fn del_cancellable(&self, token: &CancellationToken, keys: &[&str]) -> Result<usize> {
        check(token)?;
        self.del(keys)
    }

    pub fn exists(&self, keys: &[&str]) -> Result<usize> {
        self.backend.exists(&self.build_keys(keys))
    }

    pub fn exists_cancellable(&self, token: &CancellationToken, keys: &[&str]) -> Result<usize> {
        check(token)?;
        self.exists(keys)
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.backend.expire(&self.build_key(key), ttl)
    }

    pub fn expire_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        ttl: Duration,
    ) -> Result<()> {
        check(token)?;
        self.expire(key, ttl)
    }

    pub fn ttl(&self, key: &str) -> Result<Ttl> {
        self.backend.ttl(&self.build_key(key))
    }

    pub fn ttl_cancellable(&self, token: &CancellationToken, key: &str) -> Result<Ttl> {
        check(token)?;
        self.ttl(key)
    }

    pub fn incr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, 1)
    }

    pub fn incr_cancellable(&self, token: &CancellationToken, key: &str) -> Result<i64> {
        check(token)?;
        self.incr(key)
    }

    pub fn decr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, -1)
    }

    pub fn decr_cancellable(&self, token: &CancellationToken, key: &str) -> Result<i64> {
        check(token)?;
        self.decr(key)
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.backend.incr_by(&self.build_key(key), delta)
    }

    pub fn incr_by_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        delta: i64,
    ) -> Result<i64> {
        check(token)?;
        self.incr_by(key, delta)
    }

    /// Live values keyed by the caller's (unprefixed) keys
    pub fn batch_get(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let found = self.backend.batch_get(&self.build_keys(keys))?;
        Ok(found
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(self.prefix.as_str())
                    .map(|short| (short.to_string(), value))
            })
            .collect())
    }

    pub fn batch_get_cancellable(
        &self,
        token: &CancellationToken,
        keys: &[&str],
    ) -> Result<HashMap<String, String>> {
        check(token)?;
        self.batch_get(keys)
    }

    pub fn batch_set<K, V>(
        &self,
        pairs: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<CacheValue>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (self.build_key(k.as_ref()), v.into()))
            .collect();
        self.backend.batch_set(pairs, ttl)
    }

    pub fn batch_set_cancellable<K, V>(
        &self,
        token: &CancellationToken,
        pairs: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<CacheValue>,
    {
        check(token)?;
        self.batch_set(pairs, ttl)
    }

    // ---- hash ----

    pub fn hset<F, V>(&self, key: &str, pairs: impl IntoIterator<Item = (F, V)>) -> Result<usize>
    where
        F: Into<String>,
        V: Into<CacheValue>,
    {
        let pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(f, v)| (f.into(), v.into().to_text()))
            .collect();
        self.backend.hset(&self.build_key(key), &pairs)
    }

    pub fn hset_cancellable<F, V>(
        &self,
        token: &CancellationToken,
        key: &str,
        pairs: impl IntoIterator<Item = (F, V)>,
    ) -> Result<usize>
    where
        F: Into<String>,
        V: Into<CacheValue>,
    {
        check(token)?;
        self.hset(key, pairs)
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<String> {
        self.backend.hget(&self.build_key(key), field)
    }

    pub fn hget_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        field: &str,
    ) -> Result<String> {
        check(token)?;
        self.hget(key, field)
    }

    pub fn hdel(&self, key: &str, fields: &[&str]) -> Result<usize> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.backend.hdel(&self.build_key(key), &fields)
    }

    pub fn hdel_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        fields: &[&str],
    ) -> Result<usize> {
        check(token)?;
        self.hdel(key, fields)
    }

    pub fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.backend.hget_all(&self.build_key(key))
    }

    pub fn hget_all_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
    ) -> Result<HashMap<String, String>> {
        check(token)?;
        self.hget_all(key)
    }

    pub fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.backend.hexists(&self.build_key(key), field)
    }

    pub fn hexists_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        field: &str,
    ) -> Result<bool> {
        check(token)?;
        self.hexists(key, field)
    }

    pub fn hlen(&self, key: &str) -> Result<usize> {
        self.backend.hlen(&self.build_key(key))
    }

    pub fn hlen_cancellable(&self, token: &CancellationToken, key: &str) -> Result<usize> {
        check(token)?;
        self.hlen(key)
    }

    // ---- list ----

    /// Push each value at the head, in argument order
    pub fn lpush<V: Into<CacheValue>>(
        &self,
        key: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        self.backend.lpush(&self.build_key(key), &texts(values))
    }

    pub fn lpush_cancellable<V: Into<CacheValue>>(
        &self,
        token: &CancellationToken,
        key: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        check(token)?;
        self.lpush(key, values)
    }

    pub fn rpush<V: Into<CacheValue>>(
        &self,
        key: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        self.backend.rpush(&self.build_key(key), &texts(values))
    }

    pub fn rpush_cancellable<V: Into<CacheValue>>(
        &self,
        token: &CancellationToken,
        key: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        check(token)?;
        self.rpush(key, values)
    }

    pub fn lpop(&self, key: &str) -> Result<String> {
        self.backend.lpop(&self.build_key(key))
    }

    pub fn lpop_cancellable(&self, token: &CancellationToken, key: &str) -> Result<String> {
        check(token)?;
        self.lpop(key)
    }

    pub fn rpop(&self, key: &str) -> Result<String> {
        self.backend.rpop(&self.build_key(key))
    }

    pub fn rpop_cancellable(&self, token: &CancellationToken, key: &str) -> Result<String> {
        check(token)?;
        self.rpop(key)
    }

    pub fn llen(&self, key: &str) -> Result<usize> {
        self.backend.llen(&self.build_key(key))
    }

    pub fn llen_cancellable(&self, token: &CancellationToken, key: &str) -> Result<usize> {
        check(token)?;
        self.llen(key)
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.backend.lrange(&self.build_key(key), start, stop)
    }

    pub fn lrange_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>> {
        check(token)?;
        self.lrange(key, start, stop)
    }

    // ---- set ----

    pub fn sadd<V: Into<CacheValue>>(
        &self,
        key: &str,
        members: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        self.backend.sadd(&self.build_key(key), &texts(members))
    }

    pub fn sadd_cancellable<V: Into<CacheValue>>(
        &self,
        token: &CancellationToken,
        key: &str,
        members: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        check(token)?;
        self.sadd(key, members)
    }

    pub fn srem<V: Into<CacheValue>>(
        &self,
        key: &str,
        members: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        self.backend.srem(&self.build_key(key), &texts(members))
    }

    pub fn srem_cancellable<V: Into<CacheValue>>(
        &self,
        token: &CancellationToken,
        key: &str,
        members: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        check(token)?;
        self.srem(key, members)
    }

    pub fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.backend.smembers(&self.build_key(key))
    }

    pub fn smembers_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
    ) -> Result<Vec<String>> {
        check(token)?;
        self.smembers(key)
    }

    pub fn sismember(&self, key: &str, member: impl Into<CacheValue>) -> Result<bool> {
        self.backend
            .sismember(&self.build_key(key), &member.into().to_text())
    }

    pub fn sismember_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        member: impl Into<CacheValue>,
    ) -> Result<bool> {
        check(token)?;
        self.sismember(key, member)
    }

    pub fn scard(&self, key: &str) -> Result<usize> {
        self.backend.scard(&self.build_key(key))
    }

    pub fn scard_cancellable(&self, token: &CancellationToken, key: &str) -> Result<usize> {
        check(token)?;
        self.scard(key)
    }

    // ---- sorted set ----

    pub fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        self.backend.zadd(&self.build_key(key), members)
    }

    pub fn zadd_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        members: &[ScoredMember],
    ) -> Result<usize> {
        check(token)?;
        self.zadd(key, members)
    }

    pub fn zrem<V: Into<CacheValue>>(
        &self,
        key: &str,
        members: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        self.backend.zrem(&self.build_key(key), &texts(members))
    }

    pub fn zrem_cancellable<V: Into<CacheValue>>(
        &self,
        token: &CancellationToken,
        key: &str,
        members: impl IntoIterator<Item = V>,
    ) -> Result<usize> {
        check(token)?;
        self.zrem(key, members)
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<f64> {
        self.backend.zscore(&self.build_key(key), member)
    }

    pub fn zscore_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        member: &str,
    ) -> Result<f64> {
        check(token)?;
        self.zscore(key, member)
    }

    pub fn zcard(&self, key: &str) -> Result<usize> {
        self.backend.zcard(&self.build_key(key))
    }

    pub fn zcard_cancellable(&self, token: &CancellationToken, key: &str) -> Result<usize> {
        check(token)?;
        self.zcard(key)
    }

    pub fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.backend.zrange(&self.build_key(key), start, stop)
    }

    pub fn zrange_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>> {
        check(token)?;
        self.zrange(key, start, stop)
    }

    pub fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ScoredMember>> {
        self.backend
            .zrange_with_scores(&self.build_key(key), start, stop)
    }

    pub fn zrange_with_scores_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ScoredMember>> {
        check(token)?;
        self.zrange_with_scores(key, start, stop)
    }

    pub fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        self.backend.zrange_by_score(&self.build_key(key), min, max)
    }

    pub fn zrange_by_score_cancellable(
        &self,
        token: &CancellationToken,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>> {
        check(token)?;
        self.zrange_by_score(key, min, max)
    }

    // ---- keyspace ----

    /// Keys under this cache's prefix matching a `*`/`?` glob, prefix stripped
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = match pattern {
            "" | "*" => None,
            pattern => Some(glob_to_regex(pattern)?),
        };
        let mut keys: Vec<String> = self
            .backend
            .keys()?
            .into_iter()
            .filter_map(|full| full.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .filter(|short| matcher.as_ref().map_or(true, |re| re.is_match(short)))
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn keys_cancellable(
        &self,
        token: &CancellationToken,
        pattern: &str,
    ) -> Result<Vec<String>> {
        check(token)?;
        self.keys(pattern)
    }

    pub fn ping(&self) -> Result<()> {
        self.backend.ping()
    }

    pub fn ping_cancellable(&self, token: &CancellationToken) -> Result<()> {
        check(token)?;
        self.ping()
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }

    pub fn close_cancellable(&self, token: &CancellationToken) -> Result<()> {
        check(token)?;
        self.close()
    }

    // ---- maintenance ----

    pub fn sweep_expired(&self, limit: usize) -> Result<SweepStats> {
        self.backend.sweep_expired(limit)
    }

    pub fn sweep_expired_cancellable(
        &self,
        token: &CancellationToken,
        limit: usize,
    ) -> Result<SweepStats> {
        check(token)?;
        self.sweep_expired(limit)
    }

    pub fn compact(&self) -> std::result::Result<Option<CompactionStats>, CompactionError> {
        self.backend.compact()
    }

    pub fn compact_cancellable(
        &self,
        token: &CancellationToken,
    ) -> std::result::Result<Option<CompactionStats>, CompactionError> {
        if token.is_cancelled() {
            return Err(CompactionError::Cancelled);
        }
        self.compact()
    }
}
