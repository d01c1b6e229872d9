//! Typed structures held by the in-memory backend

use crate::cache::value::{CacheValue, ScoredMember};
use crate::storage::list::resolve_range;
use crate::storage::namespace::KeyKind;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

/// Value with its expiration deadline
#[derive(Debug, Clone)]
pub struct CachedValue {
    /// The actual value
    pub value: CacheData,
    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedValue {
    pub fn new(value: CacheData) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn with_ttl(value: CacheData, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: deadline(ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Deadline `ttl` from now; `None` or zero means no expiry
pub fn deadline(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = ttl.filter(|ttl| !ttl.is_zero())?;
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Some(Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
}

/// Cache data types
#[derive(Debug, Clone)]
pub enum CacheData {
    String(CacheValue),
    List(CacheList),
    Set(CacheSet),
    SortedSet(CacheSortedSet),
    Hash(CacheHash),
}

impl CacheData {
    pub fn kind(&self) -> KeyKind {
        match self {
            CacheData::String(_) => KeyKind::Scalar,
            CacheData::List(_) => KeyKind::List,
            CacheData::Set(_) => KeyKind::Set,
            CacheData::SortedSet(_) => KeyKind::SortedSet,
            CacheData::Hash(_) => KeyKind::Hash,
        }
    }
}

/// List (VecDeque-backed)
#[derive(Debug, Clone, Default)]
pub struct CacheList {
    items: VecDeque<String>,
}

impl CacheList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lpush(&mut self, value: String) {
        self.items.push_front(value);
    }

    pub fn rpush(&mut self, value: String) {
        self.items.push_back(value);
    }

    pub fn lpop(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    pub fn rpop(&mut self) -> Option<String> {
        self.items.pop_back()
    }

    pub fn llen(&self) -> usize {
        self.items.len()
    }

    /// Inclusive range with negative indices counted from the tail
    pub fn lrange(&self, start: i64, stop: i64) -> Vec<String> {
        match resolve_range(start, stop, self.items.len() as i64) {
            Some((start, stop)) => self
                .items
                .range(start as usize..=stop as usize)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Set ordered by member
#[derive(Debug, Clone, Default)]
pub struct CacheSet {
    items: BTreeSet<String>,
}

impl CacheSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sadd(&mut self, member: String) -> bool {
        self.items.insert(member)
    }

    pub fn srem(&mut self, member: &str) -> bool {
        self.items.remove(member)
    }

    pub fn sismember(&self, member: &str) -> bool {
        self.items.contains(member)
    }

    pub fn smembers(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }

    pub fn scard(&self) -> usize {
        self.items.len()
    }
}

/// Sorted set: member -> score, ranked by (score, member)
#[derive(Debug, Clone, Default)]
pub struct CacheSortedSet {
    items: BTreeMap<String, f64>,
}

fn by_score(a: &ScoredMember, b: &ScoredMember) -> Ordering {
    a.score
        .partial_cmp(&b.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.member.cmp(&b.member))
}

impl CacheSortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the member is new
    pub fn zadd(&mut self, member: String, score: f64) -> bool {
        self.items.insert(member, score).is_none()
    }

    pub fn zrem(&mut self, member: &str) -> bool {
        self.items.remove(member).is_some()
    }

    pub fn zscore(&self, member: &str) -> Option<f64> {
        self.items.get(member).copied()
    }

    pub fn zcard(&self) -> usize {
        self.items.len()
    }

    fn ranked(&self) -> Vec<ScoredMember> {
        let mut sorted: Vec<_> = self
            .items
            .iter()
            .map(|(member, score)| ScoredMember {
                score: *score,
                member: member.clone(),
            })
            .collect();
        sorted.sort_by(by_score);
        sorted
    }

    /// Range by rank
    pub fn zrange(&self, start: i64, stop: i64) -> Vec<ScoredMember> {
        let sorted = self.ranked();
        match resolve_range(start, stop, sorted.len() as i64) {
            Some((start, stop)) => sorted[start as usize..=stop as usize].to_vec(),
            None => Vec::new(),
        }
    }

    /// Range by inclusive score bounds
    pub fn zrangebyscore(&self, min: f64, max: f64) -> Vec<ScoredMember> {
        self.ranked()
            .into_iter()
            .filter(|m| m.score >= min && m.score <= max)
            .collect()
    }
}

/// Hash of field -> value
#[derive(Debug, Clone, Default)]
pub struct CacheHash {
    fields: HashMap<String, String>,
}

impl CacheHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(&mut self, field: String, value: String) -> bool {
        self.fields.insert(field, value).is_none()
    }

    pub fn hget(&self, field: &str) -> Option<&String> {
        self.fields.get(field)
    }

    pub fn hdel(&mut self, field: &str) -> bool {
        self.fields.remove(field).is_some()
    }

    pub fn hexists(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn hgetall(&self) -> HashMap<String, String> {
        self.fields.clone()
    }

    pub fn hlen(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_value_expiration() {
        let mut cached = CachedValue::with_ttl(
            CacheData::String(CacheValue::from("test")),
            Some(Duration::from_secs(1)),
        );
        assert!(!cached.is_expired());

        cached.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(cached.is_expired());

        let forever = CachedValue::with_ttl(CacheData::Set(CacheSet::new()), Some(Duration::ZERO));
        assert!(forever.expires_at.is_none());
    }

    #[test]
    fn test_list_operations() {
        let mut list = CacheList::new();
        list.rpush("1".to_string());
        list.rpush("2".to_string());
        list.lpush("0".to_string());

        assert_eq!(list.llen(), 3);
        assert_eq!(list.lrange(0, -1), vec!["0", "1", "2"]);
        assert_eq!(list.lpop().as_deref(), Some("0"));
        assert_eq!(list.rpop().as_deref(), Some("2"));
        assert_eq!(list.llen(), 1);
    }

    #[test]
    fn test_list_range_out_of_bounds() {
        let mut list = CacheList::new();
        for i in 0..5 {
            list.rpush(i.to_string());
        }
        assert_eq!(list.lrange(1, 3), vec!["1", "2", "3"]);
        assert!(list.lrange(3, 1).is_empty());
        assert!(list.lrange(7, 9).is_empty());
    }

    #[test]
    fn test_set_operations() {
        let mut set = CacheSet::new();
        assert!(set.sadd("a".to_string()));
        assert!(set.sadd("b".to_string()));
        assert!(!set.sadd("a".to_string()));

        assert_eq!(set.scard(), 2);
        assert!(set.sismember("a"));
        assert!(!set.sismember("c"));

        assert!(set.srem("a"));
        assert!(!set.srem("a"));
        assert_eq!(set.scard(), 1);
    }

    #[test]
    fn test_sorted_set_operations() {
        let mut zset = CacheSortedSet::new();
        zset.zadd("alice".to_string(), 100.0);
        zset.zadd("bob".to_string(), 85.0);
        zset.zadd("charlie".to_string(), 95.0);
        zset.zadd("carol".to_string(), 95.0);

        assert_eq!(zset.zcard(), 4);
        assert_eq!(zset.zscore("alice"), Some(100.0));

        let range = zset.zrange(0, 2);
        let names: Vec<_> = range.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol", "charlie"]);

        assert_eq!(zset.zrangebyscore(90.0, 100.0).len(), 3);
    }

    #[test]
    fn test_hash_operations() {
        let mut hash = CacheHash::new();
        assert!(hash.hset("name".to_string(), "John".to_string()));
        assert!(!hash.hset("name".to_string(), "Jane".to_string()));
        hash.hset("age".to_string(), "30".to_string());

        assert_eq!(hash.hlen(), 2);
        assert!(hash.hexists("name"));
        assert_eq!(hash.hget("name").map(String::as_str), Some("Jane"));

        assert!(hash.hdel("age"));
        assert_eq!(hash.hgetall().len(), 1);
    }
}
