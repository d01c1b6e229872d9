//! Deadline heap for the in-memory backend
//!
//! Entries are never removed when a key is rewritten or deleted. The sweep
//! pops due deadlines and re-checks the live value before dropping it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Entry in the expiration heap
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExpirationEntry {
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

impl Ord for ExpirationEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap
        other
            .expires_at
            .cmp(&self.expires_at)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for ExpirationEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of deadlines, earliest first
#[derive(Default)]
pub struct TtlManager {
    heap: Mutex<BinaryHeap<ExpirationEntry>>,
}

impl TtlManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: String, expires_at: DateTime<Utc>) {
        self.heap.lock().push(ExpirationEntry { key, expires_at });
    }

    /// Pop up to `limit` entries whose deadline is `<= now`
    pub fn pop_expired(&self, now: DateTime<Utc>, limit: usize) -> Vec<ExpirationEntry> {
        let mut heap = self.heap.lock();
        let mut expired = Vec::new();
        while expired.len() < limit {
            match heap.peek() {
                Some(entry) if entry.expires_at <= now => {}
                _ => break,
            }
            if let Some(entry) = heap.pop() {
                expired.push(entry);
            }
        }
        expired
    }

    pub fn next_expiration(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().peek().map(|entry| entry.expires_at)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn clear(&self) {
        self.heap.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_expired_only_due() {
        let manager = TtlManager::new();
        let now = Utc::now();
        manager.add("expired".to_string(), now - chrono::Duration::seconds(1));
        manager.add("valid".to_string(), now + chrono::Duration::seconds(10));

        let expired = manager.pop_expired(now, 10);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key, "expired");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_pop_expired_respects_limit() {
        let manager = TtlManager::new();
        let past = Utc::now() - chrono::Duration::seconds(5);
        for i in 0..5 {
            manager.add(format!("k{}", i), past);
        }
        assert_eq!(manager.pop_expired(Utc::now(), 3).len(), 3);
        assert_eq!(manager.pop_expired(Utc::now(), 3).len(), 2);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_next_expiration_is_earliest() {
        let manager = TtlManager::new();
        assert!(manager.next_expiration().is_none());

        let early = Utc::now() + chrono::Duration::seconds(5);
        let late = Utc::now() + chrono::Duration::seconds(10);
        manager.add("late".to_string(), late);
        manager.add("early".to_string(), early);
        assert_eq!(manager.next_expiration(), Some(early));

        manager.clear();
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_expiration_entry_ordering() {
        let now = Utc::now();
        let first = ExpirationEntry {
            key: "a".to_string(),
            expires_at: now + chrono::Duration::seconds(5),
        };
        let second = ExpirationEntry {
            key: "b".to_string(),
            expires_at: now + chrono::Duration::seconds(10),
        };
        // Earlier deadline ranks higher in the max-heap
        assert!(first > second);
    }
}
