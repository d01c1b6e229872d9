//! Process-local read overlay above the file store
//!
//! Entries live for a fixed overlay lifetime that is independent of the
//! persisted TTL. A read also rejects an entry whose persisted expiration has
//! passed. There is no background eviction: stale entries are dropped only
//! when a read finds them, so write-heavy workloads grow the map.
//!
//! Readers fill the overlay from a snapshot taken outside any lock. Every
//! write bumps a generation counter for the key's stripe, and a read-through
//! fill only lands if the generation it saw before reading is unchanged.

use crate::cache::value::{unix_now, CacheEntry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default overlay lifetime
pub const DEFAULT_OVERLAY_TTL: Duration = Duration::from_secs(5 * 60);

const GENERATION_STRIPES: usize = 256;

/// Token returned by [`Overlay::generation`] for a later [`Overlay::fill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug, Clone)]
struct OverlaySlot {
    entry: CacheEntry,
    cached_at: Instant,
}

impl OverlaySlot {
    fn is_stale(&self, lifetime: Duration, now_unix: i64) -> bool {
        self.cached_at.elapsed() >= lifetime || self.entry.is_expired_at(now_unix)
    }
}

/// Concurrent overlay keyed by fully-qualified key
#[derive(Debug)]
pub struct Overlay {
    entries: DashMap<String, OverlaySlot>,
    generations: Box<[AtomicU64]>,
    lifetime: Duration,
    stats: OverlayStats,
}

impl Overlay {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: (0..GENERATION_STRIPES).map(|_| AtomicU64::new(0)).collect(),
            lifetime,
            stats: OverlayStats::default(),
        }
    }

    fn stripe(&self, key: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.generations[hasher.finish() as usize % GENERATION_STRIPES]
    }

    fn bump(&self, key: &str) {
        self.stripe(key).fetch_add(1, Ordering::SeqCst);
    }

    /// Write generation of `key`; take it before reading the store
    pub fn generation(&self, key: &str) -> Generation {
        Generation(self.stripe(key).load(Ordering::SeqCst))
    }

    /// Look up a live entry, evicting it if it went stale
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = unix_now();
        let hit = self.entries.get(key).map(|slot| {
            if slot.is_stale(self.lifetime, now) {
                None
            } else {
                Some(slot.entry.clone())
            }
        });

        match hit {
            Some(Some(entry)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(None) => {
                // Only remove if nobody replaced the slot in between
                self.entries
                    .remove_if(key, |_, slot| slot.is_stale(self.lifetime, now));
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Record the value a write just committed
    pub fn store(&self, key: String, entry: CacheEntry) {
        self.bump(&key);
        self.entries.insert(
            key,
            OverlaySlot {
                entry,
                cached_at: Instant::now(),
            },
        );
    }

    /// Cache a value read from the store, unless a write to the key happened
    /// since `seen` was taken. Returns whether the entry was cached.
    pub fn fill(&self, key: String, entry: CacheEntry, seen: Generation) -> bool {
        let stripe = self.stripe(&key);
        // The shard lock orders this check against a writer's bump-then-remove
        let slot = self.entries.entry(key);
        if stripe.load(Ordering::SeqCst) != seen.0 {
            return false;
        }
        let fresh = OverlaySlot {
            entry,
            cached_at: Instant::now(),
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                occupied.insert(fresh);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }
        true
    }

    pub fn invalidate(&self, key: &str) {
        self.bump(key);
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        for stripe in self.generations.iter() {
            stripe.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn stats(&self) -> &OverlayStats {
        &self.stats
    }
}

/// Overlay hit/miss counters
#[derive(Debug, Default)]
pub struct OverlayStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl OverlayStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries dropped on read because they went stale
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
