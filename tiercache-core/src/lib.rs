//! TierCache Core - embedded Redis-style cache
//!
//! This crate provides:
//! - A persistent backend on a single redb file with a read overlay
//! - An in-memory backend with the same operations
//! - Strings, counters, hashes, lists, sets and sorted sets with TTLs
//! - A prefixing facade with cancellable variants of every call
//! - Background expiry sweeps and database compaction

pub mod cache;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod monitoring;
pub mod storage;

pub use cache::{
    glob_to_regex, open_backend, BackendKind, Cache, CacheBackend, CacheEntry, CacheValue,
    MemoryStore, ScoredMember, Ttl,
};
pub use config::{CacheSettings, ConfigManager, TierCacheConfig};
pub use error::{CacheError, CompactionError, Result};
pub use maintenance::{MaintenanceHandle, MaintenanceSchedule};
pub use monitoring::{init_logging, LoggingConfig};
pub use storage::compaction::CompactionStats;
pub use storage::expiration::SweepStats;
pub use storage::{FileStore, FileStoreOptions};

pub use tokio_util::sync::CancellationToken;
