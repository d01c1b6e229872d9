//! Cache front end: value model, backends and the prefixing facade

pub mod backend;
pub mod facade;
pub mod helpers;
pub mod memory;
pub mod value;

pub use backend::{open_backend, BackendKind, CacheBackend};
pub use facade::{glob_to_regex, Cache};
pub use memory::MemoryStore;
pub use value::{CacheEntry, CacheValue, ScoredMember, Ttl};
