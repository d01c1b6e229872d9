//! File-backed cache store on top of redb
//!
//! One database file holds the tables from [`namespace`]. Every compound
//! operation runs inside exactly one redb write transaction, so a failure
//! part-way leaves no cross-table inconsistency. The handle sits behind a
//! lock that compaction takes exclusively while it swaps files; callers that
//! arrive during the swap fail fast with an engine error instead of waiting.

pub mod codec;
pub mod compaction;
pub mod expiration;
pub mod hash;
pub mod list;
pub mod namespace;
pub mod overlay;
pub mod scalar;
pub mod set;
pub mod zset;

use crate::cache::value::{unix_now, CacheEntry};
use crate::error::{CacheError, Result};
use namespace::{bucket_header, bucket_range, ByteTable, KeyKind, ALL_TABLES, DEFAULT_TABLE};
use overlay::{Overlay, DEFAULT_OVERLAY_TTL};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use redb::{Database, ReadTransaction, ReadableTable, WriteTransaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use codec::DEFAULT_COMPRESSION_THRESHOLD;
pub use overlay::OverlayStats;

/// Tunables of a file store
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Encoded values at or above this size are gzip-compressed
    pub compression_threshold: usize,
    /// Lifetime of overlay entries
    pub overlay_ttl: Duration,
    /// Page cache handed to redb; `None` keeps redb's default
    pub engine_cache_bytes: Option<usize>,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            overlay_ttl: DEFAULT_OVERLAY_TTL,
            engine_cache_bytes: None,
        }
    }
}

/// Redis-style cache persisted in a single redb file
pub struct FileStore {
    handle: RwLock<Option<Database>>,
    /// Held exclusively by compaction so no write lands after the copy
    write_gate: RwLock<()>,
    path: PathBuf,
    options: FileStoreOptions,
    overlay: Overlay,
}

impl FileStore {
    /// Open (or create) the database at `path` and make sure every table exists
    pub fn open<P: AsRef<Path>>(path: P, options: FileStoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = open_database(&path, &options)?;
        init_tables(&db)?;

        info!(
            path = %path.display(),
            compression_threshold = options.compression_threshold,
            "file cache opened"
        );

        Ok(Self {
            handle: RwLock::new(Some(db)),
            write_gate: RwLock::new(()),
            overlay: Overlay::new(options.overlay_ttl),
            path,
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &FileStoreOptions {
        &self.options
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub(crate) fn compression_threshold(&self) -> usize {
        self.options.compression_threshold
    }

    /// Borrow the live handle without blocking
    fn db(&self) -> Result<MappedRwLockReadGuard<'_, Database>> {
        let guard = self.handle.try_read().ok_or_else(|| {
            CacheError::engine("storage unavailable: database file is being swapped")
        })?;
        RwLockReadGuard::try_map(guard, |handle| handle.as_ref())
            .map_err(|_| CacheError::engine("storage handle is closed"))
    }

    /// Run `f` in a read transaction on a consistent snapshot
    pub(crate) fn view<T>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T>) -> Result<T> {
        let db = self.db()?;
        let txn = db.begin_read()?;
        f(&txn)
    }

    /// Run `f` in one write transaction, committing only if it succeeds
    pub(crate) fn update<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let _gate = self
            .write_gate
            .try_read()
            .ok_or_else(|| CacheError::engine("storage unavailable: compaction in progress"))?;
        let db = self.db()?;
        let txn = db.begin_write()?;
        match f(&txn) {
            Ok(out) => {
                txn.commit()?;
                Ok(out)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "failed to abort write transaction");
                }
                Err(err)
            }
        }
    }

    /// Succeeds iff the default table is reachable
    pub fn ping(&self) -> Result<()> {
        self.view(|txn| {
            txn.open_table(DEFAULT_TABLE)?;
            Ok(())
        })
    }

    /// Close the handle; later calls fail with an engine error
    pub fn close(&self) -> Result<()> {
        let db = self.handle.write().take();
        self.overlay.clear();
        if db.is_some() {
            info!(path = %self.path.display(), "file cache closed");
        }
        Ok(())
    }

    /// Every live key, fully qualified, across all data types
    pub fn keys(&self) -> Result<Vec<String>> {
        let now = unix_now();
        self.view(|txn| {
            let mut keys = Vec::new();

            let table = txn.open_table(DEFAULT_TABLE)?;
            for item in table.iter()? {
                let (key, value) = item?;
                let entry: CacheEntry = codec::decode(value.value())?;
                if entry.is_expired_at(now) {
                    continue;
                }
                keys.push(String::from_utf8_lossy(key.value()).into_owned());
            }

            for kind in KeyKind::STRUCTURED {
                let table = txn.open_table(kind.table())?;
                for item in table.iter()? {
                    let (key, _) = item?;
                    if let Some(name) = namespace::parse_header(key.value()) {
                        keys.push(name);
                    }
                }
            }

            debug!(count = keys.len(), "KEYS");
            Ok(keys)
        })
    }
}

pub(crate) fn open_database(path: &Path, options: &FileStoreOptions) -> Result<Database> {
    let mut builder = Database::builder();
    if let Some(bytes) = options.engine_cache_bytes {
        builder.set_cache_size(bytes);
    }
    Ok(builder.create(path)?)
}

pub(crate) fn init_tables(db: &Database) -> Result<()> {
    let txn = db.begin_write()?;
    for table in ALL_TABLES {
        txn.open_table(table)?;
    }
    txn.commit()?;
    Ok(())
}

/// Point reads shared by read and write transactions
pub(crate) trait TxnRead {
    fn fetch(&self, table: ByteTable, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn contains(&self, table: ByteTable, key: &[u8]) -> Result<bool> {
        Ok(self.fetch(table, key)?.is_some())
    }
}

impl TxnRead for ReadTransaction {
    fn fetch(&self, table: ByteTable, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.open_table(table)?;
        let value = table.get(key)?;
        Ok(value.map(|v| v.value().to_vec()))
    }
}

impl TxnRead for WriteTransaction {
    fn fetch(&self, table: ByteTable, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.open_table(table)?;
        let value = table.get(key)?;
        Ok(value.map(|v| v.value().to_vec()))
    }
}

/// Live scalar entry stored under `key`, ignoring expired ones
pub(crate) fn live_scalar(txn: &impl TxnRead, key: &str, now: i64) -> Result<Option<CacheEntry>> {
    match txn.fetch(DEFAULT_TABLE, key.as_bytes())? {
        Some(bytes) => {
            let entry: CacheEntry = codec::decode(&bytes)?;
            Ok((!entry.is_expired_at(now)).then_some(entry))
        }
        None => Ok(None),
    }
}

/// Kind of the structure currently stored under `key`
pub(crate) fn kind_of(txn: &impl TxnRead, key: &str) -> Result<Option<KeyKind>> {
    if live_scalar(txn, key, unix_now())?.is_some() {
        return Ok(Some(KeyKind::Scalar));
    }
    structured_kind_of(txn, key)
}

pub(crate) fn structured_kind_of(txn: &impl TxnRead, key: &str) -> Result<Option<KeyKind>> {
    let header = bucket_header(key);
    for kind in KeyKind::STRUCTURED {
        if txn.contains(kind.table(), &header)? {
            return Ok(Some(kind));
        }
    }
    Ok(None)
}

fn mismatch(key: &str, expected: KeyKind, found: KeyKind) -> CacheError {
    CacheError::type_mismatch(format!(
        "key '{}' holds a {}, not a {}",
        key,
        found.name(),
        expected.name()
    ))
}

/// Read-path guard: `Ok(())` when `key` holds `expected`, otherwise the
/// matching error for a missing or differently-typed key
pub(crate) fn expect_kind(txn: &impl TxnRead, key: &str, expected: KeyKind) -> Result<()> {
    match kind_of(txn, key)? {
        Some(kind) if kind == expected => Ok(()),
        Some(kind) => Err(mismatch(key, expected, kind)),
        None => Err(CacheError::KeyNotFound),
    }
}

/// Write-path guard for structured kinds: fails if `key` holds another kind,
/// clears an expired scalar left under the same name, and creates the
/// sub-bucket header when it is missing
pub(crate) fn claim_bucket(txn: &WriteTransaction, key: &str, kind: KeyKind) -> Result<()> {
    let now = unix_now();
    if let Some(bytes) = txn.fetch(DEFAULT_TABLE, key.as_bytes())? {
        let entry: CacheEntry = codec::decode(&bytes)?;
        if !entry.is_expired_at(now) {
            return Err(mismatch(key, kind, KeyKind::Scalar));
        }
        txn.open_table(DEFAULT_TABLE)?.remove(key.as_bytes())?;
    }

    match structured_kind_of(txn, key)? {
        Some(found) if found == kind => Ok(()),
        Some(found) => Err(mismatch(key, kind, found)),
        None => {
            txn.open_table(kind.table())?
                .insert(bucket_header(key).as_slice(), [].as_slice())?;
            Ok(())
        }
    }
}

/// Remove a whole sub-bucket (header and members)
pub(crate) fn drop_bucket(txn: &WriteTransaction, key: &str, kind: KeyKind) -> Result<()> {
    let range = bucket_range(key);
    let mut table = txn.open_table(kind.table())?;
    let doomed: Vec<Vec<u8>> = table
        .range(range.start.as_slice()..range.end.as_slice())?
        .map(|item| item.map(|(k, _)| k.value().to_vec()))
        .collect::<std::result::Result<_, _>>()?;
    for key in &doomed {
        table.remove(key.as_slice())?;
    }
    Ok(())
}
