//! Copy-and-swap compaction
//!
//! redb reuses freed pages but never shrinks the file. Compaction copies
//! every table into a fresh file next to the original, then swaps the files
//! while the handle is locked exclusively.

use super::namespace::ALL_TABLES;
use super::{open_database, FileStore};
use crate::error::{CacheError, CompactionError, Result};
use redb::ReadableTable;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Summary of a finished compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub entries: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub duration: Duration,
}

/// `<path>.compact`
pub fn compaction_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".compact");
    PathBuf::from(name)
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Remove a leftover compaction file, if any
fn discard(temp: &Path) {
    if temp.exists() {
        if let Err(e) = fs::remove_file(temp) {
            warn!(path = %temp.display(), error = %e, "failed to remove compaction file");
        }
    }
}

impl FileStore {
    /// Rewrite the database file without its free pages
    pub fn compact(&self) -> std::result::Result<CompactionStats, CompactionError> {
        self.compact_with(|from, to| fs::rename(from, to))
    }

    /// Compaction with the file swap supplied by the caller
    fn compact_with(
        &self,
        swap: impl FnOnce(&Path, &Path) -> io::Result<()>,
    ) -> std::result::Result<CompactionStats, CompactionError> {
        let started = Instant::now();
        // Writers fail fast from here until the swap is done
        let _gate = self.write_gate.write();
        let temp = compaction_path(&self.path);
        let bytes_before = file_size(&self.path);

        let entries = match self.copy_into(&temp) {
            Ok(entries) => entries,
            Err(err) => {
                discard(&temp);
                return Err(CompactionError::Copy(err));
            }
        };

        let mut handle = self.handle.write();
        if handle.take().is_none() {
            discard(&temp);
            return Err(CompactionError::Copy(CacheError::engine("storage handle is closed")));
        }

        if let Err(rename_err) = swap(&temp, &self.path) {
            discard(&temp);
            return match open_database(&self.path, &self.options) {
                Ok(db) => {
                    *handle = Some(db);
                    Err(CompactionError::Rename(rename_err))
                }
                Err(reopen_err) => {
                    error!(
                        path = %self.path.display(),
                        error = %reopen_err,
                        "cache database could not be reopened"
                    );
                    Err(CompactionError::Reopen(reopen_err))
                }
            };
        }

        match open_database(&self.path, &self.options) {
            Ok(db) => *handle = Some(db),
            Err(reopen_err) => {
                error!(
                    path = %self.path.display(),
                    error = %reopen_err,
                    "compacted cache database could not be reopened"
                );
                return Err(CompactionError::Reopen(reopen_err));
            }
        }
        drop(handle);

        let stats = CompactionStats {
            entries,
            bytes_before,
            bytes_after: file_size(&self.path),
            duration: started.elapsed(),
        };
        info!(
            entries = stats.entries,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            duration_ms = stats.duration.as_millis() as u64,
            "cache database compacted"
        );
        Ok(stats)
    }

    /// Copy every table of the current snapshot into a fresh database at `target`
    fn copy_into(&self, target: &Path) -> Result<u64> {
        if target.exists() {
            fs::remove_file(target)?;
        }
        let fresh = open_database(target, &self.options)?;

        self.view(|source| {
            let txn = fresh.begin_write()?;
            let mut copied = 0;
            for definition in ALL_TABLES {
                let from = source.open_table(definition)?;
                let mut to = txn.open_table(definition)?;
                for item in from.iter()? {
                    let (key, value) = item?;
                    to.insert(key.value(), value.value())?;
                    copied += 1;
                }
            }
            txn.commit()?;
            Ok(copied)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::value::{CacheValue, ScoredMember};
    use crate::storage::test_support::open_store;

    #[test]
    fn test_compaction_path() {
        assert_eq!(
            compaction_path(Path::new("cache/cache.db")),
            PathBuf::from("cache/cache.db.compact")
        );
    }

    #[test]
    fn test_compaction_preserves_data() {
        let (store, _dir) = open_store();
        for i in 0..200 {
            store
                .set(&format!("k{}", i), CacheValue::from("x".repeat(512)), None)
                .unwrap();
        }
        store.rpush("q", &["a".to_string(), "b".to_string()]).unwrap();
        store.zadd("z", &[ScoredMember::new(1.0, "m")]).unwrap();
        let doomed: Vec<String> = (0..190).map(|i| format!("k{}", i)).collect();
        store.del(&doomed).unwrap();

        let stats = store.compact().unwrap();
        assert!(stats.entries > 0);
        assert!(stats.bytes_after > 0);
        assert!(!compaction_path(store.path()).exists());

        store.overlay().clear();
        assert_eq!(store.get("k195").unwrap(), "x".repeat(512));
        assert!(store.get("k5").unwrap_err().is_not_found());
        assert_eq!(store.lrange("q", 0, -1).unwrap(), vec!["a", "b"]);
        assert_eq!(store.zscore("z", "m").unwrap(), 1.0);

        // Still writable after the swap
        store.set("after", CacheValue::from("1"), None).unwrap();
        assert_eq!(store.get("after").unwrap(), "1");
    }

    #[test]
    fn test_copy_failure_keeps_original() {
        let (store, _dir) = open_store();
        store.set("k", CacheValue::from("v"), None).unwrap();
        // A directory where the fresh file should go makes the copy fail
        fs::create_dir(compaction_path(store.path())).unwrap();

        let err = store.compact().unwrap_err();
        assert!(matches!(err, CompactionError::Copy(_)));
        assert!(!err.is_fatal());
        store.overlay().clear();
        assert_eq!(store.get("k").unwrap(), "v");
    }

    fn refuse_swap(_: &Path, _: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "directory is read-only"))
    }

    #[test]
    fn test_rename_failure_reopens_original() {
        let (store, _dir) = open_store();
        store.set("k", CacheValue::from("v"), None).unwrap();
        store.sadd("s", &["m".to_string()]).unwrap();

        let err = store.compact_with(refuse_swap).unwrap_err();
        assert!(matches!(err, CompactionError::Rename(_)));
        assert!(!err.is_fatal());
        assert!(!compaction_path(store.path()).exists());

        store.ping().unwrap();
        store.overlay().clear();
        assert_eq!(store.get("k").unwrap(), "v");
        assert!(store.sismember("s", "m").unwrap());
        store.set("after", CacheValue::from("1"), None).unwrap();

        // The next regular run still works
        store.compact().unwrap();
        assert_eq!(store.get("after").unwrap(), "1");
    }

    #[test]
    fn test_reopen_failure_after_failed_rename_is_fatal() {
        let (store, _dir) = open_store();
        store.set("k", CacheValue::from("v"), None).unwrap();

        let err = store
            .compact_with(|_, original| {
                fs::remove_file(original)?;
                fs::create_dir(original)?;
                refuse_swap(original, original)
            })
            .unwrap_err();
        assert!(matches!(err, CompactionError::Reopen(_)));
        assert!(err.is_fatal());

        store.overlay().clear();
        assert!(matches!(store.get("k"), Err(CacheError::Engine(_))));
        assert!(store.ping().is_err());
    }

    #[test]
    fn test_reopen_failure_after_swap_is_fatal() {
        let (store, _dir) = open_store();
        store.set("k", CacheValue::from("v"), None).unwrap();

        let err = store
            .compact_with(|compacted, original| {
                fs::remove_file(compacted)?;
                fs::remove_file(original)?;
                fs::create_dir(original)
            })
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            store.set("k", CacheValue::from("w"), None),
            Err(CacheError::Engine(_))
        ));
    }

    #[test]
    fn test_compacting_closed_store_fails() {
        let (store, _dir) = open_store();
        store.close().unwrap();
        assert!(matches!(store.compact(), Err(CompactionError::Copy(_))));
    }
}
