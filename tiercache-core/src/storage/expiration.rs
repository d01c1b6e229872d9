//! Expiration index: deadline -> keys sharing that deadline
//!
//! The sweep is the only thing that physically reclaims expired scalar
//! entries; read paths merely report them as missing.

use super::namespace::{decode_deadline, encode_deadline, DEFAULT_TABLE, EXPIRATION_TABLE};
use super::{codec, FileStore};
use crate::cache::value::{unix_now, CacheEntry};
use crate::error::Result;
use redb::{ReadableTable, WriteTransaction};
use tracing::{debug, info};

/// Keys reclaimed per sweep pass unless configured otherwise
pub const DEFAULT_SWEEP_LIMIT: usize = 1000;

/// Register `key` under `deadline`; a zero deadline means no expiry
pub(crate) fn add_expiration(txn: &WriteTransaction, key: &str, deadline: i64) -> Result<()> {
    if deadline == 0 {
        return Ok(());
    }

    let encoded = encode_deadline(deadline);
    let mut table = txn.open_table(EXPIRATION_TABLE)?;
    let mut keys: Vec<String> = match table.get(encoded.as_slice())? {
        Some(existing) => serde_json::from_slice(existing.value())?,
        None => Vec::new(),
    };
    if keys.iter().any(|k| k == key) {
        return Ok(());
    }
    keys.push(key.to_string());
    let bytes = serde_json::to_vec(&keys)?;
    table.insert(encoded.as_slice(), bytes.as_slice())?;
    Ok(())
}

/// Outcome of one sweep pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Index entries visited, live or stale
    pub processed: usize,
    /// Scalar entries actually deleted
    pub removed: usize,
}

impl FileStore {
    /// Reclaim expired scalar keys as of now
    pub fn sweep_expired(&self, limit: usize) -> Result<SweepStats> {
        self.sweep_expired_at(unix_now(), limit)
    }

    /// Reclaim scalar keys whose deadline is `<= now`, visiting at most
    /// `limit` keys in one write transaction
    pub fn sweep_expired_at(&self, now: i64, limit: usize) -> Result<SweepStats> {
        let mut reclaimed = Vec::new();
        let stats = self.update(|txn| {
            let mut stats = SweepStats::default();
            let mut index = txn.open_table(EXPIRATION_TABLE)?;
            let mut data = txn.open_table(DEFAULT_TABLE)?;

            // Collect due records first; the cursor borrows the table
            let mut due: Vec<([u8; 8], Vec<String>)> = Vec::new();
            let mut budget = 0usize;
            let upper = encode_deadline(now);
            for item in index.range(..=upper.as_slice())? {
                if budget >= limit {
                    break;
                }
                let (deadline, keys) = item?;
                let encoded: [u8; 8] = match deadline.value().try_into() {
                    Ok(encoded) => encoded,
                    Err(_) => continue,
                };
                let keys: Vec<String> = serde_json::from_slice(keys.value())?;
                budget += keys.len();
                due.push((encoded, keys));
            }

            for (deadline, mut keys) in due {
                let remaining = limit - stats.processed;
                let rest = if keys.len() > remaining {
                    keys.split_off(remaining)
                } else {
                    Vec::new()
                };

                for key in keys {
                    stats.processed += 1;
                    let expired = match data.get(key.as_bytes())? {
                        Some(bytes) => {
                            let entry: CacheEntry = codec::decode(bytes.value())?;
                            entry.is_expired_at(now)
                        }
                        None => false,
                    };
                    if expired {
                        data.remove(key.as_bytes())?;
                        stats.removed += 1;
                        reclaimed.push(key);
                    }
                }

                if rest.is_empty() {
                    index.remove(deadline.as_slice())?;
                } else {
                    let bytes = serde_json::to_vec(&rest)?;
                    index.insert(deadline.as_slice(), bytes.as_slice())?;
                    debug!(
                        deadline = decode_deadline(&deadline).unwrap_or_default(),
                        left = rest.len(),
                        "sweep budget exhausted inside a record"
                    );
                    break;
                }
            }

            Ok(stats)
        })?;

        for key in &reclaimed {
            self.overlay().invalidate(key);
        }

        if stats.processed > 0 {
            info!(
                processed = stats.processed,
                removed = stats.removed,
                "expiration sweep finished"
            );
        }
        Ok(stats)
    }
}
