//! Sorted-set operations
//!
//! Each sorted set has two halves written in the same transaction:
//!
//! - a forward map in `zset`: `member -> {"score", "value"}`
//! - an ordering index in `zset_score`: `sortable(score) ++ member -> member`
//!
//! Range queries walk the ordering index, so results come back by ascending
//! score with ties broken by member bytes.

use super::list::resolve_range;
use super::namespace::{
    member_key, member_of, member_range, score_from_sortable, score_index_key, sortable_score,
    KeyKind, ZSET_SCORE_TABLE, ZSET_TABLE,
};
use super::{claim_bucket, expect_kind, FileStore, TxnRead};
use crate::cache::value::ScoredMember;
use crate::error::{CacheError, Result};
use redb::{ReadOnlyTable, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct ForwardEntry {
    score: f64,
    value: String,
}

fn index_slot(key: &str, score: f64, member: &str) -> Vec<u8> {
    member_key(key, &score_index_key(score, member))
}

/// Split an ordering-index slot back into its score and member
fn parse_index_slot(key: &str, slot: &[u8]) -> Result<ScoredMember> {
    let rest = member_of(key, slot);
    if rest.len() < 8 {
        return Err(CacheError::engine(format!("corrupt score index entry for '{}'", key)));
    }
    let (score, member) = rest.split_at(8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(score);
    Ok(ScoredMember {
        score: score_from_sortable(raw),
        member: String::from_utf8_lossy(member).into_owned(),
    })
}

/// Remove every ordering-index entry of `key`
pub(crate) fn drop_score_index(txn: &WriteTransaction, key: &str) -> Result<()> {
    let range = member_range(key);
    let mut table = txn.open_table(ZSET_SCORE_TABLE)?;
    let doomed: Vec<Vec<u8>> = table
        .range(range.start.as_slice()..range.end.as_slice())?
        .map(|item| item.map(|(k, _)| k.value().to_vec()))
        .collect::<std::result::Result<_, _>>()?;
    for slot in &doomed {
        table.remove(slot.as_slice())?;
    }
    Ok(())
}

type IndexTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

fn walk_index(
    table: &IndexTable,
    key: &str,
    mut visit: impl FnMut(usize, ScoredMember) -> bool,
) -> Result<()> {
    let range = member_range(key);
    for (position, item) in table
        .range(range.start.as_slice()..range.end.as_slice())?
        .enumerate()
    {
        let (slot, _) = item?;
        if !visit(position, parse_index_slot(key, slot.value())?) {
            break;
        }
    }
    Ok(())
}

impl FileStore {
    /// Add or re-score members; returns how many were new
    pub fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        if members.iter().any(|m| !m.score.is_finite()) {
            return Err(CacheError::type_mismatch("sorted-set score must be a finite number"));
        }

        let added = self.update(|txn| {
            claim_bucket(txn, key, KeyKind::SortedSet)?;
            let mut forward = txn.open_table(ZSET_TABLE)?;
            let mut index = txn.open_table(ZSET_SCORE_TABLE)?;
            let mut added = 0;

            for ScoredMember { score, member } in members {
                let slot = member_key(key, member.as_bytes());
                let previous = match forward.get(slot.as_slice())? {
                    Some(bytes) => {
                        Some(serde_json::from_slice::<ForwardEntry>(bytes.value())?.score)
                    }
                    None => None,
                };

                match previous {
                    Some(old) if sortable_score(old) == sortable_score(*score) => continue,
                    Some(old) => {
                        index.remove(index_slot(key, old, member).as_slice())?;
                    }
                    None => added += 1,
                }

                let entry = serde_json::to_vec(&ForwardEntry {
                    score: *score,
                    value: member.clone(),
                })?;
                forward.insert(slot.as_slice(), entry.as_slice())?;
                index.insert(index_slot(key, *score, member).as_slice(), member.as_bytes())?;
            }
            Ok(added)
        })?;
        debug!(key, added, "ZADD");
        Ok(added)
    }

    /// Remove members, returning how many were present
    pub fn zrem(&self, key: &str, members: &[String]) -> Result<usize> {
        self.update(|txn| {
            expect_kind(txn, key, KeyKind::SortedSet)?;
            let mut forward = txn.open_table(ZSET_TABLE)?;
            let mut index = txn.open_table(ZSET_SCORE_TABLE)?;
            let mut removed = 0;
            for member in members {
                let slot = member_key(key, member.as_bytes());
                let score = match forward.remove(slot.as_slice())? {
                    Some(bytes) => serde_json::from_slice::<ForwardEntry>(bytes.value())?.score,
                    None => continue,
                };
                index.remove(index_slot(key, score, member).as_slice())?;
                removed += 1;
            }
            Ok(removed)
        })
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<f64> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::SortedSet)?;
            match txn.fetch(ZSET_TABLE, &member_key(key, member.as_bytes()))? {
                Some(bytes) => Ok(serde_json::from_slice::<ForwardEntry>(&bytes)?.score),
                None => Err(CacheError::KeyNotFound),
            }
        })
    }

    pub fn zcard(&self, key: &str) -> Result<usize> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::SortedSet)?;
            let table = txn.open_table(ZSET_SCORE_TABLE)?;
            let mut count = 0;
            walk_index(&table, key, |_, _| {
                count += 1;
                true
            })?;
            Ok(count)
        })
    }

    /// Members ranked `[start, stop]` by ascending score
    pub fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .zrange_with_scores(key, start, stop)?
            .into_iter()
            .map(|m| m.member)
            .collect())
    }

    pub fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ScoredMember>> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::SortedSet)?;
            let table = txn.open_table(ZSET_SCORE_TABLE)?;

            let mut length = 0i64;
            walk_index(&table, key, |_, _| {
                length += 1;
                true
            })?;
            let Some((start, stop)) = resolve_range(start, stop, length) else {
                return Ok(Vec::new());
            };

            let mut out = Vec::with_capacity((stop - start + 1) as usize);
            walk_index(&table, key, |position, member| {
                let position = position as i64;
                if position >= start {
                    out.push(member);
                }
                position < stop
            })?;
            Ok(out)
        })
    }

    /// Members with `min <= score <= max`, ascending
    pub fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::SortedSet)?;
            if min.is_nan() || max.is_nan() || min > max {
                return Ok(Vec::new());
            }

            let table = txn.open_table(ZSET_SCORE_TABLE)?;
            let lower = member_key(key, &sortable_score(min));
            let upper = member_range(key).end;
            let mut out = Vec::new();
            for item in table.range(lower.as_slice()..upper.as_slice())? {
                let (slot, _) = item?;
                let scored = parse_index_slot(key, slot.value())?;
                if scored.score > max {
                    break;
                }
                out.push(scored.member);
            }
            Ok(out)
        })
    }
}
