//! List operations
//!
//! A list's sub-bucket holds a `length` member and one `item:<index>` member
//! per element, indices contiguous in `[0, length)`. Head operations
//! renumber every element, so `lpush`/`lpop` are O(n).

use super::namespace::{list_item_member, member_key, KeyKind, LIST_LENGTH_MEMBER, LIST_TABLE};
use super::{claim_bucket, expect_kind, FileStore, TxnRead};
use crate::error::{CacheError, Result};
use redb::{ReadableTable, Table};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct ListItem {
    index: i64,
    value: String,
}

type ListTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

fn length_slot(key: &str) -> Vec<u8> {
    member_key(key, LIST_LENGTH_MEMBER)
}

fn item_slot(key: &str, index: i64) -> Vec<u8> {
    member_key(key, &list_item_member(index))
}

fn read_length(table: &ListTable<'_>, key: &str) -> Result<i64> {
    match table.get(length_slot(key).as_slice())? {
        Some(bytes) => Ok(serde_json::from_slice(bytes.value())?),
        None => Ok(0),
    }
}

fn write_length(table: &mut ListTable<'_>, key: &str, length: i64) -> Result<()> {
    let bytes = serde_json::to_vec(&length)?;
    table.insert(length_slot(key).as_slice(), bytes.as_slice())?;
    Ok(())
}

fn read_item(table: &ListTable<'_>, key: &str, index: i64) -> Result<String> {
    match table.get(item_slot(key, index).as_slice())? {
        Some(bytes) => {
            let item: ListItem = serde_json::from_slice(bytes.value())?;
            Ok(item.value)
        }
        None => Err(CacheError::engine(format!(
            "list '{}' is missing item {}",
            key, index
        ))),
    }
}

fn write_item(table: &mut ListTable<'_>, key: &str, index: i64, value: String) -> Result<()> {
    let bytes = serde_json::to_vec(&ListItem { index, value })?;
    table.insert(item_slot(key, index).as_slice(), bytes.as_slice())?;
    Ok(())
}

/// Resolve a Redis-style inclusive range against `length`
pub(crate) fn resolve_range(start: i64, stop: i64, length: i64) -> Option<(i64, i64)> {
    let start = if start < 0 { start + length } else { start }.max(0);
    let stop = if stop < 0 { stop + length } else { stop }.min(length - 1);
    (start <= stop && start < length).then_some((start, stop))
}

impl FileStore {
    /// Push each value at the head in argument order; returns the new length
    pub fn lpush(&self, key: &str, values: &[String]) -> Result<usize> {
        let length = self.update(|txn| {
            claim_bucket(txn, key, KeyKind::List)?;
            let mut table = txn.open_table(LIST_TABLE)?;
            let length = read_length(&table, key)?;
            let shift = values.len() as i64;

            for index in (0..length).rev() {
                let value = read_item(&table, key, index)?;
                write_item(&mut table, key, index + shift, value)?;
            }
            for (offset, value) in values.iter().enumerate() {
                write_item(&mut table, key, shift - 1 - offset as i64, value.clone())?;
            }

            write_length(&mut table, key, length + shift)?;
            Ok(length + shift)
        })?;
        debug!(key, pushed = values.len(), length, "LPUSH");
        Ok(length as usize)
    }

    /// Append values at the tail; returns the new length
    pub fn rpush(&self, key: &str, values: &[String]) -> Result<usize> {
        let length = self.update(|txn| {
            claim_bucket(txn, key, KeyKind::List)?;
            let mut table = txn.open_table(LIST_TABLE)?;
            let length = read_length(&table, key)?;
            for (offset, value) in values.iter().enumerate() {
                write_item(&mut table, key, length + offset as i64, value.clone())?;
            }
            let length = length + values.len() as i64;
            write_length(&mut table, key, length)?;
            Ok(length)
        })?;
        debug!(key, pushed = values.len(), length, "RPUSH");
        Ok(length as usize)
    }

    pub fn lpop(&self, key: &str) -> Result<String> {
        self.update(|txn| {
            expect_kind(txn, key, KeyKind::List)?;
            let mut table = txn.open_table(LIST_TABLE)?;
            let length = read_length(&table, key)?;
            if length == 0 {
                return Err(CacheError::KeyNotFound);
            }

            let head = read_item(&table, key, 0)?;
            for index in 1..length {
                let value = read_item(&table, key, index)?;
                write_item(&mut table, key, index - 1, value)?;
            }
            table.remove(item_slot(key, length - 1).as_slice())?;
            write_length(&mut table, key, length - 1)?;
            Ok(head)
        })
    }

    pub fn rpop(&self, key: &str) -> Result<String> {
        self.update(|txn| {
            expect_kind(txn, key, KeyKind::List)?;
            let mut table = txn.open_table(LIST_TABLE)?;
            let length = read_length(&table, key)?;
            if length == 0 {
                return Err(CacheError::KeyNotFound);
            }

            let tail = read_item(&table, key, length - 1)?;
            table.remove(item_slot(key, length - 1).as_slice())?;
            write_length(&mut table, key, length - 1)?;
            Ok(tail)
        })
    }

    pub fn llen(&self, key: &str) -> Result<usize> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::List)?;
            let length = match txn.fetch(LIST_TABLE, &length_slot(key))? {
                Some(bytes) => serde_json::from_slice::<i64>(&bytes)?,
                None => 0,
            };
            Ok(length.max(0) as usize)
        })
    }

    /// Elements in the inclusive range `[start, stop]`; negative indices
    /// count from the tail
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.view(|txn| {
            expect_kind(txn, key, KeyKind::List)?;
            let table = txn.open_table(LIST_TABLE)?;
            let length = match table.get(length_slot(key).as_slice())? {
                Some(bytes) => serde_json::from_slice::<i64>(bytes.value())?,
                None => 0,
            };
            let Some((start, stop)) = resolve_range(start, stop, length) else {
                return Ok(Vec::new());
            };

            let mut out = Vec::with_capacity((stop - start + 1) as usize);
            for index in start..=stop {
                match table.get(item_slot(key, index).as_slice())? {
                    Some(bytes) => {
                        let item: ListItem = serde_json::from_slice(bytes.value())?;
                        out.push(item.value);
                    }
                    None => {
                        return Err(CacheError::engine(format!(
                            "list '{}' is missing item {}",
                            key, index
                        )))
                    }
                }
            }
            Ok(out)
        })
    }
}
