//! Table layout and key encodings
//!
//! Every data type gets its own top-level table. Structured types emulate a
//! nested bucket per logical key with a composite key:
//!
//! ```text
//! header : u32be(len(key)) ++ key ++ 0x00
//! member : u32be(len(key)) ++ key ++ 0x01 ++ member
//! ```
//!
//! The length prefix keeps one key's range from bleeding into another key
//! that shares a textual prefix, and the header sorts before every member.

use redb::TableDefinition;
use std::ops::Range;

pub type ByteTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

pub const DEFAULT_BUCKET: &str = "default";
pub const HASH_BUCKET: &str = "hash";
pub const LIST_BUCKET: &str = "list";
pub const SET_BUCKET: &str = "set";
pub const ZSET_BUCKET: &str = "zset";
pub const ZSET_SCORE_BUCKET: &str = "zset_score";
pub const EXPIRATION_BUCKET: &str = "expiration";

pub const DEFAULT_TABLE: ByteTable = TableDefinition::new(DEFAULT_BUCKET);
pub const HASH_TABLE: ByteTable = TableDefinition::new(HASH_BUCKET);
pub const LIST_TABLE: ByteTable = TableDefinition::new(LIST_BUCKET);
pub const SET_TABLE: ByteTable = TableDefinition::new(SET_BUCKET);
pub const ZSET_TABLE: ByteTable = TableDefinition::new(ZSET_BUCKET);
pub const ZSET_SCORE_TABLE: ByteTable = TableDefinition::new(ZSET_SCORE_BUCKET);
pub const EXPIRATION_TABLE: ByteTable = TableDefinition::new(EXPIRATION_BUCKET);

/// Every table, in creation order
pub const ALL_TABLES: [ByteTable; 7] = [
    DEFAULT_TABLE,
    HASH_TABLE,
    LIST_TABLE,
    SET_TABLE,
    ZSET_TABLE,
    ZSET_SCORE_TABLE,
    EXPIRATION_TABLE,
];

const HEADER_TAG: u8 = 0x00;
const MEMBER_TAG: u8 = 0x01;

/// Kind of structure a key currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Scalar,
    Hash,
    List,
    Set,
    SortedSet,
}

impl KeyKind {
    pub const STRUCTURED: [KeyKind; 4] = [
        KeyKind::Hash,
        KeyKind::List,
        KeyKind::Set,
        KeyKind::SortedSet,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyKind::Scalar => "string",
            KeyKind::Hash => "hash",
            KeyKind::List => "list",
            KeyKind::Set => "set",
            KeyKind::SortedSet => "zset",
        }
    }

    /// Table holding the sub-buckets of this kind
    pub fn table(&self) -> ByteTable {
        match self {
            KeyKind::Scalar => DEFAULT_TABLE,
            KeyKind::Hash => HASH_TABLE,
            KeyKind::List => LIST_TABLE,
            KeyKind::Set => SET_TABLE,
            KeyKind::SortedSet => ZSET_TABLE,
        }
    }
}

fn key_prefix(key: &str, tag: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + key.len() + 1);
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key.as_bytes());
    out.push(tag);
    out
}

/// Header entry marking that the sub-bucket for `key` exists
pub fn bucket_header(key: &str) -> Vec<u8> {
    key_prefix(key, HEADER_TAG)
}

/// Entry for `member` inside the sub-bucket for `key`
pub fn member_key(key: &str, member: &[u8]) -> Vec<u8> {
    let mut out = key_prefix(key, MEMBER_TAG);
    out.extend_from_slice(member);
    out
}

/// Half-open range covering every member entry of `key`
pub fn member_range(key: &str) -> Range<Vec<u8>> {
    key_prefix(key, MEMBER_TAG)..key_prefix(key, MEMBER_TAG + 1)
}

/// Half-open range covering the header and every member of `key`
pub fn bucket_range(key: &str) -> Range<Vec<u8>> {
    key_prefix(key, HEADER_TAG)..key_prefix(key, MEMBER_TAG + 1)
}

/// Strip the sub-bucket prefix of `key` from a composite key
pub fn member_of<'a>(key: &str, composite: &'a [u8]) -> &'a [u8] {
    &composite[4 + key.len() + 1..]
}

/// Decode a header entry back into its logical key
pub fn parse_header(composite: &[u8]) -> Option<String> {
    let len_bytes: [u8; 4] = composite.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if composite.len() != 4 + len + 1 || composite[4 + len] != HEADER_TAG {
        return None;
    }
    String::from_utf8(composite[4..4 + len].to_vec()).ok()
}

/// Byte encoding of a float whose unsigned lexicographic order is numeric order
pub fn sortable_score(score: f64) -> [u8; 8] {
    let bits = score.to_bits();
    let bits = if score >= 0.0 { bits | (1 << 63) } else { !bits };
    bits.to_be_bytes()
}

pub fn score_from_sortable(bytes: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(bytes);
    let bits = if bits & (1 << 63) != 0 { bits & !(1 << 63) } else { !bits };
    f64::from_bits(bits)
}

/// Score-index entry: the sortable score followed by the member
pub fn score_index_key(score: f64, member: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + member.len());
    out.extend_from_slice(&sortable_score(score));
    out.extend_from_slice(member.as_bytes());
    out
}

/// Encoded expiration deadline; byte order matches numeric order
pub fn encode_deadline(deadline: i64) -> [u8; 8] {
    ((deadline as u64) ^ (1 << 63)).to_be_bytes()
}

pub fn decode_deadline(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

/// Sub-bucket member holding a list's length
pub const LIST_LENGTH_MEMBER: &[u8] = b"length";

/// Sub-bucket member holding the list item at `index`
pub fn list_item_member(index: i64) -> Vec<u8> {
    format!("item:{}", index).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_sorts_before_members() {
        let header = bucket_header("user");
        let member = member_key("user", b"");
        assert!(header < member);
        let range = member_range("user");
        assert!(range.contains(&member));
        assert!(!range.contains(&header));
        assert!(bucket_range("user").contains(&header));
    }

    #[test]
    fn test_keys_with_shared_prefix_do_not_overlap() {
        let short = member_range("ab");
        let long_member = member_key("abc", b"field");
        assert!(!short.contains(&long_member));
        let short_member = member_key("ab", b"cfield");
        assert!(!member_range("abc").contains(&short_member));
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header(&bucket_header("queue")), Some("queue".to_string()));
        assert_eq!(parse_header(&member_key("queue", b"x")), None);
        assert_eq!(parse_header(b"ab"), None);
    }

    #[test]
    fn test_member_of() {
        let composite = member_key("h", b"field");
        assert_eq!(member_of("h", &composite), b"field");
    }

    #[test]
    fn test_negative_zero_shares_encoding_with_zero() {
        assert_eq!(sortable_score(0.0), sortable_score(-0.0));
    }

    #[test]
    fn test_deadline_order() {
        assert!(encode_deadline(-5) < encode_deadline(0));
        assert!(encode_deadline(0) < encode_deadline(1_700_000_000));
        assert_eq!(decode_deadline(&encode_deadline(-42)), Some(-42));
    }

    proptest! {
        #[test]
        fn prop_sortable_score_preserves_order(a in -1e12f64..1e12, b in -1e12f64..1e12) {
            let (ea, eb) = (sortable_score(a), sortable_score(b));
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), ea.cmp(&eb));
            prop_assert_eq!(score_from_sortable(ea), a);
        }

        #[test]
        fn prop_deadline_order(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(a.cmp(&b), encode_deadline(a).cmp(&encode_deadline(b)));
        }
    }
}
