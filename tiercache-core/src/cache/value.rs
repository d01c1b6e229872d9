//! Value model shared by every backend

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A value handed to the cache, tagged at the call site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CacheValue {
    /// Plain text
    Str(String),
    /// Signed integer (counters)
    Int(i64),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Any structured JSON document
    Json(serde_json::Value),
}

impl CacheValue {
    /// Text representation returned to callers
    ///
    /// Bytes that are not UTF-8 are rendered lossily; read them back with
    /// `get_value` to get the original bytes.
    pub fn to_text(&self) -> String {
        match self {
            CacheValue::Str(s) => s.clone(),
            CacheValue::Int(n) => n.to_string(),
            CacheValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            CacheValue::Json(v) => v.to_string(),
        }
    }

    /// Interpret the value as an integer counter, if it is one
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CacheValue::Int(n) => Some(*n),
            CacheValue::Str(s) => s.parse().ok(),
            CacheValue::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            CacheValue::Json(serde_json::Value::Number(n)) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            }),
            CacheValue::Json(_) => None,
        }
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Str(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Str(value.to_string())
    }
}

impl From<&String> for CacheValue {
    fn from(value: &String) -> Self {
        CacheValue::Str(value.clone())
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Int(value)
    }
}

impl From<i32> for CacheValue {
    fn from(value: i32) -> Self {
        CacheValue::Int(value as i64)
    }
}

impl From<u32> for CacheValue {
    fn from(value: u32) -> Self {
        CacheValue::Int(value as i64)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        CacheValue::Bytes(value)
    }
}

impl From<&[u8]> for CacheValue {
    fn from(value: &[u8]) -> Self {
        CacheValue::Bytes(value.to_vec())
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        CacheValue::Json(value)
    }
}

/// Persisted scalar entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: CacheValue,
    /// Unix seconds; 0 means the entry never expires
    pub expiration: i64,
}

impl CacheEntry {
    pub fn new(value: CacheValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expiration: deadline_after(ttl),
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiration > 0 && self.expiration <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    /// Remaining lifetime as seen at `now`
    pub fn ttl_at(&self, now: i64) -> Ttl {
        if self.expiration == 0 {
            Ttl::Never
        } else {
            Ttl::Expires(Duration::from_secs((self.expiration - now).max(0) as u64))
        }
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Never,
    Expires(Duration),
}

impl Ttl {
    /// Redis-style seconds, `-1` for keys without expiry
    pub fn as_secs_i64(&self) -> i64 {
        match self {
            Ttl::Never => -1,
            Ttl::Expires(d) => d.as_secs() as i64,
        }
    }
}

/// Sorted-set member with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub score: f64,
    pub member: String,
}

impl ScoredMember {
    pub fn new(score: f64, member: impl Into<CacheValue>) -> Self {
        Self {
            score,
            member: member.into().to_text(),
        }
    }
}

/// Current wall clock in unix seconds
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Deadline in unix seconds for `ttl`, or 0 when there is none
pub fn deadline_after(ttl: Option<Duration>) -> i64 {
    match ttl {
        Some(ttl) if !ttl.is_zero() => {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            Utc::now()
                .timestamp_millis()
                .saturating_add(ttl_ms)
                .div_euclid(1000)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_representation() {
        assert_eq!(CacheValue::from("plain").to_text(), "plain");
        assert_eq!(CacheValue::from(42i64).to_text(), "42");
        assert_eq!(CacheValue::from(b"raw".as_slice()).to_text(), "raw");
        let json = CacheValue::from(serde_json::json!({"a": 1}));
        assert_eq!(json.to_text(), r#"{"a":1}"#);
    }

    #[test]
    fn test_integer_interpretation() {
        assert_eq!(CacheValue::from("17").as_integer(), Some(17));
        assert_eq!(CacheValue::from(serde_json::json!(3.0)).as_integer(), Some(3));
        assert_eq!(CacheValue::from(serde_json::json!(3.5)).as_integer(), None);
        assert_eq!(CacheValue::from("abc").as_integer(), None);
        assert_eq!(CacheValue::from(serde_json::json!([1])).as_integer(), None);
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry {
            value: CacheValue::from("x"),
            expiration: 100,
        };
        assert!(!entry.is_expired_at(99));
        assert!(entry.is_expired_at(100));
        assert_eq!(entry.ttl_at(90), Ttl::Expires(Duration::from_secs(10)));

        let forever = CacheEntry::new(CacheValue::from("x"), None);
        assert_eq!(forever.expiration, 0);
        assert!(!forever.is_expired());
        assert_eq!(forever.ttl_at(unix_now()).as_secs_i64(), -1);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        assert_eq!(deadline_after(Some(Duration::ZERO)), 0);
        assert!(deadline_after(Some(Duration::from_secs(5))) >= unix_now() + 4);
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = CacheEntry {
            value: CacheValue::Int(5),
            expiration: 0,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"value":{"type":"int","data":5},"expiration":0}"#);
    }
}
