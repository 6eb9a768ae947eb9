//! Keys, key paths and key ranges.
//!
//! Keys are stored in LMDB as an order-preserving byte encoding, so the engine's
//! lexicographic byte order is the same as the logical key order:
//! numbers sort before strings, strings before arrays, and arrays compare
//! element by element with a shorter prefix first.

use std::fmt::{Display, Formatter};
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError};

const TAG_NUMBER: u8 = 0x10;
const TAG_TEXT: u8 = 0x30;
const TAG_ARRAY: u8 = 0x50;
const TERMINATOR: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;

/// A valid primary or index key.
///
/// Booleans, null and objects are not keys: a record whose index key path
/// resolves to one of those is simply left out of that index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub enum KeyValue {
    Number(f64),
    Text(String),
    Array(Vec<KeyValue>),
}

impl KeyValue {
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_f64().map(KeyValue::Number),
            JsonValue::String(s) => Some(KeyValue::Text(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(KeyValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(KeyValue::Array),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            KeyValue::Number(n) => number_to_json(*n),
            KeyValue::Text(s) => JsonValue::String(s.clone()),
            KeyValue::Array(items) => JsonValue::Array(items.iter().map(KeyValue::to_json).collect()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            KeyValue::Number(n) => {
                out.push(TAG_NUMBER);
                // -0.0 and 0.0 are the same key
                let n = if *n == 0.0 { 0.0 } else { *n };
                let bits = n.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            KeyValue::Text(s) => {
                out.push(TAG_TEXT);
                for byte in s.as_bytes() {
                    if *byte == 0 {
                        out.extend_from_slice(&[0, ESCAPED_NUL]);
                    } else {
                        out.push(*byte);
                    }
                }
                out.extend_from_slice(&[TERMINATOR, TERMINATOR]);
            }
            KeyValue::Array(items) => {
                out.push(TAG_ARRAY);
                for item in items {
                    item.encode_into(out);
                }
                out.push(TERMINATOR);
            }
        }
    }
}

fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl TryFrom<JsonValue> for KeyValue {
    type Error = String;

    fn try_from(value: JsonValue) -> std::result::Result<Self, Self::Error> {
        KeyValue::from_json(&value).ok_or_else(|| format!("{value} is not a valid key"))
    }
}

impl From<KeyValue> for JsonValue {
    fn from(key: KeyValue) -> Self {
        key.to_json()
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Text(s.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        KeyValue::Text(s)
    }
}

impl From<i64> for KeyValue {
    fn from(n: i64) -> Self {
        KeyValue::Number(n as f64)
    }
}

impl From<f64> for KeyValue {
    fn from(n: f64) -> Self {
        KeyValue::Number(n)
    }
}

impl From<Vec<KeyValue>> for KeyValue {
    fn from(items: Vec<KeyValue>) -> Self {
        KeyValue::Array(items)
    }
}

/// Where a key lives inside a record: one (possibly dotted) field, or a
/// compound of several fields producing an array key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    pub fn extract(&self, record: &JsonValue) -> Option<KeyValue> {
        match self {
            KeyPath::Single(path) => lookup(record, path).and_then(KeyValue::from_json),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|p| lookup(record, p).and_then(KeyValue::from_json))
                .collect::<Option<Vec<_>>>()
                .map(KeyValue::Array),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            KeyPath::Single(path) => path.is_empty(),
            KeyPath::Compound(paths) => paths.is_empty() || paths.iter().any(String::is_empty),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<&[&str]> for KeyPath {
    fn from(paths: &[&str]) -> Self {
        KeyPath::Compound(paths.iter().map(|p| p.to_string()).collect())
    }
}

pub(crate) fn lookup<'a>(record: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(record, |value, segment| value.get(segment))
}

/// A contiguous span of keys, compared on their encoded form.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
}

impl KeyRange {
    pub fn only(key: impl Into<KeyValue>) -> Self {
        let encoded = key.into().encode();
        KeyRange {
            lower: Bound::Included(encoded.clone()),
            upper: Bound::Included(encoded),
        }
    }

    pub fn lower_bound(key: impl Into<KeyValue>, open: bool) -> Self {
        KeyRange {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(key: impl Into<KeyValue>, open: bool) -> Self {
        KeyRange {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    pub fn bound(
        lower: impl Into<KeyValue>,
        upper: impl Into<KeyValue>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        let (lower, upper) = (lower.into(), upper.into());
        let (lo, hi) = (lower.encode(), upper.encode());
        if lo > hi {
            return Err(StoreError::InvalidRange(format!(
                "lower bound {lower} is greater than upper bound {upper}"
            )));
        }
        if lo == hi && (lower_open || upper_open) {
            return Err(StoreError::InvalidRange(format!(
                "range around {lower} is empty"
            )));
        }
        Ok(KeyRange {
            lower: bound(lower, lower_open),
            upper: bound(upper, upper_open),
        })
    }

    pub(crate) fn is_below(&self, key: &[u8]) -> bool {
        match &self.lower {
            Bound::Included(lo) => key < lo.as_slice(),
            Bound::Excluded(lo) => key <= lo.as_slice(),
            Bound::Unbounded => false,
        }
    }

    pub(crate) fn is_above(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(hi) => key > hi.as_slice(),
            Bound::Excluded(hi) => key >= hi.as_slice(),
            Bound::Unbounded => false,
        }
    }

    pub fn contains(&self, key: &KeyValue) -> bool {
        let encoded = key.encode();
        !self.is_below(&encoded) && !self.is_above(&encoded)
    }
}

fn bound(key: KeyValue, open: bool) -> Bound<Vec<u8>> {
    if open {
        Bound::Excluded(key.encode())
    } else {
        Bound::Included(key.encode())
    }
}

/// JSON form of a range accepted over the C ABI:
/// `{"lower": 1, "upper": 5, "lowerOpen": false, "upperOpen": true}` or `{"only": "x"}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQuery {
    pub only: Option<KeyValue>,
    pub lower: Option<KeyValue>,
    pub upper: Option<KeyValue>,
    #[serde(default)]
    pub lower_open: bool,
    #[serde(default)]
    pub upper_open: bool,
}

impl TryFrom<RangeQuery> for KeyRange {
    type Error = StoreError;

    fn try_from(query: RangeQuery) -> Result<Self> {
        if let Some(key) = query.only {
            return Ok(KeyRange::only(key));
        }
        match (query.lower, query.upper) {
            (Some(lower), Some(upper)) => KeyRange::bound(lower, upper, query.lower_open, query.upper_open),
            (Some(lower), None) => Ok(KeyRange::lower_bound(lower, query.lower_open)),
            (None, Some(upper)) => Ok(KeyRange::upper_bound(upper, query.upper_open)),
            (None, None) => Err(StoreError::InvalidRange("range has no bounds".to_string())),
        }
    }
}
