//! Composite key model
//!
//! Every buffered value is addressed by a composite key: the series identity
//! (canonical `measurement,tag=value,...` string with tags in sorted order)
//! plus a bare field name. Keys are immutable once constructed and compare,
//! hash, and order byte-wise.
//!
//! Keys are backed by `Arc<str>` so the canonical instances produced by the
//! intern table flow into key construction without another copy.
//!
//! # Example
//!
//! ```rust
//! use kuba_writecache::key::CompositeKey;
//!
//! let key = CompositeKey::new("cpu,host=a", "usage");
//! let rendered = key.to_key_string();
//! assert_eq!(rendered, "cpu,host=a#!~#usage");
//! assert_eq!(CompositeKey::parse(&rendered).unwrap(), key);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::KeyError;

/// Separator between the series key and the field key in a rendered
/// composite key.
///
/// The sequence cannot occur inside a well-formed series key: measurement
/// and tag text never contain `#!~#`, and field names are bare identifiers.
pub const KEY_FIELD_SEPARATOR: &str = "#!~#";

/// FNV-1a 64-bit offset basis
const FNV_OFFSET_64: u64 = 14695981039346656037;

/// FNV-1a 64-bit prime
const FNV_PRIME_64: u64 = 1099511628211;

/// FNV-1a 64-bit hash of a byte string
///
/// Fast, non-cryptographic, and stable across processes. Used for intern
/// table routing and for the cache store's deterministic shard selection.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME_64);
    }
    hash
}

/// Canonical series identity: `measurement,tag=value,tag=value...`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(Arc<str>);

impl SeriesKey {
    /// Create a series key from its canonical string form
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key as raw bytes (equality and hashing operate on these)
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Byte length of the key
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeriesKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Bare field name within a series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey(Arc<str>);

impl FieldKey {
    /// Create a field key
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key as raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The `(SeriesKey, FieldKey)` pair identifying one time series' one field
///
/// Ordering is primarily by series key, then by field key, both
/// byte-lexicographic, so sorted enumerations group all fields of a series
/// together deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    /// Series identity portion
    pub series: SeriesKey,
    /// Field name portion
    pub field: FieldKey,
}

impl CompositeKey {
    /// Construct a composite key; no allocation beyond wrapping the inputs
    pub fn new(series: impl Into<SeriesKey>, field: impl Into<FieldKey>) -> Self {
        Self {
            series: series.into(),
            field: field.into(),
        }
    }

    /// Render `series + separator + field`
    pub fn to_key_string(&self) -> String {
        let mut out = String::with_capacity(
            self.series.len() + KEY_FIELD_SEPARATOR.len() + self.field.as_str().len(),
        );
        out.push_str(self.series.as_str());
        out.push_str(KEY_FIELD_SEPARATOR);
        out.push_str(self.field.as_str());
        out
    }

    /// Inverse of [`to_key_string`](Self::to_key_string)
    ///
    /// Splits at the first occurrence of the separator. Fails with
    /// [`KeyError::MalformedKey`] when the separator is absent.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        match s.find(KEY_FIELD_SEPARATOR) {
            Some(pos) => {
                let series = &s[..pos];
                let field = &s[pos + KEY_FIELD_SEPARATOR.len()..];
                Ok(Self::new(series, field))
            }
            None => Err(KeyError::MalformedKey {
                separator: KEY_FIELD_SEPARATOR,
            }),
        }
    }
}

impl From<SeriesKey> for CompositeKey {
    fn from(series: SeriesKey) -> Self {
        Self {
            series,
            field: FieldKey::new(""),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.series, KEY_FIELD_SEPARATOR, self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_string_roundtrip() {
        let key = CompositeKey::new("cpu,host=a,region=west", "usage_idle");
        let rendered = key.to_key_string();
        assert_eq!(rendered, "cpu,host=a,region=west#!~#usage_idle");

        let parsed = CompositeKey::parse(&rendered).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_parse_missing_separator() {
        let err = CompositeKey::parse("cpu,host=a").unwrap_err();
        assert_eq!(
            err,
            KeyError::MalformedKey {
                separator: KEY_FIELD_SEPARATOR
            }
        );
    }

    #[test]
    fn test_parse_empty_parts() {
        // Degenerate but well-formed: empty series and field survive roundtrip
        let key = CompositeKey::new("", "");
        let parsed = CompositeKey::parse(&key.to_key_string()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_ordering_series_then_field() {
        let a = CompositeKey::new("cpu,host=a", "usage");
        let b = CompositeKey::new("cpu,host=a", "idle");
        let c = CompositeKey::new("cpu,host=b", "aaa");

        // Same series: ordered by field bytes
        assert!(b < a); // "idle" < "usage"
        // Different series: series dominates regardless of field
        assert!(a < c);
        assert!(b < c);
    }

    #[test]
    fn test_fnv1a_known_values() {
        // FNV-1a reference vectors
        assert_eq!(fnv1a_64(b""), 14695981039346656037);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_fnv1a_deterministic() {
        let h1 = fnv1a_64(b"cpu,host=a,region=west");
        let h2 = fnv1a_64(b"cpu,host=a,region=west");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_interned_keys_share_backing() {
        let canonical: Arc<str> = Arc::from("cpu,host=a");
        let k1 = SeriesKey::new(Arc::clone(&canonical));
        let k2 = SeriesKey::new(canonical);
        assert_eq!(k1, k2);
        assert!(Arc::ptr_eq(&k1.0, &k2.0));
    }
}
