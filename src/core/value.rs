use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Timestamp rendering used for plain text (audit values, XML attributes, pk text).
pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A typed field value.
///
/// Equality is numeric for `Integer`/`Decimal` (so `1.50 == 1.5` and
/// `Integer(2) == Decimal(2.0)`), which keeps dirty checks and audit diffs free
/// of representation-only differences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Total order: `Null` sorts before every non-null value, numerics compare
    /// by value across `Integer`/`Decimal`, and unrelated types fall back to a
    /// fixed type rank so the order stays total.
    pub fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,

            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Decimal(a), Self::Decimal(b)) => a.cmp(b),
            (Self::Integer(a), Self::Decimal(b)) => Decimal::from(*a).cmp(b),
            (Self::Decimal(a), Self::Integer(b)) => a.cmp(&Decimal::from(*b)),

            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),

            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Decimal(_) => 2,
            Self::Text(_) => 3,
            Self::Timestamp(_) => 4,
            Self::Binary(_) => 5,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Text(_) => "TEXT",
            Self::Integer(_) => "INTEGER",
            Self::Decimal(_) => "DECIMAL",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Boolean(_) => "BOOLEAN",
            Self::Binary(_) => "BINARY",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null, empty text, or empty binary. Defaults are only applied to empty values.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
            Self::Binary(b) => b.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Decimal(d) if d.fract().is_zero() => i64::try_from(*d).ok(),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Plain text rendering, `None` for null.
    pub fn to_plain_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Timestamp(ts) => Some(ts.format(TIMESTAMP_TEXT_FORMAT).to_string()),
            Self::Boolean(b) => Some(b.to_string()),
            Self::Binary(b) => Some(BASE64.encode(b)),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            // rust_decimal compares by numeric value, ignoring scale
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Integer(i), Self::Decimal(d)) | (Self::Decimal(d), Self::Integer(i)) => {
                Decimal::from(*i) == *d
            }
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Text(s) => {
                1u8.hash(state);
                s.hash(state);
            }
            // numerics share a tag so equal Integer/Decimal values hash alike
            Self::Integer(i) => {
                2u8.hash(state);
                Decimal::from(*i).normalize().hash(state);
            }
            Self::Decimal(d) => {
                2u8.hash(state);
                d.normalize().hash(state);
            }
            Self::Timestamp(ts) => {
                3u8.hash(state);
                ts.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Self::Binary(b) => {
                5u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_plain_string() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "null"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<Decimal> for FieldValue {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Declared semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Timestamp,
    Boolean,
    Binary,
}

impl FieldType {
    pub fn is_compatible(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (Self::Text, FieldValue::Text(_))
                | (Self::Integer, FieldValue::Integer(_))
                | (Self::Decimal, FieldValue::Decimal(_))
                | (Self::Decimal, FieldValue::Integer(_))
                | (Self::Timestamp, FieldValue::Timestamp(_))
                | (Self::Boolean, FieldValue::Boolean(_))
                | (Self::Binary, FieldValue::Binary(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "TEXT"),
            Self::Integer => write!(f, "INTEGER"),
            Self::Decimal => write!(f, "DECIMAL"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Binary => write!(f, "BINARY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> FieldValue {
        FieldValue::Decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_decimal_equality_ignores_scale() {
        assert_eq!(dec("1.50"), dec("1.5"));
        assert_eq!(dec("2.00"), FieldValue::Integer(2));
        assert_ne!(dec("1.51"), dec("1.5"));
        assert_eq!(dec("1.50").to_plain_string().unwrap(), "1.50");
    }

    #[test]
    fn test_null_sorts_first() {
        assert!(FieldValue::Null < FieldValue::Integer(i64::MIN));
        assert!(FieldValue::Null < FieldValue::Text(String::new()));
        assert_eq!(FieldValue::Null.compare(&FieldValue::Null), Ordering::Equal);
    }

    #[test]
    fn test_mixed_numeric_ordering() {
        assert!(FieldValue::Integer(1) < dec("1.01"));
        assert!(dec("0.99") < FieldValue::Integer(1));
    }

    #[test]
    fn test_equal_numerics_hash_alike() {
        use std::collections::hash_map::DefaultHasher;
        let hash = |v: &FieldValue| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&dec("3.000")), hash(&FieldValue::Integer(3)));
    }

    #[test]
    fn test_type_compatibility() {
        assert!(FieldType::Decimal.is_compatible(&FieldValue::Integer(4)));
        assert!(FieldType::Text.is_compatible(&FieldValue::Null));
        assert!(!FieldType::Integer.is_compatible(&FieldValue::Text("x".into())));
    }
}
