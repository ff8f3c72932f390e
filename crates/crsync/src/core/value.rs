//! Attribute value representation.
//!
//! Values live in a tagged table keyed by (contentid, name, sortorder); the
//! sum type below is the in-memory form of one such row.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::schema::AttributeKind;

/// One stored attribute value.
///
/// Equality is storage identity: doubles compare by bit pattern, so a NaN
/// equals itself and unchanged values never look modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    LongText(String),
    Int(i32),
    Long(i64),
    Double(f64),
    Date(NaiveDateTime),
    Blob(Vec<u8>),
    /// Content id of the linked object, kept verbatim even if it does not resolve.
    Link(String),
}

impl Value {
    /// Attribute kind this value is stored as.
    pub fn kind(&self) -> AttributeKind {
        match self {
            Value::Text(_) => AttributeKind::Text,
            Value::LongText(_) => AttributeKind::TextLong,
            Value::Int(_) => AttributeKind::Integer,
            Value::Long(_) => AttributeKind::Long,
            Value::Double(_) => AttributeKind::Double,
            Value::Date(_) => AttributeKind::Date,
            Value::Blob(_) => AttributeKind::Blob,
            Value::Link(_) => AttributeKind::ForeignObjectLink,
        }
    }

    /// This value in the representation of `kind`, or `None` when it cannot
    /// be stored as that kind. Text kinds convert freely; integers widen and
    /// narrow when they fit.
    pub fn coerce_to(&self, kind: AttributeKind) -> Option<Value> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        let value = match (self, kind) {
            (Value::Text(s) | Value::LongText(s) | Value::Link(s), AttributeKind::Text) => {
                Value::Text(s.clone())
            }
            (Value::Text(s) | Value::LongText(s) | Value::Link(s), AttributeKind::TextLong) => {
                Value::LongText(s.clone())
            }
            (
                Value::Text(s) | Value::LongText(s) | Value::Link(s),
                AttributeKind::ForeignObjectLink,
            ) => Value::Link(s.clone()),
            (Value::Int(v), AttributeKind::Long) => Value::Long(i64::from(*v)),
            (Value::Long(v), AttributeKind::Integer) => Value::Int(i32::try_from(*v).ok()?),
            (Value::Int(v), AttributeKind::Double) => Value::Double(f64::from(*v)),
            (Value::Long(v), AttributeKind::Double) => Value::Double(*v as f64),
            _ => return None,
        };
        Some(value)
    }

    /// Approximate payload size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Value::Text(s) | Value::LongText(s) | Value::Link(s) => s.len(),
            Value::Blob(b) => b.len(),
            Value::Int(_) => 4,
            Value::Long(_) | Value::Double(_) | Value::Date(_) => 8,
        }
    }

    /// Feed a canonical byte form of this value into a digest.
    pub fn digest_into(&self, hasher: &mut Sha256) {
        hasher.update(self.kind().code().to_le_bytes());
        match self {
            Value::Text(s) | Value::LongText(s) | Value::Link(s) => {
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Blob(b) => {
                hasher.update((b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
            Value::Int(v) => hasher.update(v.to_le_bytes()),
            Value::Long(v) => hasher.update(v.to_le_bytes()),
            Value::Double(v) => hasher.update(v.to_bits().to_le_bytes()),
            Value::Date(d) => hasher.update(d.and_utc().timestamp_micros().to_le_bytes()),
        }
    }

    /// Textual form used by rule evaluation.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::LongText(s) | Value::Link(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric form used by rule evaluation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b))
            | (Value::LongText(a), Value::LongText(b))
            | (Value::Link(a), Value::Link(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Date(v)
    }
}

/// Attribute values of one object, by attribute name, each ordered by sortorder.
pub type AttributeMap = BTreeMap<String, Vec<Value>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(values: &[Value]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for v in values {
            v.digest_into(&mut hasher);
        }
        hasher.finalize().to_vec()
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::from("x").kind(), AttributeKind::Text);
        assert_eq!(Value::LongText("x".into()).kind(), AttributeKind::TextLong);
        assert_eq!(Value::Link("10002.0".into()).kind(), AttributeKind::ForeignObjectLink);
        assert_eq!(Value::from(vec![1u8, 2]).kind(), AttributeKind::Blob);
    }

    #[test]
    fn test_digest_distinguishes_kind_and_order() {
        let a = digest(&[Value::Text("1".into()), Value::Text("2".into())]);
        let b = digest(&[Value::Text("2".into()), Value::Text("1".into())]);
        let c = digest(&[Value::Link("1".into()), Value::Text("2".into())]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, digest(&[Value::Text("1".into()), Value::Text("2".into())]));
    }

    #[test]
    fn test_double_equality_by_bits() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_eq!(Value::Double(1.5), Value::Double(1.5));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        assert_ne!(Value::Int(1), Value::Long(1));
    }

    #[test]
    fn test_coerce_to_attribute_kind() {
        assert_eq!(
            Value::from("body").coerce_to(AttributeKind::TextLong),
            Some(Value::LongText("body".into()))
        );
        assert_eq!(
            Value::from("10002.7").coerce_to(AttributeKind::ForeignObjectLink),
            Some(Value::Link("10002.7".into()))
        );
        assert_eq!(Value::Int(7).coerce_to(AttributeKind::Long), Some(Value::Long(7)));
        assert_eq!(Value::Long(7).coerce_to(AttributeKind::Integer), Some(Value::Int(7)));
        assert_eq!(Value::Long(i64::MAX).coerce_to(AttributeKind::Integer), None);
        assert_eq!(Value::from("x").coerce_to(AttributeKind::Integer), None);
        assert_eq!(Value::from(vec![1u8]).coerce_to(AttributeKind::Text), None);
    }

    #[test]
    fn test_digest_length_prefix() {
        let joined = digest(&[Value::Text("ab".into())]);
        let split = digest(&[Value::Text("a".into()), Value::Text("b".into())]);
        assert_ne!(joined, split);
    }
}
