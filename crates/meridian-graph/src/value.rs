//! Scalar property values and element identities understood by every backend.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a vertex or edge within one backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub i64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vertex or edge reference, used where either may be targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    Vertex(ElementId),
    Edge(ElementId),
}

/// Edge direction relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
    Both,
}

/// The scalar types a property key may be declared with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    String,
    /// Epoch milliseconds.
    Date,
}

impl ScalarType {
    /// Whether a value can be stored under a key of this type.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Boolean, Value::Bool(_))
                | (Self::Integer | Self::Long | Self::Date, Value::Int(_))
                | (Self::Float | Self::Double, Value::Float(_) | Value::Int(_))
                | (Self::String, Value::Str(_))
        )
    }
}

/// A single stored property value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Ordering between comparable values; numbers compare across int/float.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Equality that treats `Int(1)` and `Float(1.0)` as equal.
    pub fn loosely_equals(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// Properties of a single element.
pub type PropertyMap = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_type_acceptance() {
        assert!(ScalarType::Date.accepts(&Value::Int(1_700_000_000_000)));
        assert!(ScalarType::Double.accepts(&Value::Int(3)));
        assert!(!ScalarType::Integer.accepts(&Value::Float(1.5)));
        assert!(!ScalarType::String.accepts(&Value::Bool(true)));
    }

    #[test]
    fn cross_numeric_comparison() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert!(Value::Int(1).loosely_equals(&Value::Float(1.0)));
        assert_eq!(Value::Str("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn untagged_json_roundtrip() {
        let mut props = PropertyMap::new();
        props.insert("a".into(), Value::Int(7));
        props.insert("b".into(), Value::Float(0.25));
        props.insert("c".into(), Value::Str("x".into()));
        props.insert("d".into(), Value::Bool(false));
        let json = serde_json::to_string(&props).unwrap();
        let back: PropertyMap = serde_json::from_str(&json).unwrap();
        assert_eq!(props, back);
    }
}
