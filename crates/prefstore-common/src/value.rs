//! The tagged value model stored under each preference key.
//!
//! A value is one scalar (int64, double, bool, UTF-8 string) or a
//! homogeneous array of one scalar kind. The tag determines which accessor
//! is valid; there is no implicit widening or narrowing between tags.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One stored preference value.
///
/// `Null` is the default-constructed state; it is what observers receive
/// for a deleted key and what a typed getter refuses to unwrap.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Double(f64),
    Bool(bool),
    String(String),
    IntArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    BoolArray(Vec<bool>),
    StringArray(Vec<String>),
}

/// Discriminant of a [`Value`], used for type-mismatch checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Int,
    Double,
    Bool,
    String,
    IntArray,
    DoubleArray,
    BoolArray,
    StringArray,
}

impl Value {
    /// The tag of this value
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Int(_) => ValueKind::Int,
            Self::Double(_) => ValueKind::Double,
            Self::Bool(_) => ValueKind::Bool,
            Self::String(_) => ValueKind::String,
            Self::IntArray(_) => ValueKind::IntArray,
            Self::DoubleArray(_) => ValueKind::DoubleArray,
            Self::BoolArray(_) => ValueKind::BoolArray,
            Self::StringArray(_) => ValueKind::StringArray,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            Self::IntArray(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_double_array(&self) -> Option<&[f64]> {
        match self {
            Self::DoubleArray(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool_array(&self) -> Option<&[bool]> {
        match self {
            Self::BoolArray(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Self::StringArray(v) => Some(v),
            _ => None,
        }
    }

    /// Encode into the wire form used by the KV engine.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode the wire form; inverse of [`Value::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Serialized size in bytes, used for the value size limit and the
    /// large-value cache threshold.
    pub fn serialized_size(&self) -> Result<usize> {
        let size = bincode::serialized_size(self)?;
        usize::try_from(size).map_err(|_| Error::serialization("value size overflows usize"))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Self::IntArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleArray(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Self::BoolArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::StringArray(v)
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        v.as_int()
            .ok_or_else(|| Error::invalid_param("value is not an int"))
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        v.as_double()
            .ok_or_else(|| Error::invalid_param("value is not a double"))
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        v.as_bool()
            .ok_or_else(|| Error::invalid_param("value is not a bool"))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        match v {
            Value::String(s) => Ok(s),
            _ => Err(Error::invalid_param("value is not a string")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Int(-42),
            Value::Double(0.25),
            Value::Bool(true),
            Value::String("hello".into()),
            Value::IntArray(vec![1, 2, 3]),
            Value::DoubleArray(vec![0.5, -1.5]),
            Value::BoolArray(vec![true, false]),
            Value::StringArray(vec!["a".into(), String::new()]),
        ]
    }

    #[test]
    fn test_round_trip() {
        for v in sample_values() {
            let bytes = v.to_bytes().unwrap();
            assert_eq!(Value::from_bytes(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn test_default_is_null() {
        assert_eq!(Value::default(), Value::Null);
        assert!(Value::default().is_null());
    }

    #[test]
    fn test_typed_accessors_reject_other_tags() {
        let v = Value::Int(7);
        assert_eq!(v.as_int(), Some(7));
        assert_eq!(v.as_double(), None);
        assert_eq!(v.as_bool(), None);
        assert_eq!(v.as_str(), None);

        // int64 and double are distinct tags, no implicit widening
        assert_eq!(Value::Double(7.0).as_int(), None);
    }

    #[test]
    fn test_try_from_extraction() {
        assert_eq!(i64::try_from(Value::Int(9)).unwrap(), 9);
        assert!(i64::try_from(Value::Bool(true)).is_err());
        assert_eq!(String::try_from(Value::from("x")).unwrap(), "x");
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(Value::IntArray(vec![1, 2]), Value::IntArray(vec![1, 2]));
        assert_ne!(Value::IntArray(vec![1, 2]), Value::IntArray(vec![2, 1]));
        assert_ne!(Value::Int(1), Value::Double(1.0));
    }

    #[test]
    fn test_serialized_size_tracks_payload() {
        let small = Value::String("x".into());
        let big = Value::String("x".repeat(1024));
        assert!(big.serialized_size().unwrap() > small.serialized_size().unwrap());
    }
}
