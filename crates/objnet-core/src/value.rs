//! The closed value tree that every object is built from.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::hint::{Hint, Kind};
use crate::types::Digest;

/// A map of bare field names to values. Ordered so iteration is deterministic.
pub type Map = BTreeMap<String, Value>;

/// A typed value.
///
/// Lists are homogeneous and hold scalars, maps or refs. A `Ref` stands in for
/// the map whose canonical hash it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    String(String),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Map(Map),
    List(Vec<Value>),
    Ref(Digest),
}

impl Value {
    /// The hint describing this value.
    ///
    /// Empty lists are hinted as `as`. Nested or mixed lists are rejected.
    pub fn hint(&self) -> Result<Hint> {
        match self {
            Value::List(items) => {
                let mut kind: Option<Kind> = None;
                for item in items {
                    let item_kind = item.scalar_kind().ok_or_else(|| {
                        CoreError::HeterogeneousList("nested lists are not supported".into())
                    })?;
                    match kind {
                        None => kind = Some(item_kind),
                        Some(k) if k == item_kind => {}
                        Some(k) => {
                            return Err(CoreError::HeterogeneousList(format!(
                                "{} and {}",
                                Hint::scalar(k),
                                Hint::scalar(item_kind)
                            )))
                        }
                    }
                }
                Ok(Hint::array(kind.unwrap_or(Kind::String)))
            }
            other => other
                .scalar_kind()
                .map(Hint::scalar)
                .ok_or_else(|| CoreError::InvalidHint("list".into())),
        }
    }

    fn scalar_kind(&self) -> Option<Kind> {
        match self {
            Value::Bool(_) => Some(Kind::Bool),
            Value::String(_) => Some(Kind::String),
            Value::Int(_) => Some(Kind::Int),
            Value::Float(_) => Some(Kind::Float),
            Value::Bytes(_) => Some(Kind::Bytes),
            Value::Map(_) => Some(Kind::Map),
            Value::Ref(_) => Some(Kind::Ref),
            Value::List(_) => None,
        }
    }

    /// Like [`Value::hint`], but never fails: a mixed list takes the hint of
    /// its first element.
    pub(crate) fn lenient_hint(&self) -> Hint {
        match self {
            Value::List(items) => Hint::array(
                items
                    .first()
                    .and_then(Value::scalar_kind)
                    .unwrap_or(Kind::String),
            ),
            other => other.scalar_kind().map(Hint::scalar).unwrap_or(Hint::STRING),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The digest carried by a `Ref`.
    pub fn as_digest(&self) -> Option<Digest> {
        match self {
            Value::Ref(d) => Some(*d),
            _ => None,
        }
    }

    /// Build a list from anything convertible into values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Digest> for Value {
    fn from(d: Digest) -> Self {
        Value::Ref(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_hints() {
        assert_eq!(Value::from(true).hint().unwrap(), Hint::BOOL);
        assert_eq!(Value::from("x").hint().unwrap(), Hint::STRING);
        assert_eq!(Value::from(3i64).hint().unwrap(), Hint::INT);
        assert_eq!(Value::from(1.5).hint().unwrap(), Hint::FLOAT);
        assert_eq!(Value::from(vec![1u8, 2]).hint().unwrap(), Hint::BYTES);
        assert_eq!(Value::from(Map::new()).hint().unwrap(), Hint::MAP);
        assert_eq!(Value::from(Digest::ZERO).hint().unwrap(), Hint::REF);
    }

    #[test]
    fn test_list_hints() {
        let tags = Value::list(["a", "b"]);
        assert_eq!(tags.hint().unwrap().to_string(), "as");

        let refs = Value::list([Digest::ZERO, Digest::from_bytes([1; 32])]);
        assert_eq!(refs.hint().unwrap().to_string(), "ar");

        assert_eq!(Value::List(vec![]).hint().unwrap().to_string(), "as");
    }

    #[test]
    fn test_mixed_list_is_rejected() {
        let mixed = Value::List(vec![Value::from("a"), Value::from(1i64)]);
        assert!(matches!(mixed.hint(), Err(CoreError::HeterogeneousList(_))));
        assert_eq!(mixed.lenient_hint().to_string(), "as");
    }

    #[test]
    fn test_nested_list_is_rejected() {
        let nested = Value::List(vec![Value::list(["a"])]);
        assert!(nested.hint().is_err());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from("x").as_int(), None);
        assert_eq!(Value::from(7i64).as_int(), Some(7));
        assert_eq!(Value::from(Digest::ZERO).as_digest(), Some(Digest::ZERO));
    }
}
