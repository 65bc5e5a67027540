//! Leaf values.
//!
//! A [`Value`] is the payload of a leaf or leaf-list entry. Values are totally
//! ordered and hashable because they also appear inside path arguments, as
//! list keys and as leaf-list entry identifiers.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Presence-only leaf without content.
    Empty,
    Boolean(bool),
    Int(i64),
    Uint(u64),
    String(Arc<str>),
    Binary(Bytes),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Binary(bytes) => {
                f.write_str("0x")?;
                for byte in bytes.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Uint(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Uint(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(Bytes::from(value))
    }
}

#[cfg(feature = "proptest")]
pub mod strategies {
    use super::Value;
    use proptest::prelude::*;

    /// Generates values of every variant.
    pub fn any_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Empty),
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Int),
            any::<u64>().prop_map(Value::Uint),
            "[a-z0-9]{0,12}".prop_map(Value::from),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::from),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_groups_by_variant() {
        let mut values = vec![
            Value::from("b"),
            Value::from(3i64),
            Value::Empty,
            Value::from(true),
            Value::from("a"),
            Value::from(-1i64),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Empty,
                Value::from(true),
                Value::from(-1i64),
                Value::from(3i64),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn binary_display_is_hex() {
        let value = Value::from(vec![0x0a, 0xff]);
        assert_eq!(value.to_string(), "0x0aff");
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(7u64).as_i64(), Some(7));
        assert_eq!(Value::Uint(u64::MAX).as_i64(), None);
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(false).as_bool(), Some(false));
    }
}
