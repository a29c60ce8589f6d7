// src/core/protocol/value.rs

//! Defines the dynamic value type shared by the portable command surface and
//! the native client surface.

use bytes::Bytes;
use indexmap::IndexMap;

/// `Value` is the single currency of both call surfaces.
///
/// Portable callers pass arguments as `Value`s and receive `Value`s back; the native
/// client does the same through `NativeClient::call`. The native client reports a
/// missing key with `Bool(false)`, which the translation layer normalizes to `Nil`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Bytes),
    Array(Vec<Value>),
    /// An ordered, bytes-keyed mapping (hash fields, option maps, member/score maps).
    Map(IndexMap<Bytes, Value>),
}

impl Value {
    /// Builds a `Map` from any iterator of key/value pairs, keeping insertion order.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Bytes>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Truthiness as the portable surface understands it: `Nil`, `false`, `0`, `0.0`,
    /// empty strings, the string `"0"`, and empty collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bytes(b) => !(b.is_empty() || b.as_ref() == b"0"),
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// True for the replies a blocking pop uses to say "nothing arrived".
    pub fn is_empty_reply(&self) -> bool {
        match self {
            Value::Nil | Value::Bool(false) => true,
            Value::Array(a) => a.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns the native "missing" sentinel check.
    pub fn is_false(&self) -> bool {
        matches!(self, Value::Bool(false))
    }

    /// Renders scalars as bytes. Collections and `Nil` have no byte form.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Value::Bytes(b) => Some(b.clone()),
            Value::Int(i) => Some(Bytes::from(i.to_string())),
            Value::Float(f) => Some(Bytes::from(f.to_string())),
            Value::Bool(true) => Some(Bytes::from_static(b"1")),
            Value::Bool(false) => Some(Bytes::new()),
            Value::Nil | Value::Array(_) | Value::Map(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Integer coercion: integers as-is, floats truncated, booleans as 0/1 and
    /// numeric strings parsed. Anything else has no integer form.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Wraps an unsigned scan cursor. Cursors past `i64::MAX` travel as their
    /// decimal string.
    pub fn cursor(cursor: u64) -> Self {
        i64::try_from(cursor)
            .map_or_else(|_| Value::Bytes(Bytes::from(cursor.to_string())), Value::Int)
    }

    /// Reads an unsigned scan cursor from an integer or a decimal string.
    pub fn as_cursor(&self) -> Option<u64> {
        match self {
            Value::Int(i) => u64::try_from(*i).ok(),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Compares a string value against `expected` ignoring ASCII case.
    pub fn eq_ignore_case(&self, expected: &str) -> bool {
        self.as_str()
            .is_some_and(|s| s.eq_ignore_ascii_case(expected))
    }

    /// Wraps a non-array value into a one-element vector; arrays are unwrapped.
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Value::Array(items) => items,
            other => vec![other],
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(Bytes::from(s))
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<IndexMap<Bytes, Value>> for Value {
    fn from(map: IndexMap<Bytes, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Nil, Into::into)
    }
}
