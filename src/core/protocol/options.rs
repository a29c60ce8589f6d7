// src/core/protocol/options.rs

//! Typed option structures that cross the native client boundary.

use crate::core::errors::{RedisError, RedisResult};
use crate::core::protocol::Value;
use bytes::Bytes;
use strum_macros::{AsRefStr, Display, EnumString};

/// The write condition of a `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SetFlag {
    Nx,
    Xx,
}

/// The unit of a `SET` expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ExpireResolution {
    Ex,
    Px,
    Exat,
    Pxat,
}

/// Native `SET` options: an optional condition flag plus an expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOptions {
    pub flag: Option<SetFlag>,
    pub expire: (ExpireResolution, i64),
}

impl SetOptions {
    /// Builds options from the portable `(resolution, ttl, flag)` tail of a `SET`.
    pub fn from_portable(resolution: &Value, ttl: &Value, flag: &Value) -> RedisResult<Self> {
        let resolution = parse_keyword::<ExpireResolution>(resolution, "expire resolution")?;
        let ttl = ttl.as_int().ok_or(RedisError::NotAnInteger)?;
        let flag = if flag.is_truthy() {
            Some(parse_keyword::<SetFlag>(flag, "set flag")?)
        } else {
            None
        };
        Ok(Self {
            flag,
            expire: (resolution, ttl),
        })
    }
}

/// Pattern and page size for the cursor-based scan family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub pattern: Bytes,
    pub count: i64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            pattern: Bytes::from_static(b"*"),
            count: 10,
        }
    }
}

impl ScanOptions {
    /// Accepts either a `{match, count}` map as the first argument or a positional
    /// `(pattern, count)` pair. Missing pieces fall back to `("*", 10)`.
    pub fn from_arguments(arguments: &[Value]) -> RedisResult<Self> {
        let defaults = Self::default();
        let (pattern, count) = match arguments.first() {
            Some(Value::Map(options)) => (options.get(&b"match"[..]), options.get(&b"count"[..])),
            Some(Value::Array(_)) => (None, None),
            first => (first, arguments.get(1)),
        };

        let pattern = match pattern {
            None | Some(Value::Nil) => defaults.pattern,
            Some(value) => value.to_bytes().ok_or_else(|| {
                RedisError::InvalidArgument("scan pattern must be a string".into())
            })?,
        };
        let count = match count {
            None | Some(Value::Nil) => defaults.count,
            Some(value) => value.as_int().ok_or(RedisError::NotAnInteger)?,
        };
        Ok(Self { pattern, count })
    }
}

fn parse_keyword<T: std::str::FromStr>(value: &Value, what: &str) -> RedisResult<T> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RedisError::InvalidArgument(format!("unsupported {what}: {value:?}")))
}
