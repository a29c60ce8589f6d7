// src/core/errors.rs

//! Defines the primary error type for the entire crate.

use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A convenience alias used across the crate.
pub type RedisResult<T> = Result<T, RedisError>;

/// The main error enum, representing every failure the connection manager can surface.
/// Using `thiserror` allows for clean error definitions and automatic `Display` impls.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The physical link dropped or became unusable mid-command.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// An error reply produced by the store itself (e.g. `WRONGTYPE ...`).
    #[error("{0}")]
    Server(String),

    #[error("The connection is not a valid RedisConnection: {0}")]
    InvalidConnection(String),

    #[error("Invalid Redis proxy '{0}'")]
    InvalidProxy(String),

    #[error("Invalid Redis pool '{0}'")]
    InvalidPool(String),

    /// A command that must pin its connection was issued outside `context::scope`.
    #[error("Command '{0}' requires an active context scope to pin its connection")]
    NoContext(String),

    #[error("Connection pool '{pool}' exhausted after waiting {waited:?}")]
    PoolExhausted { pool: String, waited: Duration },

    #[error("Connection pool '{0}' is closed")]
    PoolClosed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("Value is not an integer or out of range")]
    NotAnInteger,

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl RedisError {
    /// Returns true for failures of the physical link, which a reconnect may cure.
    /// Error replies from the store are never in this class.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, RedisError::Io(_) | RedisError::ConnectionLost(_))
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for RedisError {
    fn clone(&self) -> Self {
        match self {
            RedisError::Io(e) => RedisError::Io(Arc::clone(e)),
            RedisError::ConnectionLost(s) => RedisError::ConnectionLost(s.clone()),
            RedisError::Server(s) => RedisError::Server(s.clone()),
            RedisError::InvalidConnection(s) => RedisError::InvalidConnection(s.clone()),
            RedisError::InvalidProxy(s) => RedisError::InvalidProxy(s.clone()),
            RedisError::InvalidPool(s) => RedisError::InvalidPool(s.clone()),
            RedisError::NoContext(s) => RedisError::NoContext(s.clone()),
            RedisError::PoolExhausted { pool, waited } => RedisError::PoolExhausted {
                pool: pool.clone(),
                waited: *waited,
            },
            RedisError::PoolClosed(s) => RedisError::PoolClosed(s.clone()),
            RedisError::InvalidArgument(s) => RedisError::InvalidArgument(s.clone()),
            RedisError::WrongArgumentCount(s) => RedisError::WrongArgumentCount(s.clone()),
            RedisError::NotAnInteger => RedisError::NotAnInteger,
            RedisError::Internal(s) => RedisError::Internal(s.clone()),
        }
    }
}

impl PartialEq for RedisError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RedisError::Io(e1), RedisError::Io(e2)) => e1.to_string() == e2.to_string(),
            (RedisError::ConnectionLost(s1), RedisError::ConnectionLost(s2)) => s1 == s2,
            (RedisError::Server(s1), RedisError::Server(s2)) => s1 == s2,
            (RedisError::InvalidConnection(s1), RedisError::InvalidConnection(s2)) => s1 == s2,
            (RedisError::InvalidProxy(s1), RedisError::InvalidProxy(s2)) => s1 == s2,
            (RedisError::InvalidPool(s1), RedisError::InvalidPool(s2)) => s1 == s2,
            (RedisError::NoContext(s1), RedisError::NoContext(s2)) => s1 == s2,
            (
                RedisError::PoolExhausted { pool: p1, waited: w1 },
                RedisError::PoolExhausted { pool: p2, waited: w2 },
            ) => p1 == p2 && w1 == w2,
            (RedisError::PoolClosed(s1), RedisError::PoolClosed(s2)) => s1 == s2,
            (RedisError::InvalidArgument(s1), RedisError::InvalidArgument(s2)) => s1 == s2,
            (RedisError::WrongArgumentCount(s1), RedisError::WrongArgumentCount(s2)) => s1 == s2,
            (RedisError::Internal(s1), RedisError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RedisError {
    fn from(e: std::io::Error) -> Self {
        RedisError::Io(Arc::new(e))
    }
}

impl From<ParseIntError> for RedisError {
    fn from(_: ParseIntError) -> Self {
        RedisError::NotAnInteger
    }
}
