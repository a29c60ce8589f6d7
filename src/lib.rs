// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod redis;

// Re-export
pub use crate::config::{PoolConfig, RedisConfig};
pub use crate::connection::RedisConnection;
pub use crate::core::{Connector, NativeClient, RedisError, RedisResult, Value};
pub use crate::redis::{Redis, RedisFactory};
