// src/core/mod.rs

//! The central module containing the building blocks the dispatcher is made of.

pub mod client;
pub mod context;
pub mod errors;
pub mod events;
pub mod pool;
pub mod protocol;

pub use client::{Connector, NativeClient};
pub use errors::{RedisError, RedisResult};
pub use protocol::Value;
