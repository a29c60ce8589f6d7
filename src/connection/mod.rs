// src/connection/mod.rs

//! The connection translation layer: one leased native client, its transform
//! flag, the command translation registry, and the guards that release it.

mod guard;
mod handle;
mod scan;
mod subscribe;
pub mod transform;

pub use guard::{LeaseGuard, ReadTimeoutGuard};
pub use handle::{ClientGuard, RedisConnection};
