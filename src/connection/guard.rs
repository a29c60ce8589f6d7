// src/connection/guard.rs

//! RAII guards that return connection resources on every exit path.

use super::handle::{ClientGuard, RedisConnection};
use crate::core::client::NativeClient;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::debug;

/// Releases a leased connection when dropped, unless it was disarmed first.
///
/// A command future that errors, panics, or is dropped mid-flight still drops
/// its guard, so the lease always goes back to the pool.
pub struct LeaseGuard {
    connection: Option<RedisConnection>,
}

impl LeaseGuard {
    pub fn new(connection: RedisConnection) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    /// The guarded connection. `None` only after [`LeaseGuard::disarm`].
    pub fn connection(&self) -> Option<&RedisConnection> {
        self.connection.as_ref()
    }

    /// Hands the connection to someone else, who becomes responsible for releasing it.
    pub fn disarm(mut self) -> Option<RedisConnection> {
        self.connection.take()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.release();
        }
    }
}

/// Holds the native client with its read timeout lifted, restoring the previous
/// timeout when dropped.
pub struct ReadTimeoutGuard {
    client: ClientGuard,
    previous: Option<Duration>,
}

impl ReadTimeoutGuard {
    /// Lifts the read timeout so a call can block indefinitely.
    pub fn unbounded(mut client: ClientGuard) -> Self {
        let previous = client.read_timeout();
        client.set_read_timeout(None);
        Self { client, previous }
    }

    pub fn previous(&self) -> Option<Duration> {
        self.previous
    }
}

impl Deref for ReadTimeoutGuard {
    type Target = dyn NativeClient;

    fn deref(&self) -> &Self::Target {
        &*self.client
    }
}

impl DerefMut for ReadTimeoutGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.client
    }
}

impl Drop for ReadTimeoutGuard {
    fn drop(&mut self) {
        debug!("Restoring read timeout to {:?}.", self.previous);
        self.client.set_read_timeout(self.previous);
    }
}
