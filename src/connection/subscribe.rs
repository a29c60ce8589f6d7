// src/connection/subscribe.rs

//! Channel and pattern subscriptions on a single connection.

use super::guard::ReadTimeoutGuard;
use super::handle::RedisConnection;
use crate::core::client::{NativeSubscriber, PushMessage};
use crate::core::errors::RedisResult;
use crate::core::protocol::Value;
use bytes::Bytes;
use tracing::debug;

impl RedisConnection {
    /// Subscribes to `channels` and blocks until the subscription ends, calling
    /// `callback(message, channel)` for every message.
    ///
    /// The link's read timeout is lifted for the duration and restored afterwards,
    /// whether the subscription ends normally, fails, or is cancelled. Subscriptions
    /// are not retried.
    pub async fn subscribe<F>(&self, channels: Vec<Bytes>, callback: F) -> RedisResult<Value>
    where
        F: FnMut(Bytes, Bytes) + Send + 'static,
    {
        let mut client = ReadTimeoutGuard::unbounded(self.client().await?);
        debug!(connection = self.id(), "Subscribing to {} channel(s).", channels.len());
        client.subscribe(channels, adapt(callback)).await
    }

    /// Pattern variant of [`RedisConnection::subscribe`]. The callback receives the
    /// concrete channel a message was published to, not the pattern.
    pub async fn psubscribe<F>(&self, patterns: Vec<Bytes>, callback: F) -> RedisResult<Value>
    where
        F: FnMut(Bytes, Bytes) + Send + 'static,
    {
        let mut client = ReadTimeoutGuard::unbounded(self.client().await?);
        debug!(connection = self.id(), "Subscribing to {} pattern(s).", patterns.len());
        client.psubscribe(patterns, adapt(callback)).await
    }
}

/// Adapts a portable `(message, channel)` callback to the native push shape.
fn adapt<F>(mut callback: F) -> NativeSubscriber
where
    F: FnMut(Bytes, Bytes) + Send + 'static,
{
    Box::new(move |message: PushMessage| callback(message.payload, message.channel))
}
