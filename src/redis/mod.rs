// src/redis/mod.rs

//! The command dispatcher: the public entry point for issuing commands.
//!
//! `Redis` resolves which connection a command runs on, reports every command
//! to the configured event sink, and decides whether the connection goes back
//! to the pool right away or stays pinned to the current unit of work.

pub mod factory;
pub mod multi_exec;

pub use factory::RedisFactory;
pub use multi_exec::{BatchHandle, BatchMode};

use crate::config::DEFAULT_POOL;
use crate::connection::{LeaseGuard, RedisConnection};
use crate::core::client::ScanKind;
use crate::core::context;
use crate::core::errors::{RedisError, RedisResult};
use crate::core::events::CommandExecuted;
use crate::core::pool::PoolFactory;
use crate::core::protocol::Value;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, error, info_span};

/// Commands whose follow-up commands must run on the same physical connection.
const SAME_CONNECTION_COMMANDS: [&str; 3] = ["multi", "pipeline", "select"];

/// Where the connection for one command came from.
enum Lease {
    /// Pinned by an earlier command in this unit of work; its owner releases it.
    Pinned(RedisConnection),
    /// Leased for this command alone.
    Fresh(LeaseGuard),
}

impl Lease {
    fn connection(&self) -> Option<&RedisConnection> {
        match self {
            Lease::Pinned(connection) => Some(connection),
            Lease::Fresh(guard) => guard.connection(),
        }
    }
}

/// A dispatcher bound to one named pool. Cheap to clone.
#[derive(Clone)]
pub struct Redis {
    factory: Arc<PoolFactory>,
    pool_name: String,
}

impl std::fmt::Debug for Redis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redis")
            .field("pool", &self.pool_name)
            .finish()
    }
}

impl Redis {
    /// A dispatcher for the `default` pool.
    pub fn new(factory: Arc<PoolFactory>) -> Self {
        Self {
            factory,
            pool_name: DEFAULT_POOL.to_string(),
        }
    }

    /// A dispatcher for the named pool. Fails with `InvalidProxy` if the pool is
    /// not configured.
    pub fn for_pool(factory: Arc<PoolFactory>, name: &str) -> RedisResult<Self> {
        if !factory.has_pool(name) {
            return Err(RedisError::InvalidProxy(name.to_string()));
        }
        Ok(Self {
            factory,
            pool_name: name.to_string(),
        })
    }

    /// Returns a dispatcher for another configured pool.
    pub fn connection(&self, name: &str) -> RedisResult<Redis> {
        Self::for_pool(Arc::clone(&self.factory), name)
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn pool_factory(&self) -> &Arc<PoolFactory> {
        &self.factory
    }

    /// The context key the pinned connection for this pool is stored under.
    pub fn context_key(&self) -> String {
        format!("redis.connection.{}", self.pool_name)
    }

    pub fn should_use_same_connection(name: &str) -> bool {
        SAME_CONNECTION_COMMANDS
            .iter()
            .any(|command| command.eq_ignore_ascii_case(name))
    }

    /// The connection currently pinned to this unit of work for this pool, if any.
    pub fn pinned_connection(&self) -> Option<RedisConnection> {
        context::get::<RedisConnection>(&self.context_key())
    }

    /// Issues any command by name.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> RedisResult<Value> {
        self.dispatch(name, args, |connection, args| async move {
            connection.call(name, args).await
        })
        .await
    }

    /// Walks the keyspace. `arguments` is `(pattern, count)` or `{match, count}`.
    pub async fn scan(&self, cursor: &mut u64, arguments: Vec<Value>) -> RedisResult<Value> {
        self.scan_with(ScanKind::Scan, None, cursor, arguments).await
    }

    pub async fn hscan(
        &self,
        key: impl Into<Value>,
        cursor: &mut u64,
        arguments: Vec<Value>,
    ) -> RedisResult<Value> {
        self.scan_with(ScanKind::Hscan, Some(key.into()), cursor, arguments)
            .await
    }

    pub async fn sscan(
        &self,
        key: impl Into<Value>,
        cursor: &mut u64,
        arguments: Vec<Value>,
    ) -> RedisResult<Value> {
        self.scan_with(ScanKind::Sscan, Some(key.into()), cursor, arguments)
            .await
    }

    pub async fn zscan(
        &self,
        key: impl Into<Value>,
        cursor: &mut u64,
        arguments: Vec<Value>,
    ) -> RedisResult<Value> {
        self.scan_with(ScanKind::Zscan, Some(key.into()), cursor, arguments)
            .await
    }

    async fn scan_with(
        &self,
        kind: ScanKind,
        key: Option<Value>,
        cursor: &mut u64,
        arguments: Vec<Value>,
    ) -> RedisResult<Value> {
        let mut reported = Vec::with_capacity(arguments.len() + 2);
        reported.extend(key.iter().cloned());
        reported.push(Value::cursor(*cursor));
        reported.extend(arguments.iter().cloned());

        let name = kind.to_string();
        self.dispatch(&name, reported, move |connection, _| async move {
            connection.scan_page(kind, key, cursor, arguments).await
        })
        .await
    }

    /// Subscribes to `channels`, blocking until the subscription ends. The callback
    /// receives `(message, channel)`.
    pub async fn subscribe<F>(&self, channels: Vec<Bytes>, callback: F) -> RedisResult<Value>
    where
        F: FnMut(Bytes, Bytes) + Send + 'static,
    {
        let reported = channels.iter().cloned().map(Value::Bytes).collect();
        self.dispatch("subscribe", reported, move |connection, _| async move {
            connection.subscribe(channels, callback).await
        })
        .await
    }

    /// Pattern variant of [`Redis::subscribe`].
    pub async fn psubscribe<F>(&self, patterns: Vec<Bytes>, callback: F) -> RedisResult<Value>
    where
        F: FnMut(Bytes, Bytes) + Send + 'static,
    {
        let reported = patterns.iter().cloned().map(Value::Bytes).collect();
        self.dispatch("psubscribe", reported, move |connection, _| async move {
            connection.psubscribe(patterns, callback).await
        })
        .await
    }

    /// Resolves a connection, runs `op` on it, reports the outcome, and applies the
    /// pin-or-release decision. An error from `op` is returned only after the
    /// connection has been dealt with.
    async fn dispatch<F, Fut>(&self, name: &str, args: Vec<Value>, op: F) -> RedisResult<Value>
    where
        F: FnOnce(RedisConnection, Vec<Value>) -> Fut,
        Fut: Future<Output = RedisResult<Value>>,
    {
        let span = info_span!("redis", command = %name, pool = %self.pool_name);

        async move {
            let key = self.context_key();
            let pinned_on_entry = context::has(&key);
            let same_connection = Self::should_use_same_connection(name);

            if !pinned_on_entry && same_connection && !context::is_active() {
                return Err(RedisError::NoContext(name.to_string()));
            }

            let lease = self.get_connection(&key, pinned_on_entry).await?;
            let Some(connection) = lease.connection().cloned() else {
                return Err(RedisError::InvalidConnection(
                    "lease holds no connection".into(),
                ));
            };
            connection.should_transform(true);

            let select_database = if name.eq_ignore_ascii_case("select") {
                args.first().cloned()
            } else {
                None
            };
            let parameters = connection
                .event_dispatcher()
                .is_some()
                .then(|| args.clone());

            let start = Instant::now();
            let outcome = op(connection.clone(), args).await;
            let time = (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;

            if let Some(events) = connection.event_dispatcher() {
                events.dispatch(CommandExecuted {
                    command: name.to_string(),
                    parameters: parameters.unwrap_or_default(),
                    time,
                    connection: connection.clone(),
                    pool: self.pool_name.clone(),
                    result: outcome.as_ref().ok().cloned(),
                    error: outcome.as_ref().err().cloned(),
                });
            }

            match lease {
                // The pin's owner releases it; leave it alone.
                Lease::Pinned(_) => {}
                Lease::Fresh(guard) if outcome.is_ok() && same_connection => {
                    // Anything truthy that is not a database index counts as 0.
                    if let Some(db) = select_database.filter(Value::is_truthy) {
                        let db = db.as_int().and_then(|db| u32::try_from(db).ok());
                        connection.set_database(db.unwrap_or(0));
                    }
                    self.pin(key, guard);
                }
                Lease::Fresh(guard) => drop(guard),
            }

            outcome
        }
        .instrument(span)
        .await
    }

    /// Returns the pinned connection, or leases a fresh one from the pool.
    async fn get_connection(&self, key: &str, pinned: bool) -> RedisResult<Lease> {
        if pinned {
            let connection = context::get::<RedisConnection>(key).ok_or_else(|| {
                RedisError::InvalidConnection(format!(
                    "context slot '{key}' does not hold a RedisConnection"
                ))
            })?;
            connection.ensure_live()?;
            return Ok(Lease::Pinned(connection));
        }

        let pool = self.factory.get_pool(&self.pool_name)?;
        Ok(Lease::Fresh(LeaseGuard::new(pool.get().await?)))
    }

    /// Stores the connection under `key` and schedules its release for the end
    /// of the current unit of work.
    fn pin(&self, key: String, guard: LeaseGuard) {
        let Some(connection) = guard.disarm() else {
            return;
        };
        if let Err(connection) = context::set(key.clone(), connection.clone()) {
            error!("No active context to pin connection #{}; releasing it.", connection.id());
            connection.release();
            return;
        }
        debug!(connection = connection.id(), "Pinned connection under '{}'.", key);

        // One queued release per key covers every later re-pin in this scope.
        let deferred_key = key.clone();
        if let Err(release) =
            context::defer_once(key, move || release_context_connection(&deferred_key))
        {
            release();
        }
    }
}

/// Clears the pin under `key` and releases its connection. A no-op if the pin is
/// already gone.
pub(crate) fn release_context_connection(key: &str) {
    if let Some(connection) = context::get::<RedisConnection>(key) {
        context::remove(key);
        connection.release();
    }
}
