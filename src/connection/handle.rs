// src/connection/handle.rs

//! Defines `RedisConnection`, the handle to one leased native client.

use super::transform;
use crate::core::client::{Compression, NativeClient, Serializer};
use crate::core::errors::{RedisError, RedisResult};
use crate::core::events::EventDispatcher;
use crate::core::pool::RedisPool;
use crate::core::protocol::Value;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard, OwnedSemaphorePermit};
use tracing::{debug, error, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type ClientSlot = Option<Box<dyn NativeClient>>;

/// Exclusive access to the native client behind a connection. Other commands on
/// the same connection wait until the guard is dropped.
pub type ClientGuard = OwnedMappedMutexGuard<ClientSlot, dyn NativeClient>;

/// A leased physical connection.
///
/// Clones share the same lease. The lease goes back to the pool exactly once:
/// through [`RedisConnection::release`], or when the last clone is dropped if
/// nobody released it.
#[derive(Clone)]
pub struct RedisConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    pool: Arc<RedisPool>,
    client: Arc<AsyncMutex<ClientSlot>>,
    transform: AtomicBool,
    database: AtomicU32,
    /// `None` once the lease has been given back.
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl ConnectionInner {
    /// Returns the native client and the lease to the pool. Only the first call
    /// has any effect.
    fn give_back(&self) -> bool {
        let Some(permit) = self.permit.lock().take() else {
            return false;
        };
        self.transform.store(false, Ordering::SeqCst);

        match self.client.try_lock() {
            Ok(mut slot) => {
                if let Some(client) = slot.take() {
                    self.pool
                        .put_back(client, self.database.load(Ordering::SeqCst));
                }
            }
            Err(_) => {
                error!(
                    connection = self.id,
                    pool = %self.pool.name(),
                    "Connection released while a command was in flight; discarding it."
                );
            }
        }
        drop(permit);
        true
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if self.give_back() {
            debug!(connection = self.id, "Unreleased connection dropped; returned it to the pool.");
        }
    }
}

impl fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnection")
            .field("id", &self.inner.id)
            .field("pool", &self.inner.pool.name())
            .field("database", &self.database())
            .field("transform", &self.is_transforming())
            .field("released", &self.is_released())
            .finish()
    }
}

impl PartialEq for RedisConnection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RedisConnection {}

impl RedisConnection {
    pub(crate) fn new(
        pool: Arc<RedisPool>,
        client: Box<dyn NativeClient>,
        database: u32,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, pool = %pool.name(), "Leased connection.");
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                pool,
                client: Arc::new(AsyncMutex::new(Some(client))),
                transform: AtomicBool::new(false),
                database: AtomicU32::new(database),
                permit: Mutex::new(Some(permit)),
            }),
        }
    }

    /// A process-unique identifier, stable for the life of the lease.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn pool(&self) -> &Arc<RedisPool> {
        &self.inner.pool
    }

    pub fn pool_name(&self) -> &str {
        self.inner.pool.name()
    }

    pub fn event_dispatcher(&self) -> Option<&Arc<dyn EventDispatcher>> {
        self.inner.pool.event_dispatcher()
    }

    /// Turns portable-to-native translation on or off for subsequent calls.
    pub fn should_transform(&self, enabled: bool) -> &Self {
        self.inner.transform.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn is_transforming(&self) -> bool {
        self.inner.transform.load(Ordering::SeqCst)
    }

    /// Records the database this connection has switched to. The database is
    /// reselected after a reconnect, and reset when the pool hands it out again.
    pub fn set_database(&self, database: u32) {
        self.inner.database.store(database, Ordering::SeqCst);
    }

    pub fn database(&self) -> u32 {
        self.inner.database.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.inner.permit.lock().is_none()
    }

    /// Returns the connection to its pool. Returns `false` if it was already released.
    pub fn release(&self) -> bool {
        let released = self.inner.give_back();
        if released {
            debug!(connection = self.id(), pool = %self.pool_name(), "Released connection.");
        } else {
            debug!(connection = self.id(), "Connection was already released.");
        }
        released
    }

    pub(crate) fn ensure_live(&self) -> RedisResult<()> {
        if self.is_released() {
            return Err(RedisError::InvalidConnection(format!(
                "connection #{} has already been released",
                self.id()
            )));
        }
        Ok(())
    }

    /// Calls a command through the portable surface. With transformation on, a
    /// registered handler reshapes arguments and reply; anything else passes
    /// through to the native client verbatim.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> RedisResult<Value> {
        self.ensure_live()?;
        if self.is_transforming()
            && let Some(handler) = transform::handler(name)
        {
            return self
                .with_retry(name, move |client| handler(client, args.clone()))
                .await;
        }
        self.call_native(name, args).await
    }

    /// Calls a command on the native client verbatim, regardless of the transform flag.
    pub async fn call_native(&self, name: &str, args: Vec<Value>) -> RedisResult<Value> {
        self.ensure_live()?;
        let method = name.to_string();
        self.with_retry(name, move |client| {
            let method = method.clone();
            let args = args.clone();
            Box::pin(async move { client.call(&method, args).await })
        })
        .await
    }

    /// Sends a command to the native client exactly once. Used for commands queued
    /// inside a batch, where a reissue on a fresh link would lose the batch.
    pub async fn call_once(&self, name: &str, args: Vec<Value>) -> RedisResult<Value> {
        let mut client = self.client().await?;
        client.call(name, args).await
    }

    /// Runs `op` against the native client. A connection error is retried on a
    /// fresh link (with the current database reselected) while attempts remain.
    pub(crate) async fn with_retry<T, F>(&self, command: &str, mut op: F) -> RedisResult<T>
    where
        F: for<'c> FnMut(&'c mut dyn NativeClient) -> BoxFuture<'c, RedisResult<T>>,
    {
        let retry = self.inner.pool.config().retry;
        let mut remaining = retry.attempts;
        let mut slot = self.lock_slot().await?;

        loop {
            let err = {
                let client: &mut dyn NativeClient = match slot.as_deref_mut() {
                    Some(client) => client,
                    None => return Err(self.released_error()),
                };
                match op(client).await {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                }
            };

            if !err.is_connection_error() || remaining == 0 {
                return Err(err);
            }
            remaining -= 1;
            warn!(
                connection = self.id(),
                command,
                "Connection error: {}. Reconnecting, {} attempt(s) left.",
                err,
                remaining
            );
            if !retry.interval.is_zero() {
                tokio::time::sleep(retry.interval).await;
            }
            match self.inner.pool.connect(self.database()).await {
                Ok(fresh) => *slot = Some(fresh),
                Err(reconnect_err) => {
                    warn!(connection = self.id(), "Reconnect failed: {}", reconnect_err);
                    return Err(err);
                }
            }
        }
    }

    async fn lock_slot(&self) -> RedisResult<OwnedMutexGuard<ClientSlot>> {
        self.ensure_live()?;
        let slot = Arc::clone(&self.inner.client).lock_owned().await;
        // The lease may have been given back while this call waited for the lock.
        self.ensure_live()?;
        Ok(slot)
    }

    fn released_error(&self) -> RedisError {
        RedisError::InvalidConnection(format!("connection #{} has no native client", self.id()))
    }

    /// Exclusive access to the underlying native client.
    pub async fn client(&self) -> RedisResult<ClientGuard> {
        let slot = self.lock_slot().await?;
        OwnedMutexGuard::try_map(slot, |slot| slot.as_deref_mut())
            .map_err(|_| self.released_error())
    }

    /// Whether a value serializer other than `None` is configured.
    pub async fn serialized(&self) -> RedisResult<bool> {
        Ok(self.client().await?.serializer() != Serializer::None)
    }

    pub async fn serializer(&self) -> RedisResult<Serializer> {
        Ok(self.client().await?.serializer())
    }

    /// Whether any compression scheme is configured.
    pub async fn compressed(&self) -> RedisResult<bool> {
        Ok(self.compression().await? != Compression::None)
    }

    pub async fn compression(&self) -> RedisResult<Compression> {
        Ok(self.client().await?.compression())
    }

    pub async fn lzf_compressed(&self) -> RedisResult<bool> {
        Ok(self.compression().await? == Compression::Lzf)
    }

    pub async fn zstd_compressed(&self) -> RedisResult<bool> {
        Ok(self.compression().await? == Compression::Zstd)
    }

    pub async fn lz4_compressed(&self) -> RedisResult<bool> {
        Ok(self.compression().await? == Compression::Lz4)
    }

    /// Serializes each element of `values` the way the native client would, for
    /// use as script arguments. Map keys are preserved; empty input is returned as is.
    pub async fn pack(&self, values: Value) -> RedisResult<Value> {
        let client = self.client().await?;
        match values {
            Value::Array(items) => items
                .iter()
                .map(|item| client.pack(item).map(Value::Bytes))
                .collect::<RedisResult<Vec<_>>>()
                .map(Value::Array),
            Value::Map(entries) => {
                let mut packed = indexmap::IndexMap::with_capacity(entries.len());
                for (key, value) in &entries {
                    packed.insert(key.clone(), Value::Bytes(client.pack(value)?));
                }
                Ok(Value::Map(packed))
            }
            Value::Nil => Ok(Value::Nil),
            scalar => Ok(Value::Bytes(client.pack(&scalar)?)),
        }
    }
}
