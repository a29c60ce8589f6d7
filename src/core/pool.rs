// src/core/pool.rs

//! Bounded pools of native clients, one per configured pool name.
//!
//! A `RedisPool` hands out at most `max_connections` leases at a time. Acquiring
//! from an exhausted pool waits (up to `wait_timeout`) for a lease to come back.
//! Releasing never blocks: the native client goes to the back of the idle queue
//! and the lease permit is returned.

use crate::config::{PoolConfig, RedisConfig};
use crate::connection::RedisConnection;
use crate::core::client::{Connector, NativeClient};
use crate::core::errors::{RedisError, RedisResult};
use crate::core::events::EventDispatcher;
use crate::core::protocol::Value;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A native client parked in the idle queue.
struct IdleClient {
    client: Box<dyn NativeClient>,
    database: u32,
    since: Instant,
}

pub struct RedisPool {
    name: String,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    idle: Mutex<VecDeque<IdleClient>>,
    semaphore: Arc<Semaphore>,
    events: Option<Arc<dyn EventDispatcher>>,
    closed: AtomicBool,
}

impl fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPool")
            .field("name", &self.name)
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use())
            .field("max_connections", &self.config.pool.max_connections)
            .finish()
    }
}

impl RedisPool {
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        events: Option<Arc<dyn EventDispatcher>>,
    ) -> Arc<Self> {
        let max = config.pool.max_connections;
        Arc::new(Self {
            name: name.into(),
            connector,
            idle: Mutex::new(VecDeque::with_capacity(max)),
            semaphore: Arc::new(Semaphore::new(max)),
            events,
            closed: AtomicBool::new(false),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn event_dispatcher(&self) -> Option<&Arc<dyn EventDispatcher>> {
        self.events.as_ref()
    }

    /// Leases a connection, waiting up to `wait_timeout` if the pool is exhausted.
    ///
    /// The handle comes back with transformation mode off and the configured
    /// database selected.
    pub async fn get(self: &Arc<Self>) -> RedisResult<RedisConnection> {
        if self.is_closed() {
            return Err(RedisError::PoolClosed(self.name.clone()));
        }

        let started = Instant::now();
        let wait = self.config.pool.wait_timeout;
        let permit = match timeout(wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(RedisError::PoolClosed(self.name.clone())),
            Err(_) => {
                warn!(pool = %self.name, "Connection pool exhausted after {:?}", wait);
                return Err(RedisError::PoolExhausted {
                    pool: self.name.clone(),
                    waited: started.elapsed(),
                });
            }
        };

        // If anything below fails, dropping `permit` gives the lease back.
        let client = match self.take_idle() {
            Some(IdleClient {
                mut client,
                database,
                ..
            }) => {
                if database != self.config.db {
                    debug!(pool = %self.name, "Reselecting database {} on reused connection.", self.config.db);
                    select(client.as_mut(), self.config.db).await?;
                }
                client
            }
            None => self.connect(self.config.db).await?,
        };

        Ok(RedisConnection::new(
            Arc::clone(self),
            client,
            self.config.db,
            permit,
        ))
    }

    /// Opens a fresh native client and selects `database` on it.
    pub(crate) async fn connect(&self, database: u32) -> RedisResult<Box<dyn NativeClient>> {
        let limit = self.config.pool.connect_timeout;
        let mut client = match timeout(limit, self.connector.connect(&self.config)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RedisError::ConnectionLost(format!(
                    "connect to {}:{} timed out after {:?}",
                    self.config.host, self.config.port, limit
                )));
            }
        };
        if database != 0 {
            select(client.as_mut(), database).await?;
        }
        debug!(pool = %self.name, "Opened a new connection to {}:{}.", self.config.host, self.config.port);
        Ok(client)
    }

    /// Parks a native client in the idle queue. Called by the connection handle
    /// right before its lease permit is dropped.
    pub(crate) fn put_back(&self, client: Box<dyn NativeClient>, database: u32) {
        if self.is_closed() {
            debug!(pool = %self.name, "Pool is closed; discarding released connection.");
            return;
        }
        self.idle.lock().push_back(IdleClient {
            client,
            database,
            since: Instant::now(),
        });
    }

    /// Pops the oldest idle client that has not outlived `max_idle_time`.
    fn take_idle(&self) -> Option<IdleClient> {
        let max_idle = self.config.pool.max_idle_time;
        let mut idle = self.idle.lock();
        while let Some(entry) = idle.pop_front() {
            if entry.since.elapsed() <= max_idle {
                return Some(entry);
            }
            debug!(pool = %self.name, "Discarding connection idle for {:?}.", entry.since.elapsed());
        }
        None
    }

    /// Opens connections until `min_connections` are idle. Returns how many were opened.
    pub async fn warm_up(&self) -> RedisResult<usize> {
        let target = self.config.pool.min_connections;
        let mut opened = 0;
        while self.idle_count() + self.in_use() < target {
            let client = self.connect(self.config.db).await?;
            self.put_back(client, self.config.db);
            opened += 1;
        }
        if opened > 0 {
            info!(pool = %self.name, "Warmed up {} connection(s).", opened);
        }
        Ok(opened)
    }

    /// Rejects further acquires and drops every idle connection. Leased
    /// connections are discarded when they are released.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.semaphore.close();
        let dropped = {
            let mut idle = self.idle.lock();
            let n = idle.len();
            idle.clear();
            n
        };
        info!(pool = %self.name, "Pool closed; dropped {} idle connection(s).", dropped);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of leases currently handed out.
    pub fn in_use(&self) -> usize {
        self.config
            .pool
            .max_connections
            .saturating_sub(self.semaphore.available_permits())
    }
}

async fn select(client: &mut dyn NativeClient, database: u32) -> RedisResult<()> {
    client
        .call("select", vec![Value::Int(i64::from(database))])
        .await
        .map(|_| ())
}

/// Creates and caches one `RedisPool` per configured name.
pub struct PoolFactory {
    config: RedisConfig,
    connector: Arc<dyn Connector>,
    pools: DashMap<String, Arc<RedisPool>>,
    events: Option<Arc<dyn EventDispatcher>>,
}

impl PoolFactory {
    pub fn new(config: RedisConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            pools: DashMap::new(),
            events: None,
        }
    }

    /// Attaches a sink that receives a `CommandExecuted` event for every command.
    pub fn with_event_dispatcher(mut self, events: Arc<dyn EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    pub fn has_pool(&self, name: &str) -> bool {
        self.config.pools.contains_key(name)
    }

    /// Configured pool names in file order.
    pub fn pool_names(&self) -> impl Iterator<Item = &str> {
        self.config.pools.keys().map(String::as_str)
    }

    /// Returns the pool for `name`, creating it on first use.
    pub fn get_pool(&self, name: &str) -> RedisResult<Arc<RedisPool>> {
        if let Some(pool) = self.pools.get(name) {
            return Ok(Arc::clone(pool.value()));
        }
        let config = self
            .config
            .get(name)
            .cloned()
            .ok_or_else(|| RedisError::InvalidPool(name.to_string()))?;

        let pool = self
            .pools
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating connection pool '{}'.", name);
                RedisPool::new(name, config, Arc::clone(&self.connector), self.events.clone())
            })
            .clone();
        Ok(pool)
    }
}
