// src/config.rs

//! Manages pool configuration: loading from TOML and validation.
//!
//! A configuration file holds one table per named pool:
//!
//! ```toml
//! [default]
//! host = "127.0.0.1"
//! port = 6379
//! timeout = "2s"
//!
//! [default.pool]
//! max_connections = 32
//! wait_timeout = "3s"
//! ```

use crate::core::client::{Compression, Serializer};
use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// The name of the pool used when the caller does not pick one.
pub const DEFAULT_POOL: &str = "default";

/// Settings for every configured pool, keyed by pool name in file order.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct RedisConfig {
    pub pools: IndexMap<String, PoolConfig>,
}

/// Connection and pooling settings for one named pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoolConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: Option<String>,
    /// The database selected right after connecting.
    #[serde(default)]
    pub db: u32,
    /// Connect timeout of the physical link.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Read timeout of the physical link; absent means unbounded.
    #[serde(default, with = "humantime_serde")]
    pub read_timeout: Option<Duration>,
    #[serde(default)]
    pub options: ClientOptions,
    #[serde(default)]
    pub pool: PoolOptions,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: None,
            db: 0,
            timeout: default_timeout(),
            read_timeout: None,
            options: ClientOptions::default(),
            pool: PoolOptions::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Options applied to each native client when it is created.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    #[serde(default)]
    pub serializer: Serializer,
    #[serde(default)]
    pub compression: Compression,
    /// A key prefix the native client applies to every key.
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// How long an acquire may block on an exhausted pool.
    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_timeout: Duration,
    /// Idle connections older than this are discarded instead of reused.
    #[serde(default = "default_max_idle_time", with = "humantime_serde")]
    pub max_idle_time: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
            wait_timeout: default_wait_timeout(),
            max_idle_time: default_max_idle_time(),
        }
    }
}

/// How a connection reacts to a failed link. Only connection errors are retried.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of reconnect-and-reissue attempts after the first failure.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default, with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            interval: Duration::ZERO,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    6379
}
fn default_timeout() -> Duration {
    Duration::ZERO
}
fn default_min_connections() -> usize {
    1
}
fn default_max_connections() -> usize {
    10
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_wait_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_max_idle_time() -> Duration {
    Duration::from_secs(60)
}
fn default_retry_attempts() -> u32 {
    1
}

impl RedisConfig {
    /// A configuration with a single pool under the default name.
    pub fn single(pool: PoolConfig) -> Self {
        let mut pools = IndexMap::new();
        pools.insert(DEFAULT_POOL.to_string(), pool);
        Self { pools }
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{}'", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: RedisConfig =
            toml::from_str(contents).context("Failed to parse TOML pool configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn get(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.get(name)
    }

    /// Validates every pool to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.pools.is_empty() {
            return Err(anyhow!("at least one pool must be configured"));
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .with_context(|| format!("invalid settings for pool '{name}'"))?;
        }
        Ok(())
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.pool.max_connections == 0 {
            return Err(anyhow!("pool.max_connections cannot be 0"));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(anyhow!(
                "pool.min_connections ({}) cannot exceed pool.max_connections ({})",
                self.pool.min_connections,
                self.pool.max_connections
            ));
        }
        if self.pool.wait_timeout.is_zero() {
            warn!("pool.wait_timeout is 0; acquiring from an exhausted pool will fail immediately");
        }
        Ok(())
    }
}
