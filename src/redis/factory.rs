// src/redis/factory.rs

//! One dispatcher per configured pool, created up front.

use super::Redis;
use crate::core::errors::{RedisError, RedisResult};
use crate::core::pool::PoolFactory;
use indexmap::IndexMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct RedisFactory {
    proxies: IndexMap<String, Redis>,
}

impl RedisFactory {
    pub fn new(pools: Arc<PoolFactory>) -> Self {
        let proxies = pools
            .pool_names()
            .map(|name| {
                let proxy = Redis {
                    factory: Arc::clone(&pools),
                    pool_name: name.to_string(),
                };
                (name.to_string(), proxy)
            })
            .collect();
        Self { proxies }
    }

    /// The dispatcher for `name`. Fails with `InvalidProxy` for unconfigured names.
    pub fn get(&self, name: &str) -> RedisResult<&Redis> {
        self.proxies
            .get(name)
            .ok_or_else(|| RedisError::InvalidProxy(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.proxies.keys().map(String::as_str)
    }
}
