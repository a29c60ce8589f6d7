// src/core/client.rs

//! The boundary to the physical store client.
//!
//! `NativeClient` is the method surface of one physical connection. Its typed
//! methods carry the native calling conventions (argument order, option shapes,
//! the `false` sentinel for missing keys) that the translation layer adapts to.
//! Every typed method has a default lowering onto `call`, which sends a command
//! name plus flat arguments, so an implementor only has to provide the transport.
//! `Connector` creates native clients for a pool.

use crate::config::PoolConfig;
use crate::core::errors::{RedisError, RedisResult};
use crate::core::protocol::{SetOptions, Value};
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// The value serializer configured on a native client.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Serializer {
    #[default]
    None,
    Json,
    Msgpack,
    Igbinary,
}

/// The value compression scheme configured on a native client.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Compression {
    #[default]
    None,
    Lzf,
    Zstd,
    Lz4,
}

/// Which member of the cursor-based scan family is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScanKind {
    Scan,
    Hscan,
    Sscan,
    Zscan,
}

impl ScanKind {
    /// `HSCAN` and `ZSCAN` pages are field/score maps; the others are plain lists.
    pub fn pages_are_maps(self) -> bool {
        matches!(self, ScanKind::Hscan | ScanKind::Zscan)
    }
}

/// A message pushed by the store to a subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    /// The matching pattern, present only for pattern subscriptions.
    pub pattern: Option<Bytes>,
    pub channel: Bytes,
    pub payload: Bytes,
}

/// The callback shape the native client invokes for every pushed message.
pub type NativeSubscriber = Box<dyn FnMut(PushMessage) + Send>;

/// The method surface of one physical connection.
#[async_trait]
pub trait NativeClient: Send {
    /// Sends `method` with flat `args` and returns the reply in native conventions:
    /// a missing key is reported as `Value::Bool(false)`, error replies as `Err`.
    async fn call(&mut self, method: &str, args: Vec<Value>) -> RedisResult<Value>;

    /// Blocks for the life of the subscription, invoking `callback` per message.
    async fn subscribe(
        &mut self,
        channels: Vec<Bytes>,
        callback: NativeSubscriber,
    ) -> RedisResult<Value>;

    /// Pattern variant of [`NativeClient::subscribe`].
    async fn psubscribe(
        &mut self,
        patterns: Vec<Bytes>,
        callback: NativeSubscriber,
    ) -> RedisResult<Value>;

    /// The read timeout of the link; `None` means unbounded.
    fn read_timeout(&self) -> Option<Duration>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>);

    fn serializer(&self) -> Serializer {
        Serializer::None
    }

    fn compression(&self) -> Compression {
        Compression::None
    }

    /// Serializes and compresses one value the way the client would before writing it.
    fn pack(&self, value: &Value) -> RedisResult<Bytes> {
        value
            .to_bytes()
            .ok_or_else(|| RedisError::InvalidArgument(format!("cannot pack {value:?}")))
    }

    async fn get(&mut self, key: Value) -> RedisResult<Value> {
        self.call("get", vec![key]).await
    }

    /// Each missing key comes back as `false` in its position.
    async fn mget(&mut self, keys: Vec<Value>) -> RedisResult<Vec<Value>> {
        Ok(self.call("mget", keys).await?.into_list())
    }

    async fn set(
        &mut self,
        key: Value,
        value: Value,
        options: Option<SetOptions>,
    ) -> RedisResult<Value> {
        let mut args = vec![key, value];
        if let Some(options) = options {
            if let Some(flag) = options.flag {
                args.push(flag.as_ref().into());
            }
            let (resolution, ttl) = options.expire;
            args.push(resolution.as_ref().into());
            args.push(ttl.into());
        }
        self.call("set", args).await
    }

    async fn setnx(&mut self, key: Value, value: Value) -> RedisResult<bool> {
        Ok(self.call("setnx", vec![key, value]).await?.is_truthy())
    }

    /// Returns a field-keyed map; missing fields map to `false`.
    async fn hmget(&mut self, key: Value, fields: Vec<Value>) -> RedisResult<IndexMap<Bytes, Value>> {
        let mut args = Vec::with_capacity(fields.len() + 1);
        args.push(key);
        args.extend(fields.iter().cloned());
        let values = self.call("hmget", args).await?.into_list();

        let mut result = IndexMap::with_capacity(fields.len());
        for (field, value) in fields.iter().zip(values) {
            let field = field
                .to_bytes()
                .ok_or_else(|| RedisError::InvalidArgument("hash field must be a string".into()))?;
            result.insert(field, value);
        }
        Ok(result)
    }

    async fn hmset(&mut self, key: Value, entries: IndexMap<Bytes, Value>) -> RedisResult<Value> {
        let mut args = Vec::with_capacity(entries.len() * 2 + 1);
        args.push(key);
        for (field, value) in entries {
            args.push(Value::Bytes(field));
            args.push(value);
        }
        self.call("hmset", args).await
    }

    async fn hsetnx(&mut self, key: Value, field: Value, value: Value) -> RedisResult<bool> {
        Ok(self.call("hsetnx", vec![key, field, value]).await?.is_truthy())
    }

    /// Note the native order: the element comes before the count.
    async fn lrem(&mut self, key: Value, value: Value, count: Value) -> RedisResult<Value> {
        self.call("lrem", vec![key, count, value]).await
    }

    async fn blpop(&mut self, args: Vec<Value>) -> RedisResult<Value> {
        self.call("blpop", flatten(args)).await
    }

    async fn brpop(&mut self, args: Vec<Value>) -> RedisResult<Value> {
        self.call("brpop", flatten(args)).await
    }

    async fn spop(&mut self, key: Value, count: Value) -> RedisResult<Value> {
        self.call("spop", vec![key, count]).await
    }

    /// `options` are bare flags (`NX`, `CH`, ...); `pairs` alternate score, member.
    async fn zadd(
        &mut self,
        key: Value,
        options: Vec<Value>,
        pairs: Vec<Value>,
    ) -> RedisResult<Value> {
        let mut args = Vec::with_capacity(options.len() + pairs.len() + 1);
        args.push(key);
        args.extend(options);
        args.extend(pairs);
        self.call("zadd", args).await
    }

    /// `options` may hold `withscores` and a `limit` of `[offset, count]`.
    async fn zrangebyscore(
        &mut self,
        key: Value,
        min: Value,
        max: Value,
        options: IndexMap<Bytes, Value>,
    ) -> RedisResult<Value> {
        let args = range_args(key, min, max, options);
        self.call("zrangebyscore", args).await
    }

    async fn zrevrangebyscore(
        &mut self,
        key: Value,
        max: Value,
        min: Value,
        options: IndexMap<Bytes, Value>,
    ) -> RedisResult<Value> {
        let args = range_args(key, max, min, options);
        self.call("zrevrangebyscore", args).await
    }

    async fn zinterstore(
        &mut self,
        output: Value,
        keys: Vec<Value>,
        weights: Option<Vec<Value>>,
        aggregate: Value,
    ) -> RedisResult<Value> {
        let args = store_args(output, keys, weights, aggregate);
        self.call("zinterstore", args).await
    }

    async fn zunionstore(
        &mut self,
        output: Value,
        keys: Vec<Value>,
        weights: Option<Vec<Value>>,
        aggregate: Value,
    ) -> RedisResult<Value> {
        let args = store_args(output, keys, weights, aggregate);
        self.call("zunionstore", args).await
    }

    /// `None` flushes with the server default mode.
    async fn flushdb(&mut self, asynchronous: Option<bool>) -> RedisResult<Value> {
        let args = match asynchronous {
            Some(true) => vec!["ASYNC".into()],
            Some(false) => vec!["SYNC".into()],
            None => vec![],
        };
        self.call("flushdb", args).await
    }

    /// Native order: script, then the combined keys+argv list, then the key count.
    async fn eval(&mut self, script: Value, args: Vec<Value>, num_keys: Value) -> RedisResult<Value> {
        let mut wire = vec![script, num_keys];
        wire.extend(args);
        self.call("eval", wire).await
    }

    async fn evalsha(&mut self, sha: Value, args: Vec<Value>, num_keys: Value) -> RedisResult<Value> {
        let mut wire = vec![sha, num_keys];
        wire.extend(args);
        self.call("evalsha", wire).await
    }

    async fn script(&mut self, subcommand: &str, args: Vec<Value>) -> RedisResult<Value> {
        let mut wire = vec![Value::from(subcommand)];
        wire.extend(args);
        self.call("script", wire).await
    }

    /// The first element names the command; the rest are its arguments.
    async fn raw_command(&mut self, mut args: Vec<Value>) -> RedisResult<Value> {
        if args.is_empty() {
            return Err(RedisError::WrongArgumentCount("rawcommand".into()));
        }
        let name = args.remove(0);
        let name = name
            .as_str()
            .ok_or_else(|| RedisError::InvalidArgument("raw command name must be a string".into()))?
            .to_string();
        self.call(&name, args).await
    }

    /// One page of a cursor scan. `cursor` is updated in place; the page is returned,
    /// or `false` when the store has nothing to report.
    async fn scan(
        &mut self,
        kind: ScanKind,
        key: Option<Value>,
        cursor: &mut u64,
        pattern: Option<Bytes>,
        count: Option<i64>,
    ) -> RedisResult<Value> {
        let mut args = Vec::with_capacity(6);
        args.extend(key);
        args.push(Value::cursor(*cursor));
        if let Some(pattern) = pattern {
            args.push("MATCH".into());
            args.push(Value::Bytes(pattern));
        }
        if let Some(count) = count {
            args.push("COUNT".into());
            args.push(Value::Int(count));
        }

        let mut reply = match self.call(&kind.to_string(), args).await? {
            Value::Array(reply) if reply.len() == 2 => reply,
            Value::Bool(false) | Value::Nil => return Ok(Value::Bool(false)),
            other => {
                return Err(RedisError::Internal(format!(
                    "unexpected {kind} reply: {other:?}"
                )));
            }
        };
        let page = reply.pop().unwrap_or(Value::Nil);
        *cursor = reply
            .pop()
            .and_then(|c| c.as_cursor())
            .ok_or(RedisError::NotAnInteger)?;

        if !kind.pages_are_maps() {
            return Ok(page);
        }
        let mut entries = IndexMap::new();
        let mut items = page.into_list().into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            if let Some(field) = field.to_bytes() {
                entries.insert(field, value);
            }
        }
        Ok(Value::Map(entries))
    }
}

/// Creates native clients for a pool, applying the pool's connection settings.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &PoolConfig) -> RedisResult<Box<dyn NativeClient>>;
}

fn flatten(args: Vec<Value>) -> Vec<Value> {
    args.into_iter().flat_map(Value::into_list).collect()
}

fn range_args(key: Value, from: Value, to: Value, options: IndexMap<Bytes, Value>) -> Vec<Value> {
    let mut args = vec![key, from, to];
    if options.get(&b"withscores"[..]).is_some_and(Value::is_truthy) {
        args.push("WITHSCORES".into());
    }
    if let Some(limit) = options.get(&b"limit"[..]) {
        args.push("LIMIT".into());
        args.extend(limit.clone().into_list());
    }
    args
}

fn store_args(
    output: Value,
    keys: Vec<Value>,
    weights: Option<Vec<Value>>,
    aggregate: Value,
) -> Vec<Value> {
    let mut args = vec![output, Value::Int(keys.len() as i64)];
    args.extend(keys);
    if let Some(weights) = weights {
        args.push("WEIGHTS".into());
        args.extend(weights);
    }
    args.push("AGGREGATE".into());
    args.push(aggregate);
    args
}
