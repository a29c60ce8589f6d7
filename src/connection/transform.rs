// src/connection/transform.rs

//! The registry of portable-to-native command translations.
//!
//! Each handler takes the portable argument list, reshapes it into the native
//! client's calling convention, and normalizes the reply. The registry is built
//! once, keyed by lowercase command name; commands without a handler are passed
//! to the native client verbatim.

use crate::core::client::NativeClient;
use crate::core::errors::{RedisError, RedisResult};
use crate::core::protocol::{SetOptions, Value};
use bytes::Bytes;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A translation routine. The returned future borrows the native client only.
pub type Handler =
    for<'c> fn(&'c mut dyn NativeClient, Vec<Value>) -> BoxFuture<'c, RedisResult<Value>>;

/// `zadd` flags recognized in the leading positional slots.
const ZADD_FLAGS: [&str; 6] = ["nx", "xx", "ch", "incr", "gt", "lt"];

static HANDLERS: Lazy<HashMap<&'static str, Handler>> = Lazy::new(|| {
    let entries: [(&'static str, Handler); 20] = [
        ("get", get),
        ("mget", mget),
        ("set", set),
        ("setnx", setnx),
        ("hmget", hmget),
        ("hmset", hmset),
        ("hsetnx", hsetnx),
        ("lrem", lrem),
        ("blpop", blpop),
        ("brpop", brpop),
        ("spop", spop),
        ("zadd", zadd),
        ("zrangebyscore", zrangebyscore),
        ("zrevrangebyscore", zrevrangebyscore),
        ("zinterstore", zinterstore),
        ("zunionstore", zunionstore),
        ("flushdb", flushdb),
        ("eval", eval),
        ("evalsha", evalsha),
        ("executeraw", execute_raw),
    ];
    entries.into_iter().collect()
});

/// Looks up the handler for `name`, ignoring ASCII case.
pub fn handler(name: &str) -> Option<Handler> {
    HANDLERS.get(name.to_ascii_lowercase().as_str()).copied()
}

pub fn is_transformed(name: &str) -> bool {
    handler(name).is_some()
}

/// Names of every command with a registered translation.
pub fn transformed_commands() -> impl Iterator<Item = &'static str> {
    HANDLERS.keys().copied()
}

/// Walks a portable argument list front to back.
struct Args {
    command: &'static str,
    items: std::vec::IntoIter<Value>,
}

impl Args {
    fn new(command: &'static str, args: Vec<Value>) -> Self {
        Self {
            command,
            items: args.into_iter(),
        }
    }

    fn required(&mut self) -> RedisResult<Value> {
        self.items
            .next()
            .ok_or_else(|| RedisError::WrongArgumentCount(self.command.to_string()))
    }

    /// The next argument, with an explicit `Nil` treated as absent.
    fn optional(&mut self) -> Option<Value> {
        self.items.next().filter(|value| !value.is_nil())
    }

    fn rest(self) -> Vec<Value> {
        self.items.collect()
    }
}

fn null_if_false(value: Value) -> Value {
    if value.is_false() { Value::Nil } else { value }
}

fn bool_to_int(value: bool) -> Value {
    Value::Int(i64::from(value))
}

/// A lone list argument stands for the whole variadic tail.
fn unwrap_single_list(mut rest: Vec<Value>) -> Vec<Value> {
    if rest.len() == 1 && matches!(rest[0], Value::Array(_)) {
        rest.remove(0).into_list()
    } else {
        rest
    }
}

/// Reads an options argument: a map, or nothing. An empty list counts as nothing.
fn options_map(command: &str, value: Option<Value>) -> RedisResult<IndexMap<Bytes, Value>> {
    match value {
        None => Ok(IndexMap::new()),
        Some(Value::Map(options)) => Ok(options),
        Some(Value::Array(items)) if items.is_empty() => Ok(IndexMap::new()),
        Some(other) => Err(RedisError::InvalidArgument(format!(
            "{command} options must be a map, got {other:?}"
        ))),
    }
}

fn field_name(value: &Value) -> RedisResult<Bytes> {
    value
        .to_bytes()
        .ok_or_else(|| RedisError::InvalidArgument(format!("invalid field name: {value:?}")))
}

fn get(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let key = Args::new("get", args).required()?;
        Ok(null_if_false(client.get(key).await?))
    })
}

fn mget(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let keys = unwrap_single_list(args);
        if keys.is_empty() {
            return Err(RedisError::WrongArgumentCount("mget".into()));
        }
        let values = client.mget(keys).await?;
        Ok(Value::Array(values.into_iter().map(null_if_false).collect()))
    })
}

fn set(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("set", args);
        let key = args.required()?;
        let value = args.required()?;
        let resolution = args.optional();
        let ttl = args.optional().unwrap_or(Value::Nil);
        let flag = args.optional().unwrap_or(Value::Nil);

        let options = match resolution {
            Some(resolution) if resolution.is_truthy() => {
                Some(SetOptions::from_portable(&resolution, &ttl, &flag)?)
            }
            _ => None,
        };
        client.set(key, value, options).await
    })
}

fn setnx(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("setnx", args);
        let key = args.required()?;
        let value = args.required()?;
        Ok(bool_to_int(client.setnx(key, value).await?))
    })
}

fn hmget(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("hmget", args);
        let key = args.required()?;
        let fields = unwrap_single_list(args.rest());
        if fields.is_empty() {
            return Err(RedisError::WrongArgumentCount("hmget".into()));
        }
        let values = client.hmget(key, fields).await?;
        Ok(Value::Array(values.into_values().collect()))
    })
}

fn hmset(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("hmset", args);
        let key = args.required()?;
        let mut rest = args.rest();

        let entries = if let [Value::Map(entries)] = rest.as_mut_slice() {
            std::mem::take(entries)
        } else {
            let flat = unwrap_single_list(rest);
            if flat.is_empty() || flat.len() % 2 != 0 {
                return Err(RedisError::InvalidArgument(
                    "hmset expects field/value pairs".into(),
                ));
            }
            let mut entries = IndexMap::with_capacity(flat.len() / 2);
            let mut items = flat.into_iter();
            while let (Some(field), Some(value)) = (items.next(), items.next()) {
                entries.insert(field_name(&field)?, value);
            }
            entries
        };
        client.hmset(key, entries).await
    })
}

fn hsetnx(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("hsetnx", args);
        let hash = args.required()?;
        let field = args.required()?;
        let value = args.required()?;
        Ok(bool_to_int(client.hsetnx(hash, field, value).await?))
    })
}

fn lrem(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("lrem", args);
        let key = args.required()?;
        let count = args.required()?;
        let value = args.required()?;
        client.lrem(key, value, count).await
    })
}

fn blpop(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let result = client.blpop(args).await?;
        Ok(if result.is_empty_reply() { Value::Nil } else { result })
    })
}

fn brpop(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let result = client.brpop(args).await?;
        Ok(if result.is_empty_reply() { Value::Nil } else { result })
    })
}

fn spop(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("spop", args);
        let key = args.required()?;
        let count = args.items.next().unwrap_or(Value::Int(1));
        client.spop(key, count).await
    })
}

/// Splits a portable `zadd` tail into native `(options, score/member pairs)`.
pub fn zadd_arguments(mut dictionary: Vec<Value>) -> (Vec<Value>, Vec<Value>) {
    if matches!(dictionary.last(), Some(Value::Map(_))) {
        if let Some(Value::Map(members)) = dictionary.pop() {
            for (member, score) in members {
                dictionary.push(score);
                dictionary.push(Value::Bytes(member));
            }
        }
    }

    let mut options = Vec::new();
    let mut pairs = Vec::with_capacity(dictionary.len());
    for (position, value) in dictionary.into_iter().enumerate() {
        let is_flag = position < 3
            && matches!(value, Value::Bytes(_))
            && ZADD_FLAGS.iter().any(|flag| value.eq_ignore_case(flag));
        if is_flag {
            options.push(value);
        } else {
            pairs.push(value);
        }
    }
    (options, pairs)
}

fn zadd(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("zadd", args);
        let key = args.required()?;
        let (options, pairs) = zadd_arguments(args.rest());
        if pairs.is_empty() {
            return Err(RedisError::WrongArgumentCount("zadd".into()));
        }
        client.zadd(key, options, pairs).await
    })
}

/// Converts a `{offset, count}` limit into the `[offset, count]` pair the native
/// client expects. List limits are left alone.
fn normalize_limit(options: &mut IndexMap<Bytes, Value>) -> RedisResult<()> {
    if let Some(Value::Map(limit)) = options.get(&b"limit"[..]) {
        let offset = limit.get(&b"offset"[..]).cloned();
        let count = limit.get(&b"count"[..]).cloned();
        let (Some(offset), Some(count)) = (offset, count) else {
            return Err(RedisError::InvalidArgument(
                "limit requires both offset and count".into(),
            ));
        };
        options.insert(
            Bytes::from_static(b"limit"),
            Value::Array(vec![offset, count]),
        );
    }
    Ok(())
}

fn zrangebyscore(
    client: &mut dyn NativeClient,
    args: Vec<Value>,
) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("zrangebyscore", args);
        let key = args.required()?;
        let min = args.required()?;
        let max = args.required()?;
        let mut options = options_map("zrangebyscore", args.optional())?;
        normalize_limit(&mut options)?;
        client.zrangebyscore(key, min, max, options).await
    })
}

fn zrevrangebyscore(
    client: &mut dyn NativeClient,
    args: Vec<Value>,
) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("zrevrangebyscore", args);
        let key = args.required()?;
        let max = args.required()?;
        let min = args.required()?;
        let mut options = options_map("zrevrangebyscore", args.optional())?;
        normalize_limit(&mut options)?;
        client.zrevrangebyscore(key, max, min, options).await
    })
}

/// Reads `(output, keys, {weights, aggregate})` for the sorted-set store commands.
fn store_arguments(
    command: &'static str,
    args: Vec<Value>,
) -> RedisResult<(Value, Vec<Value>, Option<Vec<Value>>, Value)> {
    let mut args = Args::new(command, args);
    let output = args.required()?;
    let keys = args.required()?.into_list();
    let options = options_map(command, args.optional())?;
    let weights = options.get(&b"weights"[..]).cloned().map(Value::into_list);
    let aggregate = options
        .get(&b"aggregate"[..])
        .cloned()
        .unwrap_or_else(|| Value::from("sum"));
    Ok((output, keys, weights, aggregate))
}

fn zinterstore(
    client: &mut dyn NativeClient,
    args: Vec<Value>,
) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let (output, keys, weights, aggregate) = store_arguments("zinterstore", args)?;
        client.zinterstore(output, keys, weights, aggregate).await
    })
}

fn zunionstore(
    client: &mut dyn NativeClient,
    args: Vec<Value>,
) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let (output, keys, weights, aggregate) = store_arguments("zunionstore", args)?;
        client.zunionstore(output, keys, weights, aggregate).await
    })
}

fn flushdb(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let asynchronous = args.first().is_some_and(|mode| mode.eq_ignore_case("ASYNC"));
        client.flushdb(asynchronous.then_some(true)).await
    })
}

fn eval(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("eval", args);
        let script = args.required()?;
        let num_keys = args.required()?;
        client.eval(script, args.rest(), num_keys).await
    })
}

fn evalsha(client: &mut dyn NativeClient, args: Vec<Value>) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move {
        let mut args = Args::new("evalsha", args);
        let script = args.required()?;
        let num_keys = args.required()?;
        let sha = client.script("load", vec![script]).await?;
        client.evalsha(sha, args.rest(), num_keys).await
    })
}

fn execute_raw(
    client: &mut dyn NativeClient,
    args: Vec<Value>,
) -> BoxFuture<'_, RedisResult<Value>> {
    Box::pin(async move { client.raw_command(unwrap_single_list(args)).await })
}
