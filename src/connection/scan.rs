// src/connection/scan.rs

//! The cursor-based scan family on a single connection.

use super::handle::RedisConnection;
use crate::core::client::ScanKind;
use crate::core::errors::RedisResult;
use crate::core::protocol::{ScanOptions, Value};
use bytes::Bytes;
use indexmap::IndexMap;

impl RedisConnection {
    /// Fetches one page of a `SCAN`/`HSCAN`/`SSCAN`/`ZSCAN` walk. `key` is required
    /// for every kind except `Scan`. `cursor` is updated in place.
    ///
    /// With transformation on, `arguments` is either a `{match, count}` map or a
    /// positional `(pattern, count)` pair defaulting to `("*", 10)`, and the reply
    /// is `false` once the walk is complete, else `[cursor, page]`. With
    /// transformation off the native page is returned as is.
    pub async fn scan_page(
        &self,
        kind: ScanKind,
        key: Option<Value>,
        cursor: &mut u64,
        arguments: Vec<Value>,
    ) -> RedisResult<Value> {
        self.ensure_live()?;
        let transform = self.is_transforming();

        let (pattern, count) = if transform {
            let options = ScanOptions::from_arguments(&arguments)?;
            (Some(options.pattern), Some(options.count))
        } else {
            let pattern = arguments.first().and_then(Value::to_bytes);
            let count = arguments.get(1).and_then(Value::as_int);
            (pattern, count)
        };

        let start = *cursor;
        let (next, page) = self
            .with_retry(&kind.to_string(), move |client| {
                let key = key.clone();
                let pattern = pattern.clone();
                Box::pin(async move {
                    let mut cursor = start;
                    let page = client.scan(kind, key, &mut cursor, pattern, count).await?;
                    Ok((cursor, page))
                })
            })
            .await?;
        *cursor = next;

        if !transform {
            return Ok(page);
        }

        let page = match page {
            Value::Bool(false) | Value::Nil => empty_page(kind),
            page => page,
        };
        // A walk only ends when the cursor is back at zero with nothing left.
        // An empty page at a nonzero cursor is a normal intermediate step.
        if next == 0 && page.is_empty_reply() {
            return Ok(Value::Bool(false));
        }
        Ok(Value::Array(vec![Value::cursor(next), page]))
    }
}

fn empty_page(kind: ScanKind) -> Value {
    if kind.pages_are_maps() {
        Value::Map(IndexMap::<Bytes, Value>::new())
    } else {
        Value::Array(Vec::new())
    }
}
