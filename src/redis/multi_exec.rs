// src/redis/multi_exec.rs

//! Pipelines and transactions on a pinned connection.

use super::{Redis, release_context_connection};
use crate::connection::RedisConnection;
use crate::core::context;
use crate::core::errors::{RedisError, RedisResult};
use crate::core::protocol::Value;
use std::future::Future;
use strum_macros::{AsRefStr, Display};
use tracing::{debug, warn};

/// The two batch flavours and the command that starts each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum BatchMode {
    #[strum(serialize = "pipeline")]
    Pipeline,
    #[strum(serialize = "multi")]
    Transaction,
}

/// A connection in batch mode. Commands queued on it go straight to the native
/// client; they are not reported as events and not retried.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    connection: RedisConnection,
    mode: BatchMode,
    reply: Value,
}

impl BatchHandle {
    pub fn connection(&self) -> &RedisConnection {
        &self.connection
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// What the native client answered to the start command.
    pub fn reply(&self) -> &Value {
        &self.reply
    }

    /// Queues one command in the batch.
    pub async fn queue(&self, name: &str, args: Vec<Value>) -> RedisResult<Value> {
        self.connection.call_once(name, args).await
    }

    /// Flushes the batch and returns the per-command replies.
    pub async fn exec(&self) -> RedisResult<Value> {
        self.connection.call_once("exec", Vec::new()).await
    }

    /// Abandons the queued commands.
    pub async fn discard(&self) -> RedisResult<Value> {
        self.connection.call_once("discard", Vec::new()).await
    }
}

/// Clears the pin and releases the connection a batch created, on every exit path.
struct ReleaseOnDrop {
    key: String,
    connection: RedisConnection,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        debug!(connection = self.connection.id(), "Releasing batch connection.");
        release_context_connection(&self.key);
        // The pin may already be gone if the scope is being torn down.
        self.connection.release();
    }
}

impl Redis {
    /// Starts a pipeline and returns its handle. The connection stays pinned to the
    /// current unit of work; queue commands and call `exec` on the handle.
    pub async fn pipeline(&self) -> RedisResult<BatchHandle> {
        self.start_batch(BatchMode::Pipeline).await
    }

    /// Starts a transaction (`MULTI`) and returns its handle.
    pub async fn transaction(&self) -> RedisResult<BatchHandle> {
        self.start_batch(BatchMode::Transaction).await
    }

    /// Runs `body` against a pipeline and flushes it, returning the flush replies.
    pub async fn pipeline_with<F, Fut>(&self, body: F) -> RedisResult<Value>
    where
        F: FnOnce(BatchHandle) -> Fut,
        Fut: Future<Output = RedisResult<()>>,
    {
        self.run_batch(BatchMode::Pipeline, body).await
    }

    /// Runs `body` inside `MULTI` and flushes it with `EXEC`.
    pub async fn transaction_with<F, Fut>(&self, body: F) -> RedisResult<Value>
    where
        F: FnOnce(BatchHandle) -> Fut,
        Fut: Future<Output = RedisResult<()>>,
    {
        self.run_batch(BatchMode::Transaction, body).await
    }

    async fn start_batch(&self, mode: BatchMode) -> RedisResult<BatchHandle> {
        let reply = self.invoke(mode.as_ref(), Vec::new()).await?;
        let connection = self.pinned_connection().ok_or_else(|| {
            RedisError::InvalidConnection(format!("no connection pinned after '{mode}'"))
        })?;
        Ok(BatchHandle {
            connection,
            mode,
            reply,
        })
    }

    /// Opens a unit of work for the batch if the caller is not already inside one.
    async fn run_batch<F, Fut>(&self, mode: BatchMode, body: F) -> RedisResult<Value>
    where
        F: FnOnce(BatchHandle) -> Fut,
        Fut: Future<Output = RedisResult<()>>,
    {
        if context::is_active() {
            self.run_batch_in_scope(mode, body).await
        } else {
            context::scope(self.run_batch_in_scope(mode, body)).await
        }
    }

    async fn run_batch_in_scope<F, Fut>(&self, mode: BatchMode, body: F) -> RedisResult<Value>
    where
        F: FnOnce(BatchHandle) -> Fut,
        Fut: Future<Output = RedisResult<()>>,
    {
        let key = self.context_key();
        let had_pin = context::has(&key);

        let handle = self.start_batch(mode).await?;
        let _release = (!had_pin).then(|| ReleaseOnDrop {
            key,
            connection: handle.connection.clone(),
        });

        let body_result = body(handle.clone()).await;
        // Flush even when the body failed, so the connection never sits in batch mode.
        let flush_result = handle.exec().await;

        match (body_result, flush_result) {
            (Err(body_err), Err(flush_err)) => {
                warn!("Batch flush also failed after a body error: {}", flush_err);
                Err(body_err)
            }
            (Err(body_err), Ok(_)) => Err(body_err),
            (Ok(()), flushed) => flushed,
        }
    }
}
