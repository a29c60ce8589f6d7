// src/core/events.rs

//! Defines the command execution event and the sinks it can be dispatched to.

use crate::connection::RedisConnection;
use crate::core::errors::RedisError;
use crate::core::protocol::Value;
use tokio::sync::broadcast::{self, Sender as BroadcastSender};
use tracing::trace;

/// The capacity of the broadcast channel backing `EventBus`.
/// Slow observers that fall further behind than this see a `Lagged` error.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Emitted once per top-level command, whether it succeeded or failed.
#[derive(Debug, Clone)]
pub struct CommandExecuted {
    /// The command name as the caller spelled it.
    pub command: String,
    pub parameters: Vec<Value>,
    /// Elapsed wall time in milliseconds, rounded to two decimals.
    pub time: f64,
    pub connection: RedisConnection,
    pub pool: String,
    pub result: Option<Value>,
    pub error: Option<RedisError>,
}

impl CommandExecuted {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A sink for `CommandExecuted` events. Dispatch must not block.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: CommandExecuted);
}

/// An `EventDispatcher` that fans events out to any number of observers.
#[derive(Debug)]
pub struct EventBus {
    sender: BroadcastSender<CommandExecuted>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Provides a new receiver that sees every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CommandExecuted> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventDispatcher for EventBus {
    fn dispatch(&self, event: CommandExecuted) {
        // It's okay if nobody is listening.
        if self.sender.send(event).is_err() {
            trace!("Dropped a CommandExecuted event with no active observers.");
        }
    }
}
