// src/core/context.rs

//! The execution context store: a key/value map that lives for one logical
//! unit of work and is torn down when that unit of work ends.
//!
//! A unit of work is any future run through [`scope`]. Values stored with [`set`]
//! are visible only inside that future. Actions registered with [`defer`] run in
//! reverse registration order when the future completes, fails, panics, or is
//! dropped before completion. Spawned tasks do not inherit the context of the
//! task that spawned them.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

type DeferredAction = Box<dyn FnOnce() + Send>;

struct Deferred {
    key: Option<String>,
    action: DeferredAction,
}

#[derive(Default)]
struct Context {
    values: RefCell<HashMap<String, Box<dyn Any + Send>>>,
    deferred: RefCell<Vec<Deferred>>,
}

tokio::task_local! {
    static CONTEXT: Context;
}

/// Runs deferred actions when dropped. It lives inside the task-local scope, so
/// the actions still see the context they were registered in.
struct Teardown;

impl Drop for Teardown {
    fn drop(&mut self) {
        let mut ran = 0usize;
        // Actions may register further actions; keep draining until none remain.
        while let Some(deferred) = CONTEXT
            .try_with(|ctx| ctx.deferred.borrow_mut().pop())
            .ok()
            .flatten()
        {
            (deferred.action)();
            ran += 1;
        }
        if ran > 0 {
            debug!("Context teardown ran {} deferred action(s).", ran);
        }
    }
}

/// Runs `fut` as a new logical unit of work with an empty context.
pub async fn scope<F>(fut: F) -> F::Output
where
    F: Future,
{
    CONTEXT
        .scope(Context::default(), async move {
            let _teardown = Teardown;
            fut.await
        })
        .await
}

/// Returns true when called from inside [`scope`].
pub fn is_active() -> bool {
    CONTEXT.try_with(|_| ()).is_ok()
}

pub fn has(key: &str) -> bool {
    CONTEXT
        .try_with(|ctx| ctx.values.borrow().contains_key(key))
        .unwrap_or(false)
}

/// Returns a clone of the value under `key`, or `None` if it is absent or was
/// stored with a different type.
pub fn get<T>(key: &str) -> Option<T>
where
    T: Any + Clone,
{
    CONTEXT
        .try_with(|ctx| {
            ctx.values
                .borrow()
                .get(key)
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
        })
        .ok()
        .flatten()
}

/// Stores `value` under `key`, replacing any previous value. Outside a scope the
/// value is handed back.
pub fn set<T>(key: impl Into<String>, value: T) -> Result<(), T>
where
    T: Any + Send,
{
    if !is_active() {
        return Err(value);
    }
    let key = key.into();
    let mut slot = Some(value);
    let _ = CONTEXT.try_with(|ctx| {
        if let Some(value) = slot.take() {
            ctx.values.borrow_mut().insert(key, Box::new(value));
        }
    });
    slot.map_or(Ok(()), Err)
}

/// Removes the value under `key`. Returns whether anything was removed.
pub fn remove(key: &str) -> bool {
    CONTEXT
        .try_with(|ctx| ctx.values.borrow_mut().remove(key).is_some())
        .unwrap_or(false)
}

/// Registers `action` to run when the current unit of work ends. Outside a scope
/// the action is handed back unrun.
pub fn defer<F>(action: F) -> Result<(), F>
where
    F: FnOnce() + Send + 'static,
{
    push_deferred(None, action).map(|_| ())
}

/// Like [`defer`], but at most one action per `key` is queued at a time. Returns
/// `Ok(false)` and drops `action` when one is already waiting under `key`.
pub fn defer_once<F>(key: impl Into<String>, action: F) -> Result<bool, F>
where
    F: FnOnce() + Send + 'static,
{
    push_deferred(Some(key.into()), action)
}

/// Number of actions waiting for the current unit of work to end.
pub fn deferred_count() -> usize {
    CONTEXT
        .try_with(|ctx| ctx.deferred.borrow().len())
        .unwrap_or(0)
}

fn push_deferred<F>(key: Option<String>, action: F) -> Result<bool, F>
where
    F: FnOnce() + Send + 'static,
{
    if !is_active() {
        return Err(action);
    }
    let mut slot = Some(action);
    let pushed = CONTEXT.try_with(|ctx| {
        let mut deferred = ctx.deferred.borrow_mut();
        if key.is_some() && deferred.iter().any(|pending| pending.key == key) {
            return false;
        }
        let Some(action) = slot.take() else {
            return false;
        };
        deferred.push(Deferred {
            key,
            action: Box::new(action),
        });
        true
    });
    match pushed {
        Ok(queued) => Ok(queued),
        Err(_) => slot.map_or(Ok(false), Err),
    }
}
