//! Single-flight bookkeeping for one operation.
//!
//! The first caller for a key becomes the executor and gets `None` from
//! [`OperationRegistry::is_executing`]; every caller arriving before
//! completion gets a [`PendingOperation`] that resolves with the executor's
//! result. Completion removes the entry and schedules one task per waiter,
//! so the executor's own return never runs waiter continuations inline.
//!
//! An executor that disappears without calling a trigger leaves its waiters
//! pending; callers that need a bound must apply their own timeout.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::utils::time::elapsed_ms;
use crate::CacheStatsTable;
use crate::CoordinationError;
use crate::Error;
use crate::OperationError;
use crate::Result;

/// Outcome shared between an executor and its waiters
pub type SharedResult = std::result::Result<Value, OperationError>;

struct Waiter {
    sender: oneshot::Sender<SharedResult>,
    enqueued_at: Instant,
}

pub struct OperationRegistry {
    operation: String,
    stats: Arc<CacheStatsTable>,
    /// key -> waiters queued behind the in-flight executor
    in_flight: Mutex<HashMap<String, Vec<Waiter>>>,
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operation", &self.operation)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl OperationRegistry {
    pub fn new(
        operation: impl Into<String>,
        stats: Arc<CacheStatsTable>,
    ) -> Self {
        Self {
            operation: operation.into(),
            stats,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Non-mutating check: is an execution for `key` in flight?
    pub fn exists_key(
        &self,
        key: &str,
    ) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Number of keys currently in flight
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waiters queued behind the executor of `key`
    pub fn waiter_count(
        &self,
        key: &str,
    ) -> usize {
        self.in_flight.lock().get(key).map(Vec::len).unwrap_or(0)
    }

    /// Returns `None` when the caller must execute (and marks `key` in flight),
    /// or a pending result when an execution is already running.
    pub fn is_executing(
        &self,
        key: &str,
    ) -> Option<PendingOperation> {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get_mut(key) {
            Some(waiters) => Some(self.enqueue(key, waiters)),
            None => {
                in_flight.insert(key.to_string(), Vec::new());
                trace!(operation = %self.operation, key, "execution marked in flight");
                None
            }
        }
    }

    /// Joins an in-flight execution without ever claiming the executor slot.
    pub fn join_if_executing(
        &self,
        key: &str,
    ) -> Option<PendingOperation> {
        let mut in_flight = self.in_flight.lock();
        in_flight.get_mut(key).map(|waiters| self.enqueue(key, waiters))
    }

    fn enqueue(
        &self,
        key: &str,
        waiters: &mut Vec<Waiter>,
    ) -> PendingOperation {
        let (sender, receiver) = oneshot::channel();
        waiters.push(Waiter {
            sender,
            enqueued_at: Instant::now(),
        });
        trace!(operation = %self.operation, key, waiters = waiters.len(), "waiter queued");

        PendingOperation {
            operation: self.operation.clone(),
            key: key.to_string(),
            receiver,
        }
    }

    /// Completes every waiter of `key` with `value` and clears the entry
    pub fn trigger_awaiting_resolves(
        &self,
        key: &str,
        value: Value,
    ) {
        let Some(waiters) = self.in_flight.lock().remove(key) else {
            return;
        };
        debug!(operation = %self.operation, key, waiters = waiters.len(), "resolving waiters");

        for waiter in waiters {
            let stats = self.stats.clone();
            let operation = self.operation.clone();
            let value = value.clone();
            dispatch(move || {
                stats.miss(&operation, elapsed_ms(waiter.enqueued_at));
                let _ = waiter.sender.send(Ok(value));
            });
        }
    }

    /// Fails every waiter of `key` with `error` and clears the entry
    pub fn trigger_awaiting_rejects(
        &self,
        key: &str,
        error: OperationError,
    ) {
        let Some(waiters) = self.in_flight.lock().remove(key) else {
            return;
        };
        debug!(operation = %self.operation, key, waiters = waiters.len(), "rejecting waiters");

        for waiter in waiters {
            let error = error.clone();
            dispatch(move || {
                let _ = waiter.sender.send(Err(error));
            });
        }
    }
}

/// Runs `complete` as its own task on the current runtime, or inline when
/// no runtime is available (e.g. during shutdown drops).
fn dispatch<F>(complete: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { complete() });
        }
        Err(_) => complete(),
    }
}

/// Result of an execution running elsewhere; resolves when the executor
/// triggers the registry.
#[derive(Debug)]
pub struct PendingOperation {
    operation: String,
    key: String,
    receiver: oneshot::Receiver<SharedResult>,
}

impl PendingOperation {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Future for PendingOperation {
    type Output = Result<Value>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.receiver).poll(cx);
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(Error::Operation(error))),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CoordinationError::WaiterDropped {
                operation: self.operation.clone(),
                key: self.key.clone(),
            }
            .into())),
        }
    }
}
