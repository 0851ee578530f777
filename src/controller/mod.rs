//! Cross-instance cache coordination.
//!
//! A controller tails the shared coordination stream, reacts to the
//! [`ControlMessage`]s other instances publish, and offers the orchestrator
//! the outbound half of the protocol plus a distributed lock.

mod messages;
mod stream_controller;

pub use messages::*;
pub use stream_controller::*;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::constants::OPERATION_KEY_SEPARATOR;
use crate::CacheStats;
use crate::LockStore;
use crate::OperationRegistry;
use crate::PendingOperation;
use crate::Result;
use crate::SharedResult;

/// Lifecycle of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Listening,
    /// A stats collection round is open
    AwaitingStatsReply,
    /// Shutting down; inbound messages are ignored
    Closing,
    Closed,
}

/// Identifier shared by the distributed lock and the pending unlock of one
/// execution: `operation#key`.
pub fn operation_key(
    operation: &str,
    key: &str,
) -> String {
    format!("{operation}{OPERATION_KEY_SEPARATOR}{key}")
}

/// Releases a distributed lock by deleting its key.
///
/// Release is best effort: failures are logged and the lock ttl frees the
/// key eventually.
pub struct UnlockHandle {
    key: String,
    locks: Arc<dyn LockStore>,
}

impl std::fmt::Debug for UnlockHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("UnlockHandle").field("key", &self.key).finish()
    }
}

impl UnlockHandle {
    pub fn new(
        key: impl Into<String>,
        locks: Arc<dyn LockStore>,
    ) -> Self {
        Self {
            key: key.into(),
            locks,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(self) {
        match self.locks.delete(&self.key).await {
            Ok(()) => debug!(key = %self.key, "lock released"),
            Err(e) => warn!(key = %self.key, error = %e, "failed to release lock, waiting for ttl"),
        }
    }
}

#[derive(Debug)]
pub enum LockOutcome {
    /// This caller holds the lock until the handle is released or the ttl lapses
    Acquired(UnlockHandle),
    /// Someone else holds it
    Contended,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheController: Send + Sync + 'static {
    /// Publishes this instance's statistics, one reply per operation,
    /// addressed to `requester`.
    async fn send_cache_stats(
        &self,
        requester: &str,
    );

    /// Asks every instance for its statistics and combines the replies
    /// that arrive within `timeout`.
    ///
    /// Fails with [`crate::CoordinationError::StatsRoundInProgress`] while a
    /// previous round is still open.
    async fn request_cache_stats(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<String, CacheStats>>;

    /// Removes `key` from this instance's storage only.
    async fn evict_cache_key(
        &self,
        key: &str,
    ) -> Result<()>;

    /// Asks other instances to evict `key`. Best effort.
    async fn request_cache_key_eviction(
        &self,
        key: &str,
    );

    /// Publishes a computed value so every instance stores it.
    async fn broadcast_cache_key(
        &self,
        key: &str,
        ttl: Duration,
        value: Value,
    );

    /// Tries the distributed lock once. Contention is not an error.
    async fn lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<LockOutcome>;

    /// Registry that inbound operation start/end messages for `operation`
    /// are applied to.
    fn set_registry(
        &self,
        operation: &str,
        registry: Arc<OperationRegistry>,
    );

    async fn request_operation_start(
        &self,
        operation: &str,
        key: &str,
    );

    /// Publishes the outcome of an execution. `unlock` is released once this
    /// instance has processed its own end message.
    async fn request_operation_end(
        &self,
        operation: &str,
        key: &str,
        result: SharedResult,
        unlock: Option<UnlockHandle>,
    );

    /// Joins an execution another instance announced, if one is known.
    fn get_operation_promise(
        &self,
        operation: &str,
        key: &str,
    ) -> Option<PendingOperation>;

    async fn close(&self) -> Result<()>;
}
