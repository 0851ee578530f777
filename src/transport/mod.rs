//! Coordination substrate contracts.
//!
//! [`StreamTransport`] is an append-only, multi-consumer log with blocking
//! reads from a cursor. [`LockStore`] is the atomic counter primitive the
//! distributed lock is built on. Both are external collaborators; the crate
//! ships [`MemoryStream`], an in-process broker implementing the two, so that
//! several coordinators can share one process.

mod memory_stream;

pub use memory_stream::*;


use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;

use crate::Result;

/// Position in a stream after which a blocking read returns records
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamCursor {
    /// Every record still retained by the stream
    Start,
    /// Records published strictly after the record with this id
    After(String),
}

impl StreamCursor {
    /// Cursor positioned right after `record`
    pub fn after(record: &StreamRecord) -> Self {
        StreamCursor::After(record.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub id: String,
    pub payload: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Appends `payload` and returns the id the stream assigned to it
    async fn publish(
        &self,
        stream_id: &str,
        payload: String,
    ) -> Result<String>;

    /// Waits up to `block` for records after `cursor`.
    ///
    /// Returns `None` when the interval elapses without new records.
    async fn blocking_read(
        &self,
        stream_id: &str,
        cursor: &StreamCursor,
        block: Duration,
    ) -> Result<Option<Vec<StreamRecord>>>;

    /// Cursor positioned after the newest record, so a reader starting
    /// from it only sees records published later.
    async fn tail(
        &self,
        stream_id: &str,
    ) -> Result<StreamCursor>;

    /// Opens an independent connection to the same stream backend.
    fn duplicate(&self) -> Arc<dyn StreamTransport>;

    /// Closes this connection. Pending and later calls fail with
    /// [`crate::TransportError::Closed`].
    async fn close(&self) -> Result<()>;
}

/// Atomic counters with expiry, shared by every instance.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Increments `key` (created at 0) and returns the new value
    async fn increment(
        &self,
        key: &str,
    ) -> Result<i64>;

    /// Sets a time-to-live on `key` unless it already has one.
    /// Returns whether an expiry was set.
    async fn expire_if_unset(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool>;

    async fn delete(
        &self,
        key: &str,
    ) -> Result<()>;
}
