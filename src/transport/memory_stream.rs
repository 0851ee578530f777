use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use super::LockStore;
use super::StreamCursor;
use super::StreamRecord;
use super::StreamTransport;
use crate::constants::STREAM_ID_SEPARATOR;
use crate::Result;
use crate::TransportError;

struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(
        &self,
        now: Instant,
    ) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Broker {
    /// stream id -> (sequence, record), oldest first
    streams: Mutex<HashMap<String, VecDeque<(u64, StreamRecord)>>>,
    counters: Mutex<HashMap<String, Counter>>,
    seq: AtomicU64,
    published: Notify,
    max_len: Option<usize>,
}

/// In-process stream broker and lock store.
///
/// Every handle obtained through [`StreamTransport::duplicate`] shares the
/// same records and counters but has its own open/closed state, like
/// separate connections to one server. Record ids are `"<seq>-0"` with a
/// sequence that is monotonic across all streams of the broker.
#[derive(Clone)]
pub struct MemoryStream {
    broker: Arc<Broker>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryStream")
            .field("seq", &self.broker.seq.load(Ordering::Acquire))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::from_broker(Broker::default())
    }

    /// Broker that retains at most `max_len` records per stream, dropping
    /// the oldest first.
    pub fn with_max_len(max_len: usize) -> Self {
        Self::from_broker(Broker {
            max_len: Some(max_len.max(1)),
            ..Default::default()
        })
    }

    fn from_broker(broker: Broker) -> Self {
        Self {
            broker: Arc::new(broker),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// New connection to the same broker
    pub fn connection(&self) -> MemoryStream {
        MemoryStream {
            broker: self.broker.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records currently retained by `stream_id`, oldest first
    pub fn records(
        &self,
        stream_id: &str,
    ) -> Vec<StreamRecord> {
        self.broker
            .streams
            .lock()
            .get(stream_id)
            .map(|records| records.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Current value of a lock counter, if it exists and has not expired
    pub fn counter(
        &self,
        key: &str,
    ) -> Option<i64> {
        let now = Instant::now();
        self.broker
            .counters
            .lock()
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.value)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    fn records_after(
        &self,
        stream_id: &str,
        after: Option<u64>,
    ) -> Option<Vec<StreamRecord>> {
        let streams = self.broker.streams.lock();
        let records: Vec<StreamRecord> = streams
            .get(stream_id)?
            .iter()
            .filter(|(seq, _)| after.map_or(true, |after| *seq > after))
            .map(|(_, record)| record.clone())
            .collect();

        if records.is_empty() {
            None
        } else {
            Some(records)
        }
    }
}

fn record_id(seq: u64) -> String {
    format!("{seq}{STREAM_ID_SEPARATOR}0")
}

fn parse_record_id(
    stream_id: &str,
    id: &str,
) -> Result<u64> {
    id.split(STREAM_ID_SEPARATOR)
        .next()
        .and_then(|seq| seq.parse::<u64>().ok())
        .ok_or_else(|| {
            TransportError::Read {
                stream_id: stream_id.to_string(),
                reason: format!("invalid record id {id:?}"),
            }
            .into()
        })
}

#[async_trait]
impl StreamTransport for MemoryStream {
    async fn publish(
        &self,
        stream_id: &str,
        payload: String,
    ) -> Result<String> {
        self.ensure_open()?;

        let id = {
            let mut streams = self.broker.streams.lock();
            // assign under the lock so ids stay ordered within each stream
            let seq = self.broker.seq.fetch_add(1, Ordering::AcqRel) + 1;
            let id = record_id(seq);
            let records = streams.entry(stream_id.to_string()).or_default();
            records.push_back((
                seq,
                StreamRecord {
                    id: id.clone(),
                    payload,
                },
            ));
            if let Some(max_len) = self.broker.max_len {
                while records.len() > max_len {
                    records.pop_front();
                }
            }
            id
        };

        trace!(stream_id, %id, "record published");
        self.broker.published.notify_waiters();
        Ok(id)
    }

    async fn blocking_read(
        &self,
        stream_id: &str,
        cursor: &StreamCursor,
        block: Duration,
    ) -> Result<Option<Vec<StreamRecord>>> {
        let after = match cursor {
            StreamCursor::Start => None,
            StreamCursor::After(id) => Some(parse_record_id(stream_id, id)?),
        };
        let deadline = Instant::now() + block;

        loop {
            let notified = self.broker.published.notified();
            tokio::pin!(notified);
            // register before checking so a publish in between is not lost
            notified.as_mut().enable();

            self.ensure_open()?;
            if let Some(records) = self.records_after(stream_id, after) {
                return Ok(Some(records));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn tail(
        &self,
        stream_id: &str,
    ) -> Result<StreamCursor> {
        self.ensure_open()?;
        let streams = self.broker.streams.lock();
        let last = streams
            .get(stream_id)
            .and_then(|records| records.back())
            .map(|(seq, _)| *seq)
            .unwrap_or(0);
        Ok(StreamCursor::After(record_id(last)))
    }

    fn duplicate(&self) -> Arc<dyn StreamTransport> {
        Arc::new(self.connection())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("memory stream connection closed");
            // wake readers blocked on this connection
            self.broker.published.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for MemoryStream {
    async fn increment(
        &self,
        key: &str,
    ) -> Result<i64> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut counters = self.broker.counters.lock();
        if counters.get(key).is_some_and(|c| c.is_expired(now)) {
            counters.remove(key);
        }
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        counter.value += 1;
        Ok(counter.value)
    }

    async fn expire_if_unset(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut counters = self.broker.counters.lock();
        match counters.get_mut(key) {
            Some(counter) if !counter.is_expired(now) && counter.expires_at.is_none() => {
                counter.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        self.broker.counters.lock().remove(key);
        Ok(())
    }
}
