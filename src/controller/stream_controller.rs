//! [`CacheController`] over a [`StreamTransport`].
//!
//! Two connections are used: one publishes, a duplicate tails the stream in
//! a background listener. The listener starts from the tail resolved in
//! [`StreamCacheControllerBuilder::start`], so history published before the
//! controller existed is never replayed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;
use uuid::Uuid;

use super::operation_key;
use super::BroadcastKeyData;
use super::CacheController;
use super::ControlMessage;
use super::ControllerState;
use super::EvictKeyData;
use super::LockOutcome;
use super::OperationEndData;
use super::OperationStartData;
use super::StatsReplyData;
use super::UnlockHandle;
use crate::utils::async_task::spawn_task;
use crate::utils::time::duration_as_millis_u64;
use crate::CacheStats;
use crate::CacheStatsTable;
use crate::CacheStorage;
use crate::CombineStats;
use crate::ControllerConfig;
use crate::CoordinationError;
use crate::LockStore;
use crate::OperationError;
use crate::OperationRegistry;
use crate::PendingOperation;
use crate::Result;
use crate::SharedResult;
use crate::StreamCursor;
use crate::StreamRecord;
use crate::StreamTransport;

pub struct StreamCacheControllerBuilder {
    transport: Arc<dyn StreamTransport>,
    locks: Arc<dyn LockStore>,
    storage: Option<Arc<dyn CacheStorage>>,
    stats: Option<Arc<CacheStatsTable>>,
    instance_id: Option<String>,
    config: ControllerConfig,
}

impl StreamCacheControllerBuilder {
    /// Storage that inbound evictions and broadcasts are applied to.
    /// Without it those messages are ignored.
    pub fn storage(
        mut self,
        storage: Arc<dyn CacheStorage>,
    ) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Statistics reported to stats collection rounds
    pub fn stats(
        mut self,
        stats: Arc<CacheStatsTable>,
    ) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Overrides the random instance identity
    pub fn instance_id(
        mut self,
        instance_id: impl Into<String>,
    ) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn config(
        mut self,
        config: ControllerConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Opens the subscriber connection, pins its cursor to the current tail
    /// and spawns the listener.
    pub async fn start(self) -> Result<Arc<StreamCacheController>> {
        self.config.validate()?;

        let subscriber = self.transport.duplicate();
        let cursor = subscriber.tail(&self.config.stream_id).await?;

        let controller = Arc::new(StreamCacheController {
            instance_id: self.instance_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            publisher: self.transport,
            subscriber,
            locks: self.locks,
            storage: self.storage,
            stats: self.stats.unwrap_or_default(),
            config: self.config,
            registries: DashMap::new(),
            pending_unlocks: DashMap::new(),
            combined: Mutex::new(None),
            state: RwLock::new(ControllerState::Listening),
            shutdown: CancellationToken::new(),
            listener: Mutex::new(None),
        });

        info!(
            instance_id = %controller.instance_id,
            stream_id = %controller.config.stream_id,
            ?cursor,
            "cache controller listening"
        );

        let listener = controller.clone();
        let handle = spawn_task("cache-controller-listener", move || listener.listen(cursor));
        *controller.listener.lock() = Some(handle);

        Ok(controller)
    }
}

pub struct StreamCacheController {
    instance_id: String,
    publisher: Arc<dyn StreamTransport>,
    subscriber: Arc<dyn StreamTransport>,
    locks: Arc<dyn LockStore>,
    storage: Option<Arc<dyn CacheStorage>>,
    stats: Arc<CacheStatsTable>,
    config: ControllerConfig,

    /// operation -> registry fed by inbound start/end messages
    registries: DashMap<String, Arc<OperationRegistry>>,
    /// `operation#key` -> lock to release once our own end message is seen
    pending_unlocks: DashMap<String, UnlockHandle>,
    /// Open stats collection round, if any
    combined: Mutex<Option<CombineStats>>,
    state: RwLock<ControllerState>,

    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamCacheController {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StreamCacheController")
            .field("instance_id", &self.instance_id)
            .field("stream_id", &self.config.stream_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Closes the stats round when the request completes or is dropped.
struct StatsRound<'a> {
    controller: &'a StreamCacheController,
}

impl StatsRound<'_> {
    fn finish(self) -> HashMap<String, CacheStats> {
        self.controller
            .combined
            .lock()
            .as_mut()
            .map(CombineStats::finalize_combined_stats)
            .unwrap_or_default()
    }
}

impl Drop for StatsRound<'_> {
    fn drop(&mut self) {
        self.controller.combined.lock().take();
        let mut state = self.controller.state.write();
        if *state == ControllerState::AwaitingStatsReply {
            *state = ControllerState::Listening;
        }
    }
}

impl StreamCacheController {
    /// Starts a builder. `transport` publishes and is duplicated for the
    /// listener; `locks` backs [`CacheController::lock`].
    pub fn builder(
        transport: Arc<dyn StreamTransport>,
        locks: Arc<dyn LockStore>,
    ) -> StreamCacheControllerBuilder {
        StreamCacheControllerBuilder {
            transport,
            locks,
            storage: None,
            stats: None,
            instance_id: None,
            config: ControllerConfig::default(),
        }
    }

    /// Identity stamped on outbound messages
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    pub fn stats(&self) -> &Arc<CacheStatsTable> {
        &self.stats
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Number of locks waiting for their end message
    pub fn pending_unlock_count(&self) -> usize {
        self.pending_unlocks.len()
    }

    fn is_shutting_down(&self) -> bool {
        matches!(self.state(), ControllerState::Closing | ControllerState::Closed)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(CoordinationError::ControllerClosed.into());
        }
        Ok(())
    }

    /// Publishes `message`; failures are logged and reported as `false`.
    async fn publish(
        &self,
        message: &ControlMessage,
    ) -> bool {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(kind = message.kind(), error = %e, "failed to encode coordination message");
                return false;
            }
        };

        match self.publisher.publish(&self.config.stream_id, payload).await {
            Ok(id) => {
                trace!(kind = message.kind(), %id, "coordination message published");
                true
            }
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "failed to publish coordination message");
                false
            }
        }
    }

    async fn listen(
        self: Arc<Self>,
        mut cursor: StreamCursor,
    ) -> Result<()> {
        let stream_id = self.config.stream_id.clone();

        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                read = self.subscriber.blocking_read(&stream_id, &cursor, self.config.read_block()) => read,
            };

            match read {
                Ok(Some(records)) => {
                    for record in records {
                        let next = StreamCursor::after(&record);
                        self.handle_record(record).await;
                        cursor = next;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!(stream_id = %stream_id, error = %e, "stream read failed, retrying");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.read_retry_backoff()) => {}
                    }
                }
            }
        }

        debug!(instance_id = %self.instance_id, "cache controller listener stopped");
        Ok(())
    }

    async fn handle_record(
        &self,
        record: StreamRecord,
    ) {
        match ControlMessage::decode(&record.payload) {
            Ok(message) => self.process_message(message).await,
            Err(e) => warn!(id = %record.id, error = %e, "skipping undecodable coordination message"),
        }
    }

    /// Applies one inbound message. Ignored once the controller is closing.
    pub async fn process_message(
        &self,
        message: ControlMessage,
    ) {
        if self.is_shutting_down() {
            trace!(kind = message.kind(), "controller closing, message ignored");
            return;
        }
        trace!(kind = message.kind(), requester = ?message.requester(), "processing message");

        match message {
            ControlMessage::CollectStats { requester } => {
                self.send_cache_stats(&requester).await;
            }

            ControlMessage::ReplyStats { requester, data } => {
                if requester != self.instance_id {
                    return;
                }
                if let Some(combined) = self.combined.lock().as_mut() {
                    combined.combine_stats(&data.operation, data.stats);
                }
            }

            ControlMessage::EvictKey { requester, data } => {
                // local eviction already happened before publishing
                if requester == self.instance_id {
                    return;
                }
                if let Err(e) = self.evict_cache_key(&data.key).await {
                    warn!(key = %data.key, error = %e, "failed to apply remote eviction");
                }
            }

            ControlMessage::BroadcastKey { data } => {
                self.store_broadcast(data).await;
            }

            ControlMessage::OperationStart { requester, data } => {
                let Some(registry) = self.registry(&data.operation) else {
                    return;
                };
                // a duplicate start must not turn into a waiter
                if !registry.exists_key(&data.key) {
                    debug!(operation = %data.operation, key = %data.key, %requester, "remote execution started");
                    let _ = registry.is_executing(&data.key);
                }
            }

            ControlMessage::OperationEnd { requester, data } => {
                self.complete_operation(&requester, data).await;
            }
        }
    }

    fn registry(
        &self,
        operation: &str,
    ) -> Option<Arc<OperationRegistry>> {
        self.registries.get(operation).map(|r| r.value().clone())
    }

    async fn store_broadcast(
        &self,
        data: BroadcastKeyData,
    ) {
        let Some(storage) = &self.storage else {
            return;
        };
        let ttl = Duration::from_millis(data.ttl_milliseconds);
        if let Err(e) = storage.set(&data.key, ttl, data.value).await {
            warn!(key = %data.key, error = %e, "failed to store broadcast value");
        }
    }

    async fn complete_operation(
        &self,
        requester: &str,
        data: OperationEndData,
    ) {
        if let Some(registry) = self.registry(&data.operation) {
            if registry.exists_key(&data.key) {
                debug!(operation = %data.operation, key = %data.key, requester, error = data.error, "execution ended");
                if data.error {
                    registry.trigger_awaiting_rejects(&data.key, OperationError::from_wire(&data.value));
                } else {
                    registry.trigger_awaiting_resolves(&data.key, data.value);
                }
            }
        }

        // let local waiters observe the result before the lock frees
        tokio::task::yield_now().await;

        let unlock_key = operation_key(&data.operation, &data.key);
        if let Some((_, unlock)) = self.pending_unlocks.remove(&unlock_key) {
            unlock.release().await;
        }
    }

    async fn release_pending_unlocks(&self) {
        let keys: Vec<String> = self.pending_unlocks.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, unlock)) = self.pending_unlocks.remove(&key) {
                unlock.release().await;
            }
        }
    }
}

#[async_trait]
impl CacheController for StreamCacheController {
    async fn send_cache_stats(
        &self,
        requester: &str,
    ) {
        for operation in self.stats.operations() {
            let Some(stats) = self.stats.operation_data(&operation) else {
                continue;
            };
            let message = ControlMessage::ReplyStats {
                requester: requester.to_string(),
                data: StatsReplyData { operation, stats },
            };
            self.publish(&message).await;
        }
    }

    async fn request_cache_stats(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<String, CacheStats>> {
        self.ensure_running()?;
        {
            let mut combined = self.combined.lock();
            if combined.is_some() {
                return Err(CoordinationError::StatsRoundInProgress.into());
            }
            *combined = Some(CombineStats::new());
        }
        {
            let mut state = self.state.write();
            if *state == ControllerState::Listening {
                *state = ControllerState::AwaitingStatsReply;
            }
        }
        let round = StatsRound { controller: self };
        let request = ControlMessage::CollectStats {
            requester: self.instance_id.clone(),
        };

        // no reply can arrive within a zero window, not even our own
        if timeout.is_zero() {
            let combined = round.finish();
            self.publish(&request).await;
            return Ok(combined);
        }

        self.publish(&request).await;
        tokio::time::sleep(timeout).await;

        Ok(round.finish())
    }

    async fn evict_cache_key(
        &self,
        key: &str,
    ) -> Result<()> {
        match &self.storage {
            Some(storage) => storage.evict(key).await,
            None => Ok(()),
        }
    }

    async fn request_cache_key_eviction(
        &self,
        key: &str,
    ) {
        self.publish(&ControlMessage::EvictKey {
            requester: self.instance_id.clone(),
            data: EvictKeyData { key: key.to_string() },
        })
        .await;
    }

    async fn broadcast_cache_key(
        &self,
        key: &str,
        ttl: Duration,
        value: Value,
    ) {
        self.publish(&ControlMessage::BroadcastKey {
            data: BroadcastKeyData {
                key: key.to_string(),
                ttl_milliseconds: duration_as_millis_u64(ttl),
                value,
            },
        })
        .await;
    }

    async fn lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<LockOutcome> {
        let count = self.locks.increment(key).await?;

        // every contender sets the expiry so a crashed first writer cannot
        // leave the key without one
        if let Err(e) = self.locks.expire_if_unset(key, ttl).await {
            if count == 1 {
                if let Err(delete_error) = self.locks.delete(key).await {
                    warn!(key, error = %delete_error, "failed to drop lock without expiry");
                }
            }
            return Err(e);
        }

        if count == 1 {
            trace!(key, "lock acquired");
            Ok(LockOutcome::Acquired(UnlockHandle::new(key, self.locks.clone())))
        } else {
            trace!(key, count, "lock contended");
            Ok(LockOutcome::Contended)
        }
    }

    fn set_registry(
        &self,
        operation: &str,
        registry: Arc<OperationRegistry>,
    ) {
        self.registries.insert(operation.to_string(), registry);
    }

    async fn request_operation_start(
        &self,
        operation: &str,
        key: &str,
    ) {
        self.publish(&ControlMessage::OperationStart {
            requester: self.instance_id.clone(),
            data: OperationStartData {
                operation: operation.to_string(),
                key: key.to_string(),
            },
        })
        .await;
    }

    async fn request_operation_end(
        &self,
        operation: &str,
        key: &str,
        result: SharedResult,
        unlock: Option<UnlockHandle>,
    ) {
        let unlock_key = operation_key(operation, key);
        // registered before publishing: our own end message may be read
        // before publish returns
        if let Some(unlock) = unlock {
            self.pending_unlocks.insert(unlock_key.clone(), unlock);
        }

        let (value, error) = match result {
            Ok(value) => (value, false),
            Err(e) => (e.to_wire(), true),
        };
        let published = self
            .publish(&ControlMessage::OperationEnd {
                requester: self.instance_id.clone(),
                data: OperationEndData {
                    operation: operation.to_string(),
                    key: key.to_string(),
                    value,
                    error,
                },
            })
            .await;

        if !published {
            // nobody will ever process this end message
            if let Some((_, unlock)) = self.pending_unlocks.remove(&unlock_key) {
                unlock.release().await;
            }
        }
    }

    fn get_operation_promise(
        &self,
        operation: &str,
        key: &str,
    ) -> Option<PendingOperation> {
        self.registry(operation)?.join_if_executing(key)
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, ControllerState::Closing | ControllerState::Closed) {
                return Ok(());
            }
            *state = ControllerState::Closing;
        }
        info!(instance_id = %self.instance_id, "closing cache controller");

        self.shutdown.cancel();
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                warn!(error = %e, "cache controller listener did not stop cleanly");
            }
        }

        self.release_pending_unlocks().await;

        let publisher = self.publisher.close().await;
        let subscriber = self.subscriber.close().await;
        *self.state.write() = ControllerState::Closed;

        publisher?;
        subscriber
    }
}
