use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::ConcurrencyControl;
use crate::operation_key;
use crate::utils::async_task::next_backoff;
use crate::utils::async_task::with_jitter;
use crate::utils::time::elapsed_ms;
use crate::CacheController;
use crate::CacheStatsTable;
use crate::CacheStorage;
use crate::Error;
use crate::LockOutcome;
use crate::ManagerConfig;
use crate::OperationError;
use crate::OperationRegistry;
use crate::Result;
use crate::SharedResult;
use crate::UnlockHandle;

type OperationFn<A, R> = dyn Fn(A) -> BoxFuture<'static, std::result::Result<R, OperationError>> + Send + Sync;

/// Wraps operations with caching and duplicate suppression.
pub struct GenericManager {
    controller: Arc<dyn CacheController>,
    storage: Arc<dyn CacheStorage>,
    stats: Arc<CacheStatsTable>,
    config: ManagerConfig,
}

impl std::fmt::Debug for GenericManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("GenericManager").field("config", &self.config).finish()
    }
}

impl GenericManager {
    pub fn new(
        controller: Arc<dyn CacheController>,
        storage: Arc<dyn CacheStorage>,
        stats: Arc<CacheStatsTable>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            controller,
            storage,
            stats,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<CacheStatsTable> {
        &self.stats
    }

    /// Wraps `func` as the named `operation`, caching results for `ttl`.
    ///
    /// In distributed mode the operation's registry is handed to the
    /// controller so executions announced by other instances can be joined.
    pub fn wrap<A, R, F, Fut>(
        &self,
        operation: impl Into<String>,
        ttl: Duration,
        func: F,
    ) -> CachedOperation<A, R>
    where
        A: Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, OperationError>> + Send + 'static,
    {
        let operation = operation.into();
        let registry = Arc::new(OperationRegistry::new(operation.clone(), self.stats.clone()));

        if self.config.concurrency == ConcurrencyControl::Distributed {
            self.controller.set_registry(&operation, registry.clone());
        }
        debug!(%operation, concurrency = ?self.config.concurrency, "operation wrapped");

        CachedOperation {
            inner: Arc::new(Inner {
                operation,
                ttl,
                func: Box::new(move |args| func(args).boxed()),
                registry,
                controller: self.controller.clone(),
                storage: self.storage.clone(),
                stats: self.stats.clone(),
                config: self.config.clone(),
            }),
            _marker: PhantomData,
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.controller.close().await
    }
}

struct Inner<A, R> {
    operation: String,
    ttl: Duration,
    func: Box<OperationFn<A, R>>,
    registry: Arc<OperationRegistry>,
    controller: Arc<dyn CacheController>,
    storage: Arc<dyn CacheStorage>,
    stats: Arc<CacheStatsTable>,
    config: ManagerConfig,
}

/// Cached entry point of one wrapped operation. Cheap to clone.
pub struct CachedOperation<A, R> {
    inner: Arc<Inner<A, R>>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for CachedOperation<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, R> std::fmt::Debug for CachedOperation<A, R> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CachedOperation")
            .field("operation", &self.inner.operation)
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

impl<A, R> CachedOperation<A, R>
where
    A: Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    /// Returns the cached value for `key`, or executes the operation with
    /// `args` and caches its result.
    ///
    /// Failures of the wrapped function come back as [`Error::Operation`].
    /// Storage and transport failures never surface here.
    pub async fn call(
        &self,
        key: &str,
        args: A,
    ) -> Result<R> {
        if let Some(cached) = self.lookup(key).await {
            return Ok(cached);
        }

        match self.inner.config.concurrency {
            ConcurrencyControl::None => self.execute(key, args).await.map(|(r, _)| r).map_err(Error::from),
            ConcurrencyControl::Local => self.local_flow(key, args).await,
            ConcurrencyControl::Distributed => self.distributed_flow(key, args).await,
        }
    }

    /// Evicts `key` here, then asks the other instances to do the same.
    pub async fn evict(
        &self,
        key: &str,
    ) {
        if let Err(e) = self.inner.controller.evict_cache_key(key).await {
            warn!(operation = %self.inner.operation, key, error = %e, "local eviction failed");
        }
        self.inner.controller.request_cache_key_eviction(key).await;
    }

    /// Storage read; any failure counts as a miss
    async fn lookup(
        &self,
        key: &str,
    ) -> Option<R> {
        let start = Instant::now();
        let value = match self.inner.storage.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                debug!(operation = %self.inner.operation, key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(cached) => {
                self.inner.stats.hit(&self.inner.operation, elapsed_ms(start));
                trace!(operation = %self.inner.operation, key, "cache hit");
                Some(cached)
            }
            Err(e) => {
                warn!(operation = %self.inner.operation, key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Runs the wrapped function, then stores and broadcasts its value.
    async fn execute(
        &self,
        key: &str,
        args: A,
    ) -> std::result::Result<(R, Value), OperationError> {
        let inner = &self.inner;
        let start = Instant::now();
        let result = (inner.func)(args).await?;
        inner.stats.miss(&inner.operation, elapsed_ms(start));

        let value = serde_json::to_value(&result).map_err(|e| {
            error!(operation = %inner.operation, key, error = %e, "result is not serializable");
            OperationError::internal(format!("result of {} is not serializable: {e}", inner.operation))
        })?;

        if let Err(e) = inner.storage.set(key, inner.ttl, value.clone()).await {
            error!(operation = %inner.operation, key, error = %e, "failed to store value");
        }

        if inner.config.broadcast {
            inner.controller.broadcast_cache_key(key, inner.ttl, value.clone()).await;
        }

        Ok((result, value))
    }

    async fn local_flow(
        &self,
        key: &str,
        args: A,
    ) -> Result<R> {
        if let Some(pending) = self.inner.registry.is_executing(key) {
            trace!(operation = %self.inner.operation, key, "joining local execution");
            return decode(pending.await?);
        }

        let guard = LocalExecution {
            registry: &self.inner.registry,
            key,
            completed: false,
        };
        let outcome = self.execute(key, args).await;
        guard.complete(outcome.as_ref().map(|(_, value)| value.clone()).map_err(Clone::clone));

        outcome.map(|(r, _)| r).map_err(Error::from)
    }

    async fn distributed_flow(
        &self,
        key: &str,
        args: A,
    ) -> Result<R> {
        let inner = &self.inner;
        let lock_key = operation_key(&inner.operation, key);
        let max_delay = inner.config.lock_poll_max_interval();
        let mut delay = inner.config.lock_poll_interval();
        let mut contended = false;

        let unlock = loop {
            match inner.controller.lock(&lock_key, inner.config.lock_ttl()).await {
                Ok(LockOutcome::Acquired(unlock)) => {
                    // the previous holder may have stored the value just before releasing
                    if contended {
                        if let Some(cached) = self.lookup(key).await {
                            unlock.release().await;
                            return Ok(cached);
                        }
                    }
                    break Some(unlock);
                }
                Ok(LockOutcome::Contended) => {
                    contended = true;
                    // leave room for the holder's start message to arrive
                    tokio::time::sleep(with_jitter(delay)).await;

                    if let Some(pending) = inner.controller.get_operation_promise(&inner.operation, key) {
                        debug!(operation = %inner.operation, key, "joining execution of another instance");
                        return decode(pending.await?);
                    }
                    // the holder may already be done and its value broadcast
                    if let Some(cached) = self.lookup(key).await {
                        return Ok(cached);
                    }
                    delay = next_backoff(delay, max_delay);
                }
                Err(e) => {
                    warn!(operation = %inner.operation, key, error = %e, "lock unavailable, executing uncoordinated");
                    break None;
                }
            }
        };

        let Some(unlock) = unlock else {
            return self.execute(key, args).await.map(|(r, _)| r).map_err(Error::from);
        };

        inner.controller.request_operation_start(&inner.operation, key).await;
        let guard = DistributedExecution {
            controller: inner.controller.clone(),
            operation: inner.operation.clone(),
            key: key.to_string(),
            unlock: Some(unlock),
        };

        let outcome = self.execute(key, args).await;
        guard
            .complete(outcome.as_ref().map(|(_, value)| value.clone()).map_err(Clone::clone))
            .await;

        outcome.map(|(r, _)| r).map_err(Error::from)
    }
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R> {
    Ok(serde_json::from_value(value)?)
}

/// Releases local waiters even when the executing call is dropped midway.
struct LocalExecution<'a> {
    registry: &'a OperationRegistry,
    key: &'a str,
    completed: bool,
}

impl LocalExecution<'_> {
    fn complete(
        mut self,
        result: SharedResult,
    ) {
        self.completed = true;
        match result {
            Ok(value) => self.registry.trigger_awaiting_resolves(self.key, value),
            Err(e) => self.registry.trigger_awaiting_rejects(self.key, e),
        }
    }
}

impl Drop for LocalExecution<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.registry.trigger_awaiting_rejects(
                self.key,
                OperationError::cancelled(format!("execution of {} was cancelled", self.registry.operation())),
            );
        }
    }
}

/// Publishes the end message for a lock holder, or a cancellation if the
/// executing call is dropped before finishing.
struct DistributedExecution {
    controller: Arc<dyn CacheController>,
    operation: String,
    key: String,
    unlock: Option<UnlockHandle>,
}

impl DistributedExecution {
    async fn complete(
        mut self,
        result: SharedResult,
    ) {
        let unlock = self.unlock.take();
        self.controller
            .request_operation_end(&self.operation, &self.key, result, unlock)
            .await;
    }
}

impl Drop for DistributedExecution {
    fn drop(&mut self) {
        let Some(unlock) = self.unlock.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(lock = unlock.key(), "runtime gone, lock left to its ttl");
            return;
        };

        let controller = self.controller.clone();
        let operation = std::mem::take(&mut self.operation);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            let cancelled = OperationError::cancelled(format!("execution of {operation} was cancelled"));
            controller
                .request_operation_end(&operation, &key, Err(cancelled), Some(unlock))
                .await;
        });
    }
}
