use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use d_cache::CacheController;
use d_cache::CacheStatsTable;
use d_cache::CachedOperation;
use d_cache::ConcurrencyControl;
use d_cache::ControlMessage;
use d_cache::ControllerConfig;
use d_cache::GenericManager;
use d_cache::LruInMemoryStorage;
use d_cache::ManagerConfig;
use d_cache::MemoryStream;
use d_cache::OperationError;
use d_cache::Result;
use d_cache::StreamCacheController;

pub const STREAM_ID: &str = "d-cache-it";

pub fn controller_config() -> ControllerConfig {
    ControllerConfig {
        stream_id: STREAM_ID.to_string(),
        read_block_ms: 50,
        read_retry_backoff_ms: 10,
        stats_timeout_ms: 200,
    }
}

pub fn manager_config(concurrency: ConcurrencyControl) -> ManagerConfig {
    ManagerConfig {
        concurrency,
        lock_poll_interval_ms: 2,
        lock_poll_max_interval_ms: 20,
        ..ManagerConfig::default()
    }
}

/// One process-local instance attached to a shared broker
pub struct Instance {
    pub controller: Arc<StreamCacheController>,
    pub storage: Arc<LruInMemoryStorage>,
    pub manager: GenericManager,
}

pub async fn start_instance(
    broker: &MemoryStream,
    name: &str,
    concurrency: ConcurrencyControl,
) -> Result<Instance> {
    let storage = Arc::new(LruInMemoryStorage::default());
    let stats = Arc::new(CacheStatsTable::default());
    let controller = StreamCacheController::builder(Arc::new(broker.connection()), Arc::new(broker.connection()))
        .storage(storage.clone())
        .stats(stats.clone())
        .instance_id(name)
        .config(controller_config())
        .start()
        .await?;

    let as_dyn: Arc<dyn CacheController> = controller.clone();
    let manager = GenericManager::new(as_dyn, storage.clone(), stats, manager_config(concurrency));

    Ok(Instance {
        controller,
        storage,
        manager,
    })
}

/// Wraps an operation returning `value` after `delay`, counting executions
pub fn counting_operation(
    manager: &GenericManager,
    operation: &str,
    value: u64,
    delay: Duration,
    executions: Arc<AtomicUsize>,
) -> CachedOperation<(), u64> {
    manager.wrap(operation, Duration::from_secs(60), move |()| {
        let executions = executions.clone();
        async move {
            executions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok::<_, OperationError>(value)
        }
    })
}

/// Message kinds published on the shared stream so far, oldest first
pub fn published_kinds(broker: &MemoryStream) -> Vec<&'static str> {
    broker
        .records(STREAM_ID)
        .iter()
        .filter_map(|record| ControlMessage::decode(&record.payload).ok())
        .map(|message| message.kind())
        .collect()
}

pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
