use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::CacheStatsTable;
use crate::ControllerConfig;
use crate::LruInMemoryStorage;
use crate::MemoryStream;
use crate::Result;
use crate::StreamCacheController;

pub(crate) const TEST_STREAM: &str = "d-cache-test";

/// Polls `check` every 10ms until it holds or two seconds pass.
pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub(crate) fn fast_controller_config() -> ControllerConfig {
    ControllerConfig {
        stream_id: TEST_STREAM.to_string(),
        read_block_ms: 50,
        read_retry_backoff_ms: 10,
        stats_timeout_ms: 100,
    }
}

/// One instance sharing `broker`, with its own storage and stats
pub(crate) struct TestInstance {
    pub controller: Arc<StreamCacheController>,
    pub storage: Arc<LruInMemoryStorage>,
    pub stats: Arc<CacheStatsTable>,
}

pub(crate) async fn start_instance(
    broker: &MemoryStream,
    instance_id: &str,
) -> Result<TestInstance> {
    let storage = Arc::new(LruInMemoryStorage::default());
    let stats = Arc::new(CacheStatsTable::default());
    let controller = StreamCacheController::builder(Arc::new(broker.connection()), Arc::new(broker.connection()))
        .storage(storage.clone())
        .stats(stats.clone())
        .instance_id(instance_id)
        .config(fast_controller_config())
        .start()
        .await?;

    Ok(TestInstance {
        controller,
        storage,
        stats,
    })
}
