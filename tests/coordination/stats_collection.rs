use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use d_cache::CacheController;
use d_cache::CacheStorage;
use d_cache::ConcurrencyControl;
use d_cache::MemoryStream;

use crate::common::counting_operation;
use crate::common::eventually;
use crate::common::start_instance;

#[tokio::test]
async fn test_zero_timeout_round_is_empty() {
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Local).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Local).await.unwrap();

    let stats = a.controller.request_cache_stats(Duration::ZERO).await.unwrap();

    assert!(stats.is_empty());
    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_round_collects_hits_and_misses_from_all_instances() {
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Local).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Local).await.unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let on_a = counting_operation(&a.manager, "report", 3, Duration::from_millis(5), runs.clone());
    let on_b = counting_operation(&b.manager, "report", 3, Duration::from_millis(5), runs.clone());

    // miss on A, then a broadcast hit on B
    on_a.call("q", ()).await.unwrap();
    let storage = b.storage.clone();
    assert!(
        eventually(|| {
            let storage = storage.clone();
            async move { storage.get("q").await.unwrap().is_some() }
        })
        .await
    );
    on_b.call("q", ()).await.unwrap();

    let stats = b.controller.request_cache_stats(Duration::from_millis(300)).await.unwrap();

    let report = stats.get("report").expect("report collected");
    assert_eq!(report.misses, 1);
    assert_eq!(report.hits, 1);
    assert!(!b.manager.stats().operation_stats_string("report", Some(&stats)).is_empty());

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}
