use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use d_cache::CacheController;
use d_cache::CacheStorage;
use d_cache::ConcurrencyControl;
use d_cache::MemoryStream;
use serde_json::json;

use crate::common::counting_operation;
use crate::common::eventually;
use crate::common::start_instance;

#[tokio::test]
async fn test_value_computed_on_one_instance_is_served_by_another() {
    crate::enable_logger();
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Local).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Local).await.unwrap();

    let a_runs = Arc::new(AtomicUsize::new(0));
    let b_runs = Arc::new(AtomicUsize::new(0));
    let on_a = counting_operation(&a.manager, "profile", 5, Duration::ZERO, a_runs.clone());
    let on_b = counting_operation(&b.manager, "profile", 9, Duration::ZERO, b_runs.clone());

    assert_eq!(on_a.call("user-1", ()).await.unwrap(), 5);

    let storage = b.storage.clone();
    assert!(
        eventually(|| {
            let storage = storage.clone();
            async move { storage.get("user-1").await.unwrap().is_some() }
        })
        .await
    );
    assert_eq!(on_b.call("user-1", ()).await.unwrap(), 5);
    assert_eq!(b_runs.load(Ordering::SeqCst), 0);

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_repeated_broadcast_leaves_one_value() {
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Local).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Local).await.unwrap();

    for _ in 0..3 {
        a.controller
            .broadcast_cache_key("k", Duration::from_secs(60), json!({ "v": 1 }))
            .await;
    }

    let storage = b.storage.clone();
    assert!(
        eventually(|| {
            let storage = storage.clone();
            async move { storage.get("k").await.unwrap().is_some() }
        })
        .await
    );
    assert_eq!(b.storage.get("k").await.unwrap(), Some(json!({ "v": 1 })));
    assert_eq!(b.storage.len().await, 1);

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_eviction_propagates_to_every_instance() {
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Local).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Local).await.unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let on_a = counting_operation(&a.manager, "profile", 5, Duration::ZERO, runs.clone());

    b.storage.set("user-1", Duration::ZERO, json!(5)).await.unwrap();
    a.storage.set("user-1", Duration::ZERO, json!(5)).await.unwrap();

    on_a.evict("user-1").await;

    assert_eq!(a.storage.get("user-1").await.unwrap(), None);
    let storage = b.storage.clone();
    assert!(
        eventually(|| {
            let storage = storage.clone();
            async move { storage.get("user-1").await.unwrap().is_none() }
        })
        .await
    );

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}
