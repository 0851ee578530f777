//! Two instances in distributed mode race on the same key.
//!
//! Instance A acquires the lock and takes 300ms to compute 42. Instance B
//! arrives while A is executing and must resolve to A's value without ever
//! running its own copy of the operation.

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
use crate::common::published_kinds;
use crate::common::start_instance;

#[tokio::test]
async fn test_second_instance_joins_remote_execution() {
    crate::enable_logger();
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Distributed).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Distributed).await.unwrap();

    let a_runs = Arc::new(AtomicUsize::new(0));
    let b_runs = Arc::new(AtomicUsize::new(0));
    let on_a = counting_operation(&a.manager, "answer", 42, Duration::from_millis(300), a_runs.clone());
    let on_b = counting_operation(&b.manager, "answer", 0, Duration::ZERO, b_runs.clone());

    let a_call = tokio::spawn({
        let on_a = on_a.clone();
        async move { on_a.call("k", ()).await }
    });

    let watched = broker.clone();
    assert!(
        eventually(|| {
            let watched = watched.clone();
            async move { published_kinds(&watched).contains(&"operation-start") }
        })
        .await
    );

    let b_result = on_b.call("k", ()).await.unwrap();
    let a_result = a_call.await.unwrap().unwrap();

    assert_eq!(a_result, 42);
    assert_eq!(b_result, 42);
    assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    assert_eq!(b_runs.load(Ordering::SeqCst), 0);

    // lock is released once A's end message went around
    assert!(
        eventually(|| {
            let watched = watched.clone();
            async move { watched.counter("answer#k").is_none() }
        })
        .await
    );
    assert_eq!(b.storage.get("k").await.unwrap(), Some(json!(42)));

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_callers_across_instances_execute_once() {
    crate::enable_logger();
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Distributed).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Distributed).await.unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let on_a = counting_operation(&a.manager, "answer", 7, Duration::from_millis(200), runs.clone());
    let on_b = counting_operation(&b.manager, "answer", 7, Duration::from_millis(200), runs.clone());

    let mut calls = Vec::new();
    for i in 0..6 {
        let op = if i % 2 == 0 { on_a.clone() } else { on_b.clone() };
        calls.push(tokio::spawn(async move { op.call("k", ()).await }));
    }

    for call in calls {
        assert_eq!(call.await.unwrap().unwrap(), 7);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}

#[tokio::test]
async fn test_remote_failure_reaches_joined_instance() {
    crate::enable_logger();
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Distributed).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Distributed).await.unwrap();

    let failing = a.manager.wrap("lookup", Duration::from_secs(60), |()| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Err::<u64, _>(d_cache::OperationError::generic("upstream down").with_status(503))
    });
    let b_runs = Arc::new(AtomicUsize::new(0));
    let on_b = counting_operation(&b.manager, "lookup", 1, Duration::ZERO, b_runs.clone());

    let a_call = tokio::spawn({
        let failing = failing.clone();
        async move { failing.call("k", ()).await }
    });
    let watched = broker.clone();
    assert!(
        eventually(|| {
            let watched = watched.clone();
            async move { published_kinds(&watched).contains(&"operation-start") }
        })
        .await
    );

    let b_result = on_b.call("k", ()).await;

    match b_result {
        Err(d_cache::Error::Operation(e)) => {
            assert_eq!(e.message, "upstream down");
            assert_eq!(e.status_code, Some(503));
        }
        other => panic!("expected the remote failure, got {other:?}"),
    }
    assert!(a_call.await.unwrap().is_err());
    assert_eq!(b_runs.load(Ordering::SeqCst), 0);
    assert_eq!(b.storage.get("k").await.unwrap(), None);

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}
