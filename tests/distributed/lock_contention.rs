use std::time::Duration;

use d_cache::CacheController;
use d_cache::ConcurrencyControl;
use d_cache::LockOutcome;
use d_cache::MemoryStream;
use futures::future::join_all;

use crate::common::eventually;
use crate::common::start_instance;

#[tokio::test]
async fn test_lock_is_mutually_exclusive_across_instances() {
    let broker = MemoryStream::new();
    let mut instances = Vec::new();
    for name in ["a", "b", "c"] {
        instances.push(start_instance(&broker, name, ConcurrencyControl::Distributed).await.unwrap());
    }

    let attempts = instances
        .iter()
        .flat_map(|instance| (0..4).map(move |_| instance.controller.lock("op#k", Duration::from_secs(30))));
    let outcomes = join_all(attempts).await;

    let acquired: Vec<_> = outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap())
        .filter(LockOutcome::is_acquired)
        .collect();
    assert_eq!(acquired.len(), 1);
    assert!(broker.counter("op#k").is_some());

    for instance in &instances {
        instance.controller.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_end_message_frees_lock_for_next_holder() {
    let broker = MemoryStream::new();
    let a = start_instance(&broker, "a", ConcurrencyControl::Distributed).await.unwrap();
    let b = start_instance(&broker, "b", ConcurrencyControl::Distributed).await.unwrap();

    let LockOutcome::Acquired(unlock) = a.controller.lock("op#k", Duration::from_secs(30)).await.unwrap() else {
        panic!("lock should be free");
    };
    assert!(!b.controller.lock("op#k", Duration::from_secs(30)).await.unwrap().is_acquired());

    a.controller
        .request_operation_end("op", "k", Ok(serde_json::json!(1)), Some(unlock))
        .await;

    let watched = broker.clone();
    assert!(
        eventually(|| {
            let watched = watched.clone();
            async move { watched.counter("op#k").is_none() }
        })
        .await
    );
    assert!(b.controller.lock("op#k", Duration::from_secs(30)).await.unwrap().is_acquired());

    a.controller.close().await.unwrap();
    b.controller.close().await.unwrap();
}
