use std::time::Duration;

use serde_json::json;

use super::*;

#[tokio::test]
async fn test_set_get_evict() {
    let storage = LruInMemoryStorage::new(500);

    storage.set("key", Duration::from_secs(5), json!("value")).await.unwrap();
    let first = storage.get("key").await.unwrap();
    storage.evict("key").await.unwrap();
    let second = storage.get("key").await.unwrap();

    assert_eq!(first, Some(json!("value")));
    assert_eq!(second, None);
}

#[tokio::test]
async fn test_returned_values_cannot_taint_the_cache() {
    let storage = LruInMemoryStorage::default();
    let initial = json!({
        "value": "value",
        "array": [{"name": "name", "number": 123}, {"name": "name2", "number": 1234}],
    });
    storage.set("key", Duration::from_secs(5), initial.clone()).await.unwrap();

    let mut fetched = storage.get("key").await.unwrap().unwrap();
    fetched["value"] = json!("newvalue");

    assert_eq!(storage.get("key").await.unwrap(), Some(initial));
}

#[tokio::test]
async fn test_entry_expires_after_its_ttl() {
    let storage = LruInMemoryStorage::default();
    storage.set("short", Duration::from_millis(50), json!(1)).await.unwrap();
    storage.set("long", Duration::from_secs(60), json!(2)).await.unwrap();

    // moka keeps its own clock, so real time has to pass
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(storage.get("short").await.unwrap(), None);
    assert_eq!(storage.get("long").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_zero_ttl_never_expires() {
    let storage = LruInMemoryStorage::default();
    storage.set("key", Duration::ZERO, json!(true)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(storage.get("key").await.unwrap(), Some(json!(true)));
}

#[tokio::test]
async fn test_set_twice_is_idempotent() {
    let storage = LruInMemoryStorage::default();

    storage.set("key", Duration::from_secs(5), json!(42)).await.unwrap();
    storage.set("key", Duration::from_secs(5), json!(42)).await.unwrap();

    assert_eq!(storage.get("key").await.unwrap(), Some(json!(42)));
    assert_eq!(storage.len().await, 1);
}

#[tokio::test]
async fn test_capacity_is_bounded() {
    let storage = LruInMemoryStorage::new(10);
    for i in 0..100 {
        storage.set(&format!("key-{i}"), Duration::ZERO, json!(i)).await.unwrap();
    }

    assert!(storage.len().await <= 10);
}
