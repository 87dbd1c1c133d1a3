use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::*;

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn redis_url() -> Option<String> {
    env_nonempty("LLMGATEWAY_REDIS_URL").or_else(|| env_nonempty("REDIS_URL"))
}

static PREFIX_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn test_prefix() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    let n = PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("llmgateway_test:{millis}:{n}")
}

#[test]
fn keys_are_namespaced_by_prefix() {
    let store = RedisKvStore::new("redis://127.0.0.1/")
        .expect("client")
        .with_prefix("gw");
    assert_eq!(store.namespaced("project:p1"), "gw:project:p1");

    let bare = store.with_prefix("");
    assert_eq!(bare.namespaced("project:p1"), "project:p1");
}

#[tokio::test]
async fn redis_store_round_trips_values() {
    let Some(url) = redis_url() else {
        return;
    };
    let store = RedisKvStore::new(url)
        .expect("client")
        .with_prefix(test_prefix());

    assert_eq!(store.ping().await.expect("ping"), "PONG");
    assert!(store.get("missing").await.expect("get").is_none());

    store.set("k", "v", Some(60)).await.expect("set");
    assert_eq!(store.get("k").await.expect("get").as_deref(), Some("v"));

    store.set("k", "w", None).await.expect("overwrite");
    assert_eq!(store.get("k").await.expect("get").as_deref(), Some("w"));

    store.delete("k").await.expect("delete");
    assert!(store.get("k").await.expect("get").is_none());
}

#[tokio::test]
async fn redis_store_treats_zero_ttl_as_expired() {
    let Some(url) = redis_url() else {
        return;
    };
    let store = RedisKvStore::new(url)
        .expect("client")
        .with_prefix(test_prefix());

    store.set("k", "v", None).await.expect("set");
    store.set("k", "v2", Some(0)).await.expect("zero ttl");
    assert!(store.get("k").await.expect("get").is_none());
}
