use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::kv::KvStore;

/// Best-effort JSON cache over a strict [`KvStore`].
///
/// Store and decode failures are logged and turned into a miss (`get`) or a
/// no-op (`set`). A `None` from [`CacheLayer::get`] therefore never proves
/// the key was not written.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer").finish_non_exhaustive()
    }
}

impl CacheLayer {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::warn!(cache_key = key, error = %err, "failed to encode cache value");
                return;
            }
        };
        if let Err(err) = self.store.set(key, &serialized, Some(ttl_seconds)).await {
            tracing::warn!(cache_key = key, error = %err, "error setting cache");
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(cache_key = key, error = %err, "error getting cache");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(cache_key = key, error = %err, "failed to decode cached value");
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.store.delete(key).await {
            tracing::warn!(cache_key = key, error = %err, "error deleting cache entry");
        }
    }
}
