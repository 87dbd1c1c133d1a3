use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache_key::derive_cache_key;
use crate::context::GatewayContext;
use crate::Result;

impl GatewayContext {
    /// Exact-key lookup of a full (non-streaming) response.
    pub async fn get_response_from_cache<T: DeserializeOwned>(&self, cache_key: &str) -> Option<T> {
        self.cache().get(cache_key).await
    }

    /// `ttl_seconds` is the project's effective caching duration.
    pub async fn store_response_in_cache<T: Serialize + ?Sized>(
        &self,
        cache_key: &str,
        response: &T,
        ttl_seconds: u64,
    ) {
        if ttl_seconds == 0 {
            return;
        }
        self.cache().set(cache_key, response, ttl_seconds).await;
    }

    /// Serves a cached response for `payload` only when the project allows it.
    pub async fn lookup_cached_response<T: DeserializeOwned>(
        &self,
        project_id: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<T>> {
        let policy = self.resolve_project_caching_policy(project_id).await?;
        if !policy.enabled {
            return Ok(None);
        }
        let cache_key = derive_cache_key(payload);
        let cached = self.get_response_from_cache(&cache_key).await;
        tracing::debug!(
            project_id,
            cache_key = %cache_key,
            hit = cached.is_some(),
            "response cache lookup"
        );
        Ok(cached)
    }

    /// Stores `response` under the key of `payload` if the project caches.
    /// Returns whether a write was attempted.
    pub async fn cache_response_for_project<T: Serialize + ?Sized>(
        &self,
        project_id: &str,
        payload: &serde_json::Value,
        response: &T,
    ) -> Result<bool> {
        let policy = self.resolve_project_caching_policy(project_id).await?;
        if !policy.enabled {
            return Ok(false);
        }
        let cache_key = derive_cache_key(payload);
        self.store_response_in_cache(&cache_key, response, policy.duration_seconds)
            .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::GatewayCacheConfig;
    use crate::kv::{ManualClock, MemoryKvStore};
    use crate::store_types::Project;
    use crate::test_support::CountingBackingStore;

    fn context(clock: &ManualClock) -> GatewayContext {
        let mut caching = Project::new("p-on", "org-1", "on");
        caching.caching_enabled = Some(true);
        caching.cache_duration_seconds = Some(10);
        let backing = CountingBackingStore::default()
            .with_project(caching)
            .with_project(Project::new("p-off", "org-1", "off"));
        GatewayContext::new(
            Arc::new(MemoryKvStore::with_clock(Box::new(clock.clone()))),
            Arc::new(backing),
            GatewayCacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn responses_live_for_project_duration() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock);
        let payload = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        let response = json!({"id": "chatcmpl-1", "choices": []});

        assert!(
            ctx.cache_response_for_project("p-on", &payload, &response)
                .await
                .unwrap()
        );
        let hit: Option<serde_json::Value> =
            ctx.lookup_cached_response("p-on", &payload).await.unwrap();
        assert_eq!(hit, Some(response));

        clock.advance(10);
        let miss: Option<serde_json::Value> =
            ctx.lookup_cached_response("p-on", &payload).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn disabled_projects_neither_read_nor_write() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock);
        let payload = json!({"model": "m"});

        ctx.store_response_in_cache(&derive_cache_key(&payload), &json!("stale"), 60)
            .await;
        let hit: Option<serde_json::Value> =
            ctx.lookup_cached_response("p-off", &payload).await.unwrap();
        assert!(hit.is_none());
        assert!(
            !ctx.cache_response_for_project("p-off", &payload, &json!("x"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn different_payloads_do_not_share_entries() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock);

        ctx.cache_response_for_project("p-on", &json!({"model": "a"}), &json!(1))
            .await
            .unwrap();
        let other: Option<u32> = ctx
            .lookup_cached_response("p-on", &json!({"model": "b"}))
            .await
            .unwrap();
        assert!(other.is_none());
    }
}
