use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::kv::{KvStore, KvStoreError};
use crate::Result;

/// FIFO-ish message queue stored in a [`KvStore`].
///
/// Each message lives under its own key and a JSON array under
/// `{queue}:index` records arrival order. Delivery is best-effort, not
/// exactly-once: the index is updated with an unguarded read-modify-write,
/// so concurrent publishers can drop each other's index entries and
/// concurrent consumers can both take the same ids. Consuming deletes the
/// message, so a failure after `consume` returns loses it.
#[derive(Clone)]
pub struct KvQueue {
    store: Arc<dyn KvStore>,
    name: String,
}

impl std::fmt::Debug for KvQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvQueue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl KvQueue {
    pub fn new(store: Arc<dyn KvStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.name)
    }

    fn message_key(&self) -> String {
        format!("{}:{}:{}", self.name, now_millis(), random_suffix())
    }

    pub async fn publish<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.publish_raw(&payload).await
    }

    pub async fn publish_raw(&self, payload: &str) -> Result<()> {
        let message_id = self.message_key();
        self.store.set(&message_id, payload, None).await?;

        let mut index = self.read_index().await?;
        index.push(message_id);
        self.write_index(&index).await?;
        Ok(())
    }

    /// Takes up to `max_count` messages from the head of the index.
    ///
    /// Returns `None` when the index is empty or none of the taken ids still
    /// had a payload.
    pub async fn consume(&self, max_count: usize) -> Result<Option<Vec<String>>> {
        let mut index = self.read_index().await?;
        if index.is_empty() {
            return Ok(None);
        }

        let take = max_count.min(index.len());
        let rest = index.split_off(take);

        let mut messages = Vec::with_capacity(index.len());
        for message_id in &index {
            if let Some(message) = self.store.get(message_id).await? {
                messages.push(message);
                self.store.delete(message_id).await?;
            }
        }

        self.write_index(&rest).await?;

        if messages.is_empty() {
            Ok(None)
        } else {
            Ok(Some(messages))
        }
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.read_index().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn read_index(&self) -> Result<Vec<String>> {
        let Some(raw) = self.store.get(&self.index_key()).await? else {
            return Ok(Vec::new());
        };
        let index = serde_json::from_str(&raw).map_err(KvStoreError::from)?;
        Ok(index)
    }

    async fn write_index(&self, index: &[String]) -> Result<()> {
        let raw = serde_json::to_string(index)?;
        self.store.set(&self.index_key(), &raw, None).await?;
        Ok(())
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.subsec_nanos())
            .unwrap_or(0);
        return format!("{nanos:08x}");
    }
    u64::from_le_bytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayError;
    use crate::kv::MemoryKvStore;
    use crate::test_support::FailingKvStore;

    fn queue() -> KvQueue {
        KvQueue::new(Arc::new(MemoryKvStore::new()), "log_queue")
    }

    #[tokio::test]
    async fn consume_respects_index_order_and_max_count() {
        let queue = queue();
        for message in ["m1", "m2", "m3"] {
            queue.publish(message).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 3);

        let first = queue.consume(2).await.unwrap().unwrap();
        assert_eq!(first, vec!["\"m1\"".to_string(), "\"m2\"".to_string()]);

        let second = queue.consume(2).await.unwrap().unwrap();
        assert_eq!(second, vec!["\"m3\"".to_string()]);

        assert!(queue.consume(2).await.unwrap().is_none());
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn consume_on_untouched_queue_is_none() {
        assert!(queue().consume(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn consume_deletes_payloads() {
        let store = Arc::new(MemoryKvStore::new());
        let queue = KvQueue::new(store.clone(), "q");
        queue.publish_raw("hello").await.unwrap();
        // payload + index
        assert_eq!(store.len().await, 2);

        queue.consume(10).await.unwrap();
        // only the (now empty) index remains
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn consume_skips_ids_whose_payload_vanished() {
        let store = Arc::new(MemoryKvStore::new());
        let queue = KvQueue::new(store.clone(), "q");
        queue.publish_raw("a").await.unwrap();
        queue.publish_raw("b").await.unwrap();

        let raw_index = store.get("q:index").await.unwrap().unwrap();
        let index: Vec<String> = serde_json::from_str(&raw_index).unwrap();
        store.delete(&index[0]).await.unwrap();

        assert_eq!(queue.consume(1).await.unwrap(), None);
        assert_eq!(queue.consume(1).await.unwrap(), Some(vec!["b".to_string()]));
    }

    #[tokio::test]
    async fn message_ids_are_unique_and_namespaced() {
        let queue = queue();
        let a = queue.message_key();
        let b = queue.message_key();
        assert_ne!(a, b);
        assert!(a.starts_with("log_queue:"));
        assert_eq!(a.split(':').count(), 3);
    }

    #[tokio::test]
    async fn store_failures_surface_as_queue_errors() {
        let queue = KvQueue::new(Arc::new(FailingKvStore::default()), "q");
        assert!(matches!(
            queue.publish_raw("x").await,
            Err(GatewayError::Queue(_))
        ));
        assert!(matches!(queue.consume(1).await, Err(GatewayError::Queue(_))));
    }
}
