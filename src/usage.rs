use std::time::{SystemTime, UNIX_EPOCH};

use crate::backing::UsageSink;
use crate::context::GatewayContext;
use crate::store_types::UsageRecord;
use crate::Result;

impl GatewayContext {
    /// Queues a usage record for asynchronous persistence. Stamps
    /// `created_at_ms` when the caller left it at zero.
    pub async fn enqueue_usage_record(&self, record: &UsageRecord) -> Result<()> {
        if record.created_at_ms == 0 {
            let mut record = record.clone();
            record.created_at_ms = now_millis();
            return self.usage_queue().publish(&record).await;
        }
        self.usage_queue().publish(record).await
    }

    /// Takes up to `max_count` records off the queue. Messages that do not
    /// decode are logged and dropped; they are already off the queue.
    pub async fn drain_usage_records(&self, max_count: usize) -> Result<Vec<UsageRecord>> {
        let Some(messages) = self.usage_queue().consume(max_count).await? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(messages.len());
        for raw in messages {
            match serde_json::from_str::<UsageRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping undecodable usage record");
                }
            }
        }
        Ok(records)
    }

    /// Drains one batch into `sink`. Returns how many records were written.
    pub async fn persist_usage_batch(&self, sink: &dyn UsageSink, max_count: usize) -> Result<usize> {
        let records = self.drain_usage_records(max_count).await?;
        if records.is_empty() {
            return Ok(0);
        }
        sink.insert_usage_records(&records).await?;
        tracing::info!(count = records.len(), "persisted usage records");
        Ok(records.len())
    }

    /// Persists batches until the queue index is empty. A batch that writes
    /// nothing (all undecodable, or payloads already gone) does not end the
    /// drain. Returns the total number of records written.
    pub async fn drain_usage_queue(&self, sink: &dyn UsageSink, batch_size: usize) -> Result<usize> {
        let batch_size = batch_size.max(1);
        let mut total = 0usize;
        while !self.usage_queue().is_empty().await? {
            total += self.persist_usage_batch(sink, batch_size).await?;
        }
        Ok(total)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::GatewayCacheConfig;
    use crate::kv::MemoryKvStore;
    use crate::test_support::{CountingBackingStore, FailingKvStore};
    use crate::GatewayError;

    fn record(request_id: &str) -> UsageRecord {
        UsageRecord {
            request_id: request_id.to_string(),
            organization_id: "org-1".to_string(),
            project_id: "p-1".to_string(),
            api_key_id: "ak-1".to_string(),
            requested_model: "gpt-4o".to_string(),
            used_model: "gpt-4o".to_string(),
            used_provider: "openai".to_string(),
            total_tokens: Some(12),
            ..UsageRecord::default()
        }
    }

    fn context(backing: Arc<CountingBackingStore>) -> GatewayContext {
        GatewayContext::new(
            Arc::new(MemoryKvStore::new()),
            backing,
            GatewayCacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn drain_returns_records_in_enqueue_order() {
        let ctx = context(Arc::new(CountingBackingStore::default()));
        for id in ["r1", "r2", "r3"] {
            ctx.enqueue_usage_record(&record(id)).await.unwrap();
        }

        let first = ctx.drain_usage_records(2).await.unwrap();
        assert_eq!(
            first.iter().map(|r| r.request_id.as_str()).collect::<Vec<_>>(),
            vec!["r1", "r2"]
        );
        assert!(first.iter().all(|r| r.created_at_ms > 0));

        let second = ctx.drain_usage_records(2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].request_id, "r3");

        assert!(ctx.drain_usage_records(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_skips_foreign_messages() {
        let ctx = context(Arc::new(CountingBackingStore::default()));
        ctx.usage_queue().publish_raw("{not json").await.unwrap();
        ctx.enqueue_usage_record(&record("r1")).await.unwrap();

        let drained = ctx.drain_usage_records(10).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].request_id, "r1");
    }

    #[tokio::test]
    async fn persist_batch_writes_to_sink() {
        let backing = Arc::new(CountingBackingStore::default());
        let ctx = context(backing.clone());
        ctx.enqueue_usage_record(&record("r1")).await.unwrap();
        ctx.enqueue_usage_record(&record("r2")).await.unwrap();

        assert_eq!(ctx.persist_usage_batch(backing.as_ref(), 10).await.unwrap(), 2);
        assert_eq!(ctx.persist_usage_batch(backing.as_ref(), 10).await.unwrap(), 0);
        assert_eq!(backing.usage.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn drain_queue_continues_past_undecodable_batches() {
        let backing = Arc::new(CountingBackingStore::default());
        let ctx = context(backing.clone());
        ctx.usage_queue().publish_raw("{not json").await.unwrap();
        ctx.enqueue_usage_record(&record("r1")).await.unwrap();

        assert_eq!(ctx.drain_usage_queue(backing.as_ref(), 1).await.unwrap(), 1);
        assert!(ctx.usage_queue().is_empty().await.unwrap());
        let written = backing.usage.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].request_id, "r1");
    }

    #[tokio::test]
    async fn drain_queue_on_empty_queue_writes_nothing() {
        let backing = Arc::new(CountingBackingStore::default());
        let ctx = context(backing.clone());
        assert_eq!(ctx.drain_usage_queue(backing.as_ref(), 10).await.unwrap(), 0);
        assert_eq!(backing.calls(), 0);
    }

    #[tokio::test]
    async fn queue_failures_surface() {
        let ctx = GatewayContext::new(
            Arc::new(FailingKvStore::default()),
            Arc::new(CountingBackingStore::default()),
            GatewayCacheConfig::default(),
        );
        assert!(matches!(
            ctx.enqueue_usage_record(&record("r1")).await,
            Err(GatewayError::Queue(_))
        ));
        assert!(matches!(
            ctx.drain_usage_records(1).await,
            Err(GatewayError::Queue(_))
        ));
    }
}
