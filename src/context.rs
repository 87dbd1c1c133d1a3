use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backing::BackingStore;
use crate::cache::CacheLayer;
use crate::config::GatewayCacheConfig;
use crate::kv::KvStore;
use crate::queue::KvQueue;

/// Everything the request pipeline needs, built once per process and shared
/// by clone. Holds no per-request state.
#[derive(Clone)]
pub struct GatewayContext {
    cache: CacheLayer,
    backing: Arc<dyn BackingStore>,
    usage_queue: KvQueue,
    config: Arc<GatewayCacheConfig>,
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("usage_queue", &self.usage_queue.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GatewayContext {
    pub fn new(
        kv: Arc<dyn KvStore>,
        backing: Arc<dyn BackingStore>,
        config: GatewayCacheConfig,
    ) -> Self {
        let usage_queue = KvQueue::new(kv.clone(), config.usage_queue.clone());
        Self {
            cache: CacheLayer::new(kv),
            backing,
            usage_queue,
            config: Arc::new(config),
        }
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn backing(&self) -> &dyn BackingStore {
        self.backing.as_ref()
    }

    pub fn usage_queue(&self) -> &KvQueue {
        &self.usage_queue
    }

    pub fn config(&self) -> &GatewayCacheConfig {
        &self.config
    }

    /// Probes both external stores. Never fails; problems are reported in
    /// the returned [`HealthReport`].
    pub async fn health(&self) -> HealthReport {
        let mut report = HealthReport {
            status: HealthStatus::Ok,
            database: DependencyHealth::default(),
            kv: DependencyHealth::default(),
        };

        match self.backing.ping().await {
            Ok(()) => report.database.connected = true,
            Err(err) => {
                tracing::error!(error = %err, "database healthcheck failed");
                report.status = HealthStatus::Error;
                report.database.error = Some("Database connection failed".to_string());
            }
        }

        match self.cache.store().ping().await {
            Ok(_) => report.kv.connected = true,
            Err(err) => {
                tracing::error!(error = %err, "kv healthcheck failed");
                report.status = HealthStatus::Error;
                report.kv.error = Some("KV connection failed".to_string());
            }
        }

        report
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: DependencyHealth,
    pub kv: DependencyHealth,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::test_support::{CountingBackingStore, FailingKvStore};

    #[tokio::test]
    async fn health_reports_each_dependency() {
        let ctx = GatewayContext::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(CountingBackingStore::default()),
            GatewayCacheConfig::default(),
        );
        let report = ctx.health().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert!(report.database.connected);
        assert!(report.kv.connected);

        let backing = Arc::new(CountingBackingStore::default());
        backing.set_failing(true);
        let ctx = GatewayContext::new(
            Arc::new(FailingKvStore::default()),
            backing,
            GatewayCacheConfig::default(),
        );
        let report = ctx.health().await;
        assert_eq!(report.status, HealthStatus::Error);
        assert!(!report.database.connected);
        assert!(!report.kv.connected);
        assert_eq!(report.kv.error.as_deref(), Some("KV connection failed"));

        let rendered = serde_json::to_value(&report).unwrap();
        assert_eq!(rendered["status"], "error");
    }
}
