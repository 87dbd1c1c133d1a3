use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{GatewayError, Result};

pub const LOG_QUEUE: &str = "log_queue";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayCacheConfig {
    /// TTL of the cached per-project caching policy.
    pub policy_ttl_seconds: u64,
    /// TTL of cached project, organization and credential rows.
    pub entity_ttl_seconds: u64,
    /// Effective response-cache duration for projects that leave it unset.
    pub default_cache_duration_seconds: u64,
    /// Overrides the project duration for streaming entries when set.
    pub streaming_ttl_seconds: Option<u64>,
    pub usage_queue: String,
    pub drain_batch_size: usize,
    pub redis_prefix: String,
}

impl Default for GatewayCacheConfig {
    fn default() -> Self {
        Self {
            policy_ttl_seconds: 300,
            entity_ttl_seconds: 60,
            default_cache_duration_seconds: 60,
            streaming_ttl_seconds: None,
            usage_queue: LOG_QUEUE.to_string(),
            drain_batch_size: 10,
            redis_prefix: "llmgateway".to_string(),
        }
    }
}

impl GatewayCacheConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&raw)?
        } else {
            Self::from_toml_str(&raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| GatewayError::Config(err.to_string()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| GatewayError::Config(err.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.usage_queue.trim().is_empty() {
            return Err(GatewayError::Config("usage_queue must not be empty".to_string()));
        }
        if self.drain_batch_size == 0 {
            return Err(GatewayError::Config(
                "drain_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.policy_ttl_seconds == 0 || self.entity_ttl_seconds == 0 {
            return Err(GatewayError::Config(
                "metadata cache ttls must be greater than zero".to_string(),
            ));
        }
        if self.streaming_ttl_seconds == Some(0) {
            return Err(GatewayError::Config(
                "streaming_ttl_seconds must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}
