pub mod backing;
pub mod cache;
pub mod cache_key;
pub mod config;
pub mod context;
mod error;
pub mod kv;
pub mod queue;
pub mod resolve;
mod response_cache;
pub mod store_types;
pub mod stream_cache;
pub mod telemetry;
mod usage;

#[cfg(feature = "store-redis")]
pub mod redis_store;
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;

#[cfg(test)]
mod test_support;

pub use backing::{BackingStore, BackingStoreError, UsageSink};
pub use cache::CacheLayer;
pub use cache_key::{
    STREAMING_KEY_PREFIX, cache_key_for, derive_cache_key, derive_streaming_cache_key,
    streaming_cache_key_for,
};
pub use config::{GatewayCacheConfig, LOG_QUEUE};
pub use context::{DependencyHealth, GatewayContext, HealthReport, HealthStatus};
pub use error::{GatewayError, Result};
pub use kv::{Clock, KvStore, KvStoreError, ManualClock, MemoryKvStore, SystemClock};
pub use queue::KvQueue;
pub use store_types::{
    CUSTOM_PROVIDER, CachePolicy, CredentialStatus, Lookup, Organization, Project,
    ProviderCredential, UsageRecord,
};
pub use stream_cache::{
    StreamCapture, StreamingCacheChunk, StreamingCacheEntry, StreamingCacheMetadata,
    UpstreamChunk, capture_stream,
};

#[cfg(feature = "store-redis")]
pub use redis_store::RedisKvStore;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::{SqliteBackingStore, SqliteStoreError};
