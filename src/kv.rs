//! Strict key/value store seam.
//!
//! Implementations report every failure. The best-effort behaviour callers
//! see lives in [`crate::cache::CacheLayer`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum KvStoreError {
    #[cfg(feature = "store-redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kv backend error: {message}")]
    Backend { message: String },
}

impl KvStoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError>;

    /// `ttl_seconds = None` stores without expiry.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<(), KvStoreError>;

    async fn delete(&self, key: &str) -> Result<(), KvStoreError>;

    async fn ping(&self) -> Result<String, KvStoreError>;
}

pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        now.as_secs()
    }
}

/// Clock that only moves when told to. Shared handles observe the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Option<u64>,
}

/// In-process store with TTL evaluated lazily against a [`Clock`].
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKvStore").finish_non_exhaustive()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        let now = self.clock.now_epoch_seconds();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| !is_expired(entry, now));
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn is_expired(entry: &MemoryEntry, now: u64) -> bool {
    entry.expires_at.is_some_and(|expires_at| now >= expires_at)
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let now = self.clock.now_epoch_seconds();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if is_expired(entry, now) {
            entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<(), KvStoreError> {
        let now = self.clock.now_epoch_seconds();
        let expires_at = ttl_seconds.map(|ttl| now.saturating_add(ttl));
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<String, KvStoreError> {
        Ok("PONG".to_string())
    }
}
