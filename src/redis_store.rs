use async_trait::async_trait;
use redis::AsyncCommands;

use crate::kv::{KvStore, KvStoreError};

/// Redis-backed [`KvStore`]. Every key is namespaced under `prefix`.
#[derive(Clone, Debug)]
pub struct RedisKvStore {
    client: redis::Client,
    prefix: String,
}

impl RedisKvStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self, KvStoreError> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())?,
            prefix: "llmgateway".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn namespaced(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.prefix)
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.namespaced(key)).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<(), KvStoreError> {
        let mut conn = self.connection().await?;
        let key = self.namespaced(key);
        match ttl_seconds {
            // SET EX rejects zero; an already-expired write is a delete.
            Some(0) => {
                let _: () = conn.del(key).await?;
            }
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.namespaced(key)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<String, KvStoreError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }
}

#[cfg(test)]
mod tests;
