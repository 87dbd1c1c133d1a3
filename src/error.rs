use thiserror::Error;

use crate::backing::BackingStoreError;
use crate::kv::KvStoreError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("backing store error: {0}")]
    BackingStore(#[from] BackingStoreError),
    #[error("queue error: {0}")]
    Queue(#[from] KvStoreError),
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
