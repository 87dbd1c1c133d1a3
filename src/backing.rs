//! Authoritative row lookups. Failures here are never masked.

use async_trait::async_trait;
use thiserror::Error;

use crate::store_types::{Organization, Project, ProviderCredential, UsageRecord};

#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackingStoreError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackingStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn find_project_by_id(&self, id: &str) -> Result<Option<Project>, BackingStoreError>;

    async fn find_organization_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Organization>, BackingStoreError>;

    /// Only rows with `status = active` qualify.
    async fn find_active_provider_credential(
        &self,
        organization_id: &str,
        provider: &str,
    ) -> Result<Option<ProviderCredential>, BackingStoreError>;

    /// Matches `provider = "custom"` rows by name. Only active rows qualify.
    async fn find_active_custom_provider_credential(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<ProviderCredential>, BackingStoreError>;

    async fn ping(&self) -> Result<(), BackingStoreError>;
}

/// Destination for drained usage records.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn insert_usage_records(&self, records: &[UsageRecord])
    -> Result<(), BackingStoreError>;
}
