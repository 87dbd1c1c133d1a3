use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backing::BackingStoreError;
use crate::context::GatewayContext;
use crate::store_types::{CachePolicy, Lookup, Organization, Project, ProviderCredential};
use crate::Result;

pub fn policy_cache_key(project_id: &str) -> String {
    format!("project_cache_config:{project_id}")
}

pub fn project_cache_key(project_id: &str) -> String {
    format!("project:{project_id}")
}

pub fn organization_cache_key(organization_id: &str) -> String {
    format!("organization:{organization_id}")
}

pub fn provider_credential_cache_key(organization_id: &str, provider: &str) -> String {
    format!("provider_key:{organization_id}:{provider}")
}

pub fn custom_provider_credential_cache_key(organization_id: &str, name: &str) -> String {
    format!("custom_provider_key:{organization_id}:{name}")
}

pub fn custom_provider_exists_cache_key(organization_id: &str, candidate: &str) -> String {
    format!("custom_provider_exists:{organization_id}:{candidate}")
}

impl GatewayContext {
    /// Caching policy for a project. A missing project resolves to a
    /// disabled policy, which is cached like any other.
    pub async fn resolve_project_caching_policy(&self, project_id: &str) -> Result<CachePolicy> {
        let key = policy_cache_key(project_id);
        if let Some(policy) = self.cache().get::<CachePolicy>(&key).await {
            tracing::debug!(cache_key = %key, entity = "cache_policy", "cache hit");
            return Ok(policy);
        }

        let project = self.backing().find_project_by_id(project_id).await?;
        let policy = match project {
            Some(project) => project.cache_policy(self.config().default_cache_duration_seconds),
            None => CachePolicy::disabled(),
        };
        self.cache()
            .set(&key, &policy, self.config().policy_ttl_seconds)
            .await;
        Ok(policy)
    }

    pub async fn resolve_project(&self, project_id: &str) -> Result<Lookup<Project>> {
        self.cache_aside("project", project_cache_key(project_id), || {
            self.backing().find_project_by_id(project_id)
        })
        .await
    }

    pub async fn resolve_organization(&self, organization_id: &str) -> Result<Lookup<Organization>> {
        self.cache_aside(
            "organization",
            organization_cache_key(organization_id),
            || self.backing().find_organization_by_id(organization_id),
        )
        .await
    }

    pub async fn resolve_provider_credential(
        &self,
        organization_id: &str,
        provider: &str,
    ) -> Result<Lookup<ProviderCredential>> {
        self.cache_aside(
            "provider_credential",
            provider_credential_cache_key(organization_id, provider),
            || {
                self.backing()
                    .find_active_provider_credential(organization_id, provider)
            },
        )
        .await
    }

    pub async fn resolve_custom_provider_credential(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Lookup<ProviderCredential>> {
        self.cache_aside(
            "custom_provider_credential",
            custom_provider_credential_cache_key(organization_id, name),
            || {
                self.backing()
                    .find_active_custom_provider_credential(organization_id, name)
            },
        )
        .await
    }

    /// Caches the boolean itself, so a negative answer is served from cache
    /// just like a positive one.
    pub async fn custom_provider_exists(
        &self,
        organization_id: &str,
        candidate: &str,
    ) -> Result<bool> {
        let key = custom_provider_exists_cache_key(organization_id, candidate);
        if let Some(exists) = self.cache().get::<bool>(&key).await {
            tracing::debug!(cache_key = %key, entity = "custom_provider_exists", "cache hit");
            return Ok(exists);
        }

        let exists = self
            .backing()
            .find_active_custom_provider_credential(organization_id, candidate)
            .await?
            .is_some();
        self.cache()
            .set(&key, &exists, self.config().entity_ttl_seconds)
            .await;
        Ok(exists)
    }

    async fn cache_aside<T, F, Fut>(
        &self,
        entity: &'static str,
        key: String,
        load: F,
    ) -> Result<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, BackingStoreError>>,
    {
        if let Some(cached) = self.cache().get::<T>(&key).await {
            tracing::debug!(cache_key = %key, entity, "cache hit");
            return Ok(Lookup::Found(cached));
        }

        tracing::debug!(cache_key = %key, entity, "cache miss");
        let Some(row) = load().await? else {
            return Ok(Lookup::NotFound);
        };
        self.cache()
            .set(&key, &row, self.config().entity_ttl_seconds)
            .await;
        Ok(Lookup::Found(row))
    }
}
