use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::backing::{BackingStore, BackingStoreError, UsageSink};
use crate::kv::{KvStore, KvStoreError};
use crate::store_types::{
    CUSTOM_PROVIDER, Organization, Project, ProviderCredential, UsageRecord,
};

#[derive(Debug, Default)]
pub(crate) struct FailingKvStore {
    calls: AtomicUsize,
}

impl FailingKvStore {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> KvStoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        KvStoreError::backend("kv unavailable")
    }
}

#[async_trait]
impl KvStore for FailingKvStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvStoreError> {
        Err(self.fail())
    }

    async fn set(
        &self,
        _key: &str,
        _value: &str,
        _ttl_seconds: Option<u64>,
    ) -> Result<(), KvStoreError> {
        Err(self.fail())
    }

    async fn delete(&self, _key: &str) -> Result<(), KvStoreError> {
        Err(self.fail())
    }

    async fn ping(&self) -> Result<String, KvStoreError> {
        Err(self.fail())
    }
}

#[derive(Debug, Default)]
pub(crate) struct CountingBackingStore {
    projects: HashMap<String, Project>,
    organizations: HashMap<String, Organization>,
    credentials: Vec<ProviderCredential>,
    pub(crate) usage: Mutex<Vec<UsageRecord>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingBackingStore {
    pub(crate) fn with_project(mut self, project: Project) -> Self {
        self.projects.insert(project.id.clone(), project);
        self
    }

    pub(crate) fn with_organization(mut self, organization: Organization) -> Self {
        self.organizations
            .insert(organization.id.clone(), organization);
        self
    }

    pub(crate) fn with_credential(mut self, credential: ProviderCredential) -> Self {
        self.credentials.push(credential);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn enter(&self) -> Result<(), BackingStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackingStoreError::new("database unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for CountingBackingStore {
    async fn find_project_by_id(&self, id: &str) -> Result<Option<Project>, BackingStoreError> {
        self.enter()?;
        Ok(self.projects.get(id).cloned())
    }

    async fn find_organization_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Organization>, BackingStoreError> {
        self.enter()?;
        Ok(self.organizations.get(id).cloned())
    }

    async fn find_active_provider_credential(
        &self,
        organization_id: &str,
        provider: &str,
    ) -> Result<Option<ProviderCredential>, BackingStoreError> {
        self.enter()?;
        Ok(self
            .credentials
            .iter()
            .find(|credential| {
                credential.is_active()
                    && credential.organization_id == organization_id
                    && credential.provider == provider
            })
            .cloned())
    }

    async fn find_active_custom_provider_credential(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<ProviderCredential>, BackingStoreError> {
        self.enter()?;
        Ok(self
            .credentials
            .iter()
            .find(|credential| {
                credential.is_active()
                    && credential.organization_id == organization_id
                    && credential.provider == CUSTOM_PROVIDER
                    && credential.name.as_deref() == Some(name)
            })
            .cloned())
    }

    async fn ping(&self) -> Result<(), BackingStoreError> {
        self.enter()
    }
}

#[async_trait]
impl UsageSink for CountingBackingStore {
    async fn insert_usage_records(
        &self,
        records: &[UsageRecord],
    ) -> Result<(), BackingStoreError> {
        self.enter()?;
        self.usage
            .lock()
            .map_err(|_| BackingStoreError::new("usage lock poisoned"))?
            .extend_from_slice(records);
        Ok(())
    }
}
