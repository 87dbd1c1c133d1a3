use serde::{Deserialize, Serialize};

pub const CUSTOM_PROVIDER: &str = "custom";

/// Result of a cache-aside resolution. `NotFound` always means the backing
/// store had no matching row; cache misses never surface here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,
    pub duration_seconds: u64,
}

impl CachePolicy {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            duration_seconds: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Project {
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            name: name.into(),
            caching_enabled: None,
            cache_duration_seconds: None,
            mode: None,
            status: None,
        }
    }

    pub fn cache_policy(&self, default_duration_seconds: u64) -> CachePolicy {
        CachePolicy {
            enabled: self.caching_enabled.unwrap_or(false),
            duration_seconds: self
                .cache_duration_seconds
                .filter(|duration| *duration > 0)
                .unwrap_or(default_duration_seconds),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default = "default_credits")]
    pub credits: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

fn default_credits() -> String {
    "0".to_string()
}

impl Organization {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            credits: default_credits(),
            plan: None,
            retention_level: None,
            status: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    #[default]
    Active,
    Inactive,
    Deleted,
}

impl CredentialStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Inactive => "inactive",
            CredentialStatus::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(CredentialStatus::Active),
            "inactive" => Some(CredentialStatus::Inactive),
            "deleted" => Some(CredentialStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub id: String,
    pub organization_id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub status: CredentialStatus,
}

impl std::fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("id", &self.id)
            .field("organization_id", &self.organization_id)
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("status", &self.status)
            .finish()
    }
}

impl ProviderCredential {
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        provider: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            provider: provider.into(),
            name: None,
            token: token.into(),
            base_url: None,
            status: CredentialStatus::Active,
        }
    }

    pub fn custom(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let mut credential = Self::new(id, organization_id, CUSTOM_PROVIDER, token);
        credential.name = Some(name.into());
        credential
    }

    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }
}

/// One row of the usage log, produced per gateway request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    pub created_at_ms: u64,
    pub organization_id: String,
    pub project_id: String,
    pub api_key_id: String,
    pub duration_ms: u64,
    pub requested_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_provider: Option<String>,
    pub used_model: String,
    pub used_provider: String,
    pub response_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
    #[serde(default)]
    pub streamed: bool,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub canceled: bool,
}
