use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use thiserror::Error;

use crate::backing::{BackingStore, BackingStoreError, UsageSink};
use crate::store_types::{
    CUSTOM_PROVIDER, CredentialStatus, Organization, Project, ProviderCredential, UsageRecord,
};

#[derive(Clone, Debug)]
pub struct SqliteBackingStore {
    path: PathBuf,
}

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SqliteStoreError> for BackingStoreError {
    fn from(err: SqliteStoreError) -> Self {
        BackingStoreError::with_source("sqlite backing store failed", err)
    }
}

const PROJECT_COLUMNS: &str =
    "id, organization_id, name, caching_enabled, cache_duration_seconds, mode, status";
const ORGANIZATION_COLUMNS: &str = "id, name, credits, plan, retention_level, status";
const PROVIDER_KEY_COLUMNS: &str = "id, organization_id, provider, name, token, base_url, status";

impl SqliteBackingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), SqliteStoreError> {
        self.with_connection(|_conn| Ok(())).await
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, SqliteStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, SqliteStoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<T, SqliteStoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            f(&mut conn)
        })
        .await?
    }

    pub async fn upsert_project(&self, project: &Project) -> Result<(), SqliteStoreError> {
        let project = project.clone();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO project (id, organization_id, name, caching_enabled, cache_duration_seconds, mode, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    organization_id = excluded.organization_id,
                    name = excluded.name,
                    caching_enabled = excluded.caching_enabled,
                    cache_duration_seconds = excluded.cache_duration_seconds,
                    mode = excluded.mode,
                    status = excluded.status",
                rusqlite::params![
                    project.id,
                    project.organization_id,
                    project.name,
                    project.caching_enabled,
                    project.cache_duration_seconds.map(u64_to_i64),
                    project.mode,
                    project.status,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_organization(
        &self,
        organization: &Organization,
    ) -> Result<(), SqliteStoreError> {
        let organization = organization.clone();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO organization (id, name, credits, plan, retention_level, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    credits = excluded.credits,
                    plan = excluded.plan,
                    retention_level = excluded.retention_level,
                    status = excluded.status",
                rusqlite::params![
                    organization.id,
                    organization.name,
                    organization.credits,
                    organization.plan,
                    organization.retention_level,
                    organization.status,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_provider_credential(
        &self,
        credential: &ProviderCredential,
    ) -> Result<(), SqliteStoreError> {
        let credential = credential.clone();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO provider_key (id, organization_id, provider, name, token, base_url, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    organization_id = excluded.organization_id,
                    provider = excluded.provider,
                    name = excluded.name,
                    token = excluded.token,
                    base_url = excluded.base_url,
                    status = excluded.status",
                rusqlite::params![
                    credential.id,
                    credential.organization_id,
                    credential.provider,
                    credential.name,
                    credential.token,
                    credential.base_url,
                    credential.status.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_usage_records(
        &self,
        limit: usize,
    ) -> Result<Vec<UsageRecord>, SqliteStoreError> {
        let limit = i64::try_from(limit.clamp(1, 1000)).unwrap_or(1000);
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record_json FROM log ORDER BY created_at_ms, id LIMIT ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![limit], |row| row.get::<_, String>(0))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(serde_json::from_str(&row?)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl BackingStore for SqliteBackingStore {
    async fn find_project_by_id(&self, id: &str) -> Result<Option<Project>, BackingStoreError> {
        let id = id.to_string();
        let project = self
            .with_connection(move |conn| {
                let sql = format!("SELECT {PROJECT_COLUMNS} FROM project WHERE id = ?1");
                Ok(conn
                    .query_row(&sql, rusqlite::params![id], project_from_row)
                    .optional()?)
            })
            .await?;
        Ok(project)
    }

    async fn find_organization_by_id(
        &self,
        id: &str,
    ) -> Result<Option<Organization>, BackingStoreError> {
        let id = id.to_string();
        let organization = self
            .with_connection(move |conn| {
                let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organization WHERE id = ?1");
                Ok(conn
                    .query_row(&sql, rusqlite::params![id], organization_from_row)
                    .optional()?)
            })
            .await?;
        Ok(organization)
    }

    async fn find_active_provider_credential(
        &self,
        organization_id: &str,
        provider: &str,
    ) -> Result<Option<ProviderCredential>, BackingStoreError> {
        let organization_id = organization_id.to_string();
        let provider = provider.to_string();
        let credential = self
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {PROVIDER_KEY_COLUMNS} FROM provider_key
                     WHERE status = 'active' AND organization_id = ?1 AND provider = ?2
                     LIMIT 1"
                );
                Ok(conn
                    .query_row(
                        &sql,
                        rusqlite::params![organization_id, provider],
                        credential_from_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(credential)
    }

    async fn find_active_custom_provider_credential(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<ProviderCredential>, BackingStoreError> {
        let organization_id = organization_id.to_string();
        let name = name.to_string();
        let credential = self
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {PROVIDER_KEY_COLUMNS} FROM provider_key
                     WHERE status = 'active' AND organization_id = ?1 AND provider = ?2 AND name = ?3
                     LIMIT 1"
                );
                Ok(conn
                    .query_row(
                        &sql,
                        rusqlite::params![organization_id, CUSTOM_PROVIDER, name],
                        credential_from_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(credential)
    }

    async fn ping(&self) -> Result<(), BackingStoreError> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UsageSink for SqliteBackingStore {
    async fn insert_usage_records(
        &self,
        records: &[UsageRecord],
    ) -> Result<(), BackingStoreError> {
        let serialized: Vec<(UsageRecord, String)> = records
            .iter()
            .map(|record| Ok((record.clone(), serde_json::to_string(record)?)))
            .collect::<Result<_, serde_json::Error>>()
            .map_err(SqliteStoreError::from)?;

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            for (record, record_json) in serialized {
                tx.execute(
                    "INSERT INTO log (
                        request_id, created_at_ms, organization_id, project_id, api_key_id,
                        duration_ms, requested_model, requested_provider, used_model, used_provider,
                        response_size, finish_reason, prompt_tokens, completion_tokens, total_tokens,
                        has_error, streamed, cached, canceled, record_json
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                    rusqlite::params![
                        record.request_id,
                        u64_to_i64(record.created_at_ms),
                        record.organization_id,
                        record.project_id,
                        record.api_key_id,
                        u64_to_i64(record.duration_ms),
                        record.requested_model,
                        record.requested_provider,
                        record.used_model,
                        record.used_provider,
                        u64_to_i64(record.response_size),
                        record.finish_reason,
                        record.prompt_tokens.map(u64_to_i64),
                        record.completion_tokens.map(u64_to_i64),
                        record.total_tokens.map(u64_to_i64),
                        record.has_error,
                        record.streamed,
                        record.cached,
                        record.canceled,
                        record_json,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        caching_enabled: row.get(3)?,
        cache_duration_seconds: row.get::<_, Option<i64>>(4)?.map(i64_to_u64),
        mode: row.get(5)?,
        status: row.get(6)?,
    })
}

fn organization_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        credits: row.get(2)?,
        plan: row.get(3)?,
        retention_level: row.get(4)?,
        status: row.get(5)?,
    })
}

fn credential_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderCredential> {
    let raw_status: String = row.get(6)?;
    let status = CredentialStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown provider key status `{raw_status}`").into(),
        )
    })?;
    Ok(ProviderCredential {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        provider: row.get(2)?,
        name: row.get(3)?,
        token: row.get(4)?,
        base_url: row.get(5)?,
        status,
    })
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS organization (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            credits TEXT NOT NULL DEFAULT '0',
            plan TEXT,
            retention_level TEXT,
            status TEXT DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS project (
            id TEXT PRIMARY KEY NOT NULL,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            caching_enabled INTEGER,
            cache_duration_seconds INTEGER,
            mode TEXT,
            status TEXT
        );

        CREATE TABLE IF NOT EXISTS provider_key (
            id TEXT PRIMARY KEY NOT NULL,
            organization_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            name TEXT,
            token TEXT NOT NULL,
            base_url TEXT,
            status TEXT NOT NULL DEFAULT 'active'
        );
        CREATE INDEX IF NOT EXISTS idx_provider_key_org_provider
            ON provider_key(organization_id, provider);

        CREATE TABLE IF NOT EXISTS log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            organization_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            api_key_id TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            requested_model TEXT NOT NULL,
            requested_provider TEXT,
            used_model TEXT NOT NULL,
            used_provider TEXT NOT NULL,
            response_size INTEGER NOT NULL,
            finish_reason TEXT,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            has_error INTEGER NOT NULL DEFAULT 0,
            streamed INTEGER NOT NULL DEFAULT 0,
            cached INTEGER NOT NULL DEFAULT 0,
            canceled INTEGER NOT NULL DEFAULT 0,
            record_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_log_project_created
            ON log(project_id, created_at_ms);",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn u64_to_i64(value: u64) -> i64 {
    if value > i64::MAX as u64 {
        i64::MAX
    } else {
        value as i64
    }
}

fn i64_to_u64(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}
