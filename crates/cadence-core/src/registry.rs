//! Tenant registry.
//!
//! The platform database holds one row per tenant; each tenant's delivery
//! data lives in its own SQLite file under `{data_dir}/tenants/`. Opening a
//! context for a schema name that has no tenant row is an error; jobs never
//! fall through to a shared partition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::store::TenantStore;
use crate::tenant::TenantContext;
use crate::types::{slugify, Tenant, TenantStatus};
use crate::CoreError;

pub struct Registry {
    conn: Connection,
    data_dir: Option<PathBuf>,
    /// Open store handles, one per schema name.
    stores: DashMap<String, Arc<TenantStore>>,
}

impl Registry {
    /// Open (or create) the platform database under `data_dir` and ensure
    /// the tenant tree exists.
    pub async fn open(data_dir: impl AsRef<Path>) -> crate::Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(data_dir.join("tenants"))
            .map_err(|e| CoreError::Config(format!("cannot create data dir: {e}")))?;
        let conn = Connection::open(data_dir.join("platform.db")).await?;
        let registry = Self {
            conn,
            data_dir: Some(data_dir),
            stores: DashMap::new(),
        };
        registry.init_schema().await?;
        Ok(registry)
    }

    /// Fully in-memory registry; tenant stores are in-memory too (tests).
    pub async fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let registry = Self {
            conn,
            data_dir: None,
            stores: DashMap::new(),
        };
        registry.init_schema().await?;
        Ok(registry)
    }

    async fn init_schema(&self) -> crate::Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS tenants (
                        id                       TEXT PRIMARY KEY,
                        name                     TEXT NOT NULL,
                        slug                     TEXT NOT NULL UNIQUE,
                        schema_name              TEXT NOT NULL UNIQUE,
                        status                   TEXT NOT NULL,
                        retention_work_items     INTEGER NOT NULL DEFAULT 12,
                        retention_ai_insights    INTEGER NOT NULL DEFAULT 6,
                        retention_pull_requests  INTEGER NOT NULL DEFAULT 12,
                        ai_provider              TEXT NOT NULL DEFAULT 'gemini',
                        ai_model                 TEXT,
                        ai_api_key               TEXT,
                        ai_base_url              TEXT,
                        created_on               TEXT NOT NULL,
                        updated_at               TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tenant CRUD
    // -----------------------------------------------------------------------

    /// Create a tenant. The slug is derived from the name and deduplicated
    /// with a `-N` suffix; the storage partition is allocated immediately.
    pub async fn create_tenant(
        &self,
        name: &str,
        schema_name: &str,
    ) -> crate::Result<Tenant> {
        let mut tenant = Tenant::new(name, schema_name);

        let base = if tenant.slug.is_empty() {
            slugify(schema_name)
        } else {
            tenant.slug.clone()
        };
        let mut candidate = base.clone();
        let mut i = 1u32;
        while self.slug_taken(&candidate).await? {
            i += 1;
            candidate = format!("{base}-{i}");
        }
        tenant.slug = candidate;

        self.save_tenant(&tenant).await?;
        // Allocate the partition up front so the first sync has a store.
        self.store_for(&tenant.schema_name).await?;
        Ok(tenant)
    }

    async fn slug_taken(&self, slug: &str) -> crate::Result<bool> {
        let slug = slug.to_string();
        let taken = self
            .conn
            .call(move |conn| {
                let n: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM tenants WHERE slug = ?1",
                    rusqlite::params![slug],
                    |r| r.get(0),
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(taken)
    }

    /// Insert or update a tenant row.
    pub async fn save_tenant(&self, tenant: &Tenant) -> crate::Result<()> {
        let id = tenant.id.to_string();
        let name = tenant.name.clone();
        let slug = tenant.slug.clone();
        let schema_name = tenant.schema_name.clone();
        let status = serde_json::to_string(&tenant.status)?
            .trim_matches('"')
            .to_string();
        let retention_wi = tenant.retention_work_items as i64;
        let retention_ai = tenant.retention_ai_insights as i64;
        let retention_pr = tenant.retention_pull_requests as i64;
        let ai_provider = serde_json::to_string(&tenant.ai_provider)?
            .trim_matches('"')
            .to_string();
        let ai_model = tenant.ai_model.clone();
        let ai_api_key = tenant.ai_api_key.clone();
        let ai_base_url = tenant.ai_base_url.clone();
        let created_on = tenant.created_on.to_rfc3339();
        let updated_at = tenant.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tenants (id, name, slug, schema_name, status,
                        retention_work_items, retention_ai_insights, retention_pull_requests,
                        ai_provider, ai_model, ai_api_key, ai_base_url, created_on, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
                     ON CONFLICT(id) DO UPDATE SET
                        name=excluded.name, slug=excluded.slug, status=excluded.status,
                        retention_work_items=excluded.retention_work_items,
                        retention_ai_insights=excluded.retention_ai_insights,
                        retention_pull_requests=excluded.retention_pull_requests,
                        ai_provider=excluded.ai_provider, ai_model=excluded.ai_model,
                        ai_api_key=excluded.ai_api_key, ai_base_url=excluded.ai_base_url,
                        updated_at=excluded.updated_at",
                    rusqlite::params![
                        id,
                        name,
                        slug,
                        schema_name,
                        status,
                        retention_wi,
                        retention_ai,
                        retention_pr,
                        ai_provider,
                        ai_model,
                        ai_api_key,
                        ai_base_url,
                        created_on,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_tenant(&self, id: Uuid) -> crate::Result<Option<Tenant>> {
        let id = id.to_string();
        self.query_one("id = ?1", id).await
    }

    pub async fn get_tenant_by_schema(&self, schema_name: &str) -> crate::Result<Option<Tenant>> {
        self.query_one("schema_name = ?1", schema_name.to_string())
            .await
    }

    pub async fn get_tenant_by_slug(&self, slug: &str) -> crate::Result<Option<Tenant>> {
        self.query_one("slug = ?1", slug.to_string()).await
    }

    async fn query_one(&self, predicate: &str, param: String) -> crate::Result<Option<Tenant>> {
        let sql = format!(
            "SELECT id, name, slug, schema_name, status, retention_work_items,
                    retention_ai_insights, retention_pull_requests, ai_provider, ai_model,
                    ai_api_key, ai_base_url, created_on, updated_at
             FROM tenants WHERE {predicate}"
        );
        let tenant = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params![param])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_tenant(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(tenant)
    }

    pub async fn list_tenants(&self, status: Option<TenantStatus>) -> crate::Result<Vec<Tenant>> {
        let tenants = self
            .conn
            .call(move |conn| {
                let sql = "SELECT id, name, slug, schema_name, status, retention_work_items,
                        retention_ai_insights, retention_pull_requests, ai_provider, ai_model,
                        ai_api_key, ai_base_url, created_on, updated_at
                    FROM tenants ORDER BY name";
                let mut stmt = conn.prepare(sql)?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_tenant(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(match status {
            Some(s) => tenants.into_iter().filter(|t| t.status == s).collect(),
            None => tenants,
        })
    }

    // -----------------------------------------------------------------------
    // Store handles / contexts
    // -----------------------------------------------------------------------

    /// The open store for a schema name, creating the database on first use.
    pub async fn store_for(&self, schema_name: &str) -> crate::Result<Arc<TenantStore>> {
        if let Some(store) = self.stores.get(schema_name) {
            return Ok(store.clone());
        }
        let store = match &self.data_dir {
            Some(dir) => {
                let path = dir.join("tenants").join(format!("{schema_name}.db"));
                Arc::new(TenantStore::open(path).await?)
            }
            None => Arc::new(TenantStore::open_in_memory().await?),
        };
        self.stores
            .insert(schema_name.to_string(), store.clone());
        Ok(store)
    }

    /// Open a tenant context for a job. Unknown schema names are an error.
    pub async fn open_context(&self, schema_name: &str) -> crate::Result<TenantContext> {
        let tenant = self
            .get_tenant_by_schema(schema_name)
            .await?
            .ok_or_else(|| CoreError::TenantNotFound(schema_name.to_string()))?;
        let store = self.store_for(schema_name).await?;
        Ok(TenantContext::new(tenant, store))
    }
}

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tenant> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let retention_wi: i64 = row.get(5)?;
    let retention_ai: i64 = row.get(6)?;
    let retention_pr: i64 = row.get(7)?;
    let ai_provider: String = row.get(8)?;
    let created_on: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str) -> serde_json::Result<T> {
        serde_json::from_str(&format!("\"{raw}\""))
    }

    Ok(Tenant {
        id: Uuid::parse_str(&id).expect("valid uuid"),
        name: row.get(1)?,
        slug: row.get(2)?,
        schema_name: row.get(3)?,
        status: parse_enum(&status).expect("valid status"),
        retention_work_items: retention_wi as u32,
        retention_ai_insights: retention_ai as u32,
        retention_pull_requests: retention_pr as u32,
        ai_provider: parse_enum(&ai_provider).expect("valid provider"),
        ai_model: row.get(9)?,
        ai_api_key: row.get(10)?,
        ai_base_url: row.get(11)?,
        created_on: chrono::DateTime::parse_from_rfc3339(&created_on)
            .expect("valid date")
            .with_timezone(&chrono::Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .expect("valid date")
            .with_timezone(&chrono::Utc),
    })
}
