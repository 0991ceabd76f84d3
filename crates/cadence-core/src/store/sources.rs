use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::rows::*;
use super::TenantStore;
use crate::types::{Project, SourceConfiguration};

/// Partial update for a source configuration. `None` fields are left alone.
#[derive(Debug, Default, Clone)]
pub struct SourcePatch {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_token: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub workspace_id: Option<Option<String>>,
    pub config_json: Option<serde_json::Value>,
    pub field_mappings: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// The `active_folder_id` before and after a config update. The caller (the
/// orchestrator, not the storage layer) decides whether a change warrants a
/// sync job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderChange {
    pub old_folder: Option<String>,
    pub new_folder: Option<String>,
}

impl FolderChange {
    pub fn changed(&self) -> bool {
        self.old_folder != self.new_folder
    }
}

impl TenantStore {
    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn insert_project(&self, project: &Project) -> crate::Result<()> {
        let id = project.id.to_string();
        let tenant_id = project.tenant_id.to_string();
        let name = project.name.clone();
        let key = project.key.clone();
        let description = project.description.clone();
        let is_active = project.is_active;
        let threshold = project.default_coverage_threshold;
        let created_at = project.created_at.to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO projects (id, tenant_id, name, key, description, is_active,
                        default_coverage_threshold, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    rusqlite::params![
                        id, tenant_id, name, key, description, is_active, threshold, created_at
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_project(&self, id: Uuid) -> crate::Result<Option<Project>> {
        let id_str = id.to_string();
        let project = self
            .conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_project(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(project)
    }

    pub async fn list_projects(&self) -> crate::Result<Vec<Project>> {
        let projects = self
            .conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {PROJECT_COLS} FROM projects ORDER BY name"))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_project(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(projects)
    }

    // -----------------------------------------------------------------------
    // Source configurations
    // -----------------------------------------------------------------------

    pub async fn insert_source(&self, source: &SourceConfiguration) -> crate::Result<()> {
        let id = source.id.to_string();
        let project_id = source.project_id.to_string();
        let source_type = enum_to_sql(&source.source_type);
        let name = source.name.clone();
        let base_url = source.base_url.clone();
        let api_token = source.api_token.clone();
        let username = source.username.clone();
        let workspace_id = source.workspace_id.clone();
        let config_json = source.config_json.to_string();
        let field_mappings = source.field_mappings.to_string();
        let is_active = source.is_active;
        let last_sync_at = source.last_sync_at.map(|d| d.to_rfc3339());
        let last_sync_status = enum_to_sql(&source.last_sync_status);
        let last_error_message = source.last_error_message.clone();
        let consecutive_failures = source.consecutive_failures as i64;
        let failure_alert_threshold = source.failure_alert_threshold as i64;
        let created_at = source.created_at.to_rfc3339();
        let updated_at = source.updated_at.to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO source_configurations (id, project_id, source_type, name,
                        base_url, api_token, username, workspace_id, config_json,
                        field_mappings, is_active, last_sync_at, last_sync_status,
                        last_error_message, consecutive_failures, failure_alert_threshold,
                        created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
                    rusqlite::params![
                        id,
                        project_id,
                        source_type,
                        name,
                        base_url,
                        api_token,
                        username,
                        workspace_id,
                        config_json,
                        field_mappings,
                        is_active,
                        last_sync_at,
                        last_sync_status,
                        last_error_message,
                        consecutive_failures,
                        failure_alert_threshold,
                        created_at,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_source(&self, id: Uuid) -> crate::Result<Option<SourceConfiguration>> {
        let id_str = id.to_string();
        let source = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SOURCE_COLS} FROM source_configurations WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_source(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(source)
    }

    pub async fn list_sources(&self, project_id: Option<Uuid>) -> crate::Result<Vec<SourceConfiguration>> {
        let project = project_id.map(|u| u.to_string());
        let sources = self
            .conn()
            .call(move |conn| {
                let mut out = Vec::new();
                match project {
                    Some(p) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {SOURCE_COLS} FROM source_configurations
                             WHERE project_id = ?1 ORDER BY name"
                        ))?;
                        let mut rows = stmt.query(rusqlite::params![p])?;
                        while let Some(row) = rows.next()? {
                            out.push(row_to_source(row)?);
                        }
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {SOURCE_COLS} FROM source_configurations ORDER BY name"
                        ))?;
                        let mut rows = stmt.query([])?;
                        while let Some(row) = rows.next()? {
                            out.push(row_to_source(row)?);
                        }
                    }
                }
                Ok(out)
            })
            .await?;
        Ok(sources)
    }

    pub async fn list_active_sources(&self) -> crate::Result<Vec<SourceConfiguration>> {
        Ok(self
            .list_sources(None)
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .collect())
    }

    /// Apply a partial update and report the `active_folder_id` transition.
    pub async fn update_source_config(
        &self,
        id: Uuid,
        patch: SourcePatch,
    ) -> crate::Result<(SourceConfiguration, FolderChange)> {
        let mut source = self
            .get_source(id)
            .await?
            .ok_or(crate::CoreError::NotFound {
                entity: "source_configuration",
                id: id.to_string(),
            })?;

        let old_folder = source.active_folder_id();

        if let Some(name) = patch.name {
            source.name = name;
        }
        if let Some(base_url) = patch.base_url {
            source.base_url = base_url;
        }
        if let Some(api_token) = patch.api_token {
            source.api_token = api_token;
        }
        if let Some(username) = patch.username {
            source.username = username;
        }
        if let Some(workspace_id) = patch.workspace_id {
            source.workspace_id = workspace_id;
        }
        if let Some(config_json) = patch.config_json {
            source.config_json = config_json;
        }
        if let Some(field_mappings) = patch.field_mappings {
            source.field_mappings = field_mappings;
        }
        if let Some(is_active) = patch.is_active {
            source.is_active = is_active;
        }
        source.updated_at = Utc::now();

        let new_folder = source.active_folder_id();

        let id_str = source.id.to_string();
        let name = source.name.clone();
        let base_url = source.base_url.clone();
        let api_token = source.api_token.clone();
        let username = source.username.clone();
        let workspace_id = source.workspace_id.clone();
        let config_json = source.config_json.to_string();
        let field_mappings = source.field_mappings.to_string();
        let is_active = source.is_active;
        let updated_at = source.updated_at.to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE source_configurations SET
                        name = ?2, base_url = ?3, api_token = ?4, username = ?5,
                        workspace_id = ?6, config_json = ?7, field_mappings = ?8,
                        is_active = ?9, updated_at = ?10
                     WHERE id = ?1",
                    rusqlite::params![
                        id_str,
                        name,
                        base_url,
                        api_token,
                        username,
                        workspace_id,
                        config_json,
                        field_mappings,
                        is_active,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok((
            source,
            FolderChange {
                old_folder,
                new_folder,
            },
        ))
    }

    /// Transition a source into `in_progress`. Returns false when the row is
    /// already in progress, acting as the per-source lock that rejects
    /// overlapping syncs.
    pub async fn try_mark_sync_started(&self, id: Uuid) -> crate::Result<bool> {
        let id = id.to_string();
        let started = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE source_configurations SET last_sync_status = 'in_progress'
                     WHERE id = ?1 AND last_sync_status != 'in_progress'",
                    rusqlite::params![id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(started)
    }

    pub async fn record_sync_success(&self, id: Uuid, at: DateTime<Utc>) -> crate::Result<()> {
        let id = id.to_string();
        let at = at.to_rfc3339();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE source_configurations SET
                        last_sync_status = 'success', last_sync_at = ?2,
                        last_error_message = NULL, consecutive_failures = 0
                     WHERE id = ?1",
                    rusqlite::params![id, at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Record a failure and return the new consecutive-failure count.
    pub async fn record_sync_failure(&self, id: Uuid, error: &str) -> crate::Result<u32> {
        let id = id.to_string();
        let error = error.to_string();
        let failures = self
            .conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE source_configurations SET
                        last_sync_status = 'failed', last_error_message = ?2,
                        consecutive_failures = consecutive_failures + 1
                     WHERE id = ?1",
                    rusqlite::params![id, error],
                )?;
                let n: i64 = conn.query_row(
                    "SELECT consecutive_failures FROM source_configurations WHERE id = ?1",
                    rusqlite::params![id],
                    |r| r.get(0),
                )?;
                Ok(n as u32)
            })
            .await?;
        Ok(failures)
    }

    /// Record a transient failure that the scheduler will retry. The status
    /// leaves `in_progress` so the retry can claim the source again, but the
    /// consecutive-failure count only moves once retries exhaust.
    pub async fn record_sync_retry(&self, id: Uuid, error: &str) -> crate::Result<()> {
        let id = id.to_string();
        let error = error.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE source_configurations SET
                        last_sync_status = 'failed', last_error_message = ?2
                     WHERE id = ?1",
                    rusqlite::params![id, error],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Reset a stuck `in_progress` row (worker death recovery).
    pub async fn reset_stuck_sync(&self, id: Uuid) -> crate::Result<()> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE source_configurations SET last_sync_status = 'failed',
                        last_error_message = 'sync interrupted'
                     WHERE id = ?1 AND last_sync_status = 'in_progress'",
                    rusqlite::params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
