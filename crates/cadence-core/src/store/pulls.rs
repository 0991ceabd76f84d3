use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::rows::*;
use super::TenantStore;
use crate::types::{PullRequest, PullRequestStatus};

impl TenantStore {
    /// Upsert by `(source_config_id, external_id)`, returning the canonical
    /// row id.
    pub async fn upsert_pull_request(&self, pr: &PullRequest) -> crate::Result<Uuid> {
        let id = pr.id.to_string();
        let source_config_id = pr.source_config_id.to_string();
        let external_id = pr.external_id.clone();
        let title = pr.title.clone();
        let author_email = pr.author_email.clone();
        let resolved_author_id = pr.resolved_author_id.map(|u| u.to_string());
        let work_item_id = pr.work_item_id.map(|u| u.to_string());
        let status = enum_to_sql(&pr.status);
        let repository_name = pr.repository_name.clone();
        let source_branch = pr.source_branch.clone();
        let target_branch = pr.target_branch.clone();
        let created_at = pr.created_at.to_rfc3339();
        let updated_at = pr.updated_at.to_rfc3339();
        let merged_at = pr.merged_at.map(|d| d.to_rfc3339());

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO pull_requests (id, source_config_id, external_id, title,
                        author_email, resolved_author_id, work_item_id, status,
                        repository_name, source_branch, target_branch, created_at,
                        updated_at, merged_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
                     ON CONFLICT(source_config_id, external_id) DO UPDATE SET
                        title=excluded.title, author_email=excluded.author_email,
                        resolved_author_id=excluded.resolved_author_id,
                        work_item_id=excluded.work_item_id, status=excluded.status,
                        repository_name=excluded.repository_name,
                        source_branch=excluded.source_branch,
                        target_branch=excluded.target_branch,
                        created_at=excluded.created_at, updated_at=excluded.updated_at,
                        merged_at=excluded.merged_at",
                    rusqlite::params![
                        id,
                        source_config_id,
                        external_id,
                        title,
                        author_email,
                        resolved_author_id,
                        work_item_id,
                        status,
                        repository_name,
                        source_branch,
                        target_branch,
                        created_at,
                        updated_at,
                        merged_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        let source = pr.source_config_id.to_string();
        let external = pr.external_id.clone();
        let canonical = self
            .conn()
            .call(move |conn| {
                let raw: String = conn.query_row(
                    "SELECT id FROM pull_requests
                     WHERE source_config_id = ?1 AND external_id = ?2",
                    rusqlite::params![source, external],
                    |r| r.get(0),
                )?;
                Ok(raw)
            })
            .await?;
        Ok(parse_uuid(&canonical))
    }

    pub async fn get_pull_request(&self, id: Uuid) -> crate::Result<Option<PullRequest>> {
        let id_str = id.to_string();
        let pr = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PULL_REQUEST_COLS} FROM pull_requests WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_pull_request(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(pr)
    }

    pub async fn list_pull_requests(&self) -> crate::Result<Vec<PullRequest>> {
        let prs = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PULL_REQUEST_COLS} FROM pull_requests ORDER BY created_at DESC"
                ))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_pull_request(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(prs)
    }

    pub async fn list_pull_requests_for_source(
        &self,
        source_config_id: Uuid,
    ) -> crate::Result<Vec<PullRequest>> {
        let source = source_config_id.to_string();
        let prs = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PULL_REQUEST_COLS} FROM pull_requests
                     WHERE source_config_id = ?1 ORDER BY created_at DESC"
                ))?;
                let mut rows = stmt.query(rusqlite::params![source])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_pull_request(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(prs)
    }

    pub async fn link_pull_request_work_item(
        &self,
        pr_id: Uuid,
        work_item_id: Option<Uuid>,
    ) -> crate::Result<()> {
        let pr = pr_id.to_string();
        let wi = work_item_id.map(|u| u.to_string());
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE pull_requests SET work_item_id = ?2 WHERE id = ?1",
                    rusqlite::params![pr, wi],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Upsert a status check by `(pull_request_id, name)`.
    pub async fn upsert_pr_status(&self, check: &PullRequestStatus) -> crate::Result<()> {
        let id = check.id.to_string();
        let pull_request_id = check.pull_request_id.to_string();
        let name = check.name.clone();
        let state = enum_to_sql(&check.state);
        let target_url = check.target_url.clone();
        let description = check.description.clone();
        let created_at = check.created_at.to_rfc3339();
        let updated_at = check.updated_at.to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO pull_request_statuses (id, pull_request_id, name, state,
                        target_url, description, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
                     ON CONFLICT(pull_request_id, name) DO UPDATE SET
                        state=excluded.state, target_url=excluded.target_url,
                        description=excluded.description, updated_at=excluded.updated_at",
                    rusqlite::params![
                        id,
                        pull_request_id,
                        name,
                        state,
                        target_url,
                        description,
                        created_at,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_pr_statuses(
        &self,
        pull_request_id: Uuid,
    ) -> crate::Result<Vec<PullRequestStatus>> {
        let pr = pull_request_id.to_string();
        let checks = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PR_STATUS_COLS} FROM pull_request_statuses
                     WHERE pull_request_id = ?1 ORDER BY name"
                ))?;
                let mut rows = stmt.query(rusqlite::params![pr])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_pr_status(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(checks)
    }

    /// PRs merged within `[from, to)` (daily aggregation).
    pub async fn count_prs_merged_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> crate::Result<u32> {
        let from = from.to_rfc3339();
        let to = to.to_rfc3339();
        let count = self
            .conn()
            .call(move |conn| {
                let n: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM pull_requests
                     WHERE merged_at IS NOT NULL AND merged_at >= ?1 AND merged_at < ?2",
                    rusqlite::params![from, to],
                    |r| r.get(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(count)
    }

    /// Retention: merged PRs past the cutoff, plus anything stale by
    /// `updated_at`.
    pub async fn delete_pull_requests_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> crate::Result<usize> {
        let cutoff = cutoff.to_rfc3339();
        let deleted = self
            .conn()
            .call(move |conn| {
                let merged = conn.execute(
                    "DELETE FROM pull_requests
                     WHERE status IN ('merged', 'completed')
                       AND merged_at IS NOT NULL AND merged_at < ?1",
                    rusqlite::params![cutoff],
                )?;
                let stale = conn.execute(
                    "DELETE FROM pull_requests WHERE updated_at < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(merged + stale)
            })
            .await?;
        Ok(deleted)
    }
}
