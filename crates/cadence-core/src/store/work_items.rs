use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::rows::*;
use super::TenantStore;
use crate::types::{ComplianceFailure, WorkItem};

impl TenantStore {
    /// Upsert by the unique key `(source_config_id, external_id)`.
    ///
    /// Returns the canonical row id: the pre-existing one when the item was
    /// already known, the item's own id on first insert.
    pub async fn upsert_work_item(&self, item: &WorkItem) -> crate::Result<Uuid> {
        let id = item.id.to_string();
        let source_config_id = item.source_config_id.to_string();
        let external_id = item.external_id.clone();
        let title = item.title.clone();
        let description = item.description.clone();
        let item_type = enum_to_sql(&item.item_type);
        let status = item.status.clone();
        let status_category = enum_to_sql(&item.status_category);
        let priority = item.priority.clone();
        let parent_id = item.parent_id.map(|u| u.to_string());
        let story_points = item.story_points;
        let ai_usage_percent = item.ai_usage_percent;
        let coverage_percent = item.coverage_percent;
        let creator_email = item.creator_email.clone();
        let assignee_email = item.assignee_email.clone();
        let assignee_name = item.assignee_name.clone();
        let resolved_assignee_id = item.resolved_assignee_id.map(|u| u.to_string());
        let sprint_id = item.sprint_id.map(|u| u.to_string());
        let created_at = item.created_at.to_rfc3339();
        let updated_at = item.updated_at.to_rfc3339();
        let started_at = item.started_at.map(|d| d.to_rfc3339());
        let resolved_at = item.resolved_at.map(|d| d.to_rfc3339());
        let ac_quality = item.ac_quality.as_ref().map(enum_to_sql);
        let unit_testing_status = item.unit_testing_status.as_ref().map(enum_to_sql);
        let pr_links = serde_json::to_string(&item.pr_links)?;
        let reviewer_dmt_signoff = item.reviewer_dmt_signoff;
        let dmt_exception_required = item.dmt_exception_required;
        let dmt_exception_reason = item.dmt_exception_reason.clone();
        let dmt_exception_approver = item.dmt_exception_approver.clone();
        let dmt_compliant = item.dmt_compliant;
        let compliance_failures = serde_json::to_string(&item.compliance_failures)?;
        let raw_source_data = item.raw_source_data.as_ref().map(|v| v.to_string());

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO work_items (id, source_config_id, external_id, title,
                        description, item_type, status, status_category, priority, parent_id,
                        story_points, ai_usage_percent, coverage_percent, creator_email,
                        assignee_email, assignee_name, resolved_assignee_id, sprint_id,
                        created_at, updated_at, started_at, resolved_at, ac_quality,
                        unit_testing_status, pr_links, reviewer_dmt_signoff,
                        dmt_exception_required, dmt_exception_reason, dmt_exception_approver,
                        dmt_compliant, compliance_failures, raw_source_data)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,
                             ?19,?20,?21,?22,?23,?24,?25,?26,?27,?28,?29,?30,?31,?32)
                     ON CONFLICT(source_config_id, external_id) DO UPDATE SET
                        title=excluded.title, description=excluded.description,
                        item_type=excluded.item_type, status=excluded.status,
                        status_category=excluded.status_category, priority=excluded.priority,
                        parent_id=excluded.parent_id, story_points=excluded.story_points,
                        ai_usage_percent=excluded.ai_usage_percent,
                        coverage_percent=excluded.coverage_percent,
                        creator_email=excluded.creator_email,
                        assignee_email=excluded.assignee_email,
                        assignee_name=excluded.assignee_name,
                        resolved_assignee_id=excluded.resolved_assignee_id,
                        sprint_id=excluded.sprint_id, created_at=excluded.created_at,
                        updated_at=excluded.updated_at, started_at=excluded.started_at,
                        resolved_at=excluded.resolved_at, ac_quality=excluded.ac_quality,
                        unit_testing_status=excluded.unit_testing_status,
                        pr_links=excluded.pr_links,
                        reviewer_dmt_signoff=excluded.reviewer_dmt_signoff,
                        dmt_exception_required=excluded.dmt_exception_required,
                        dmt_exception_reason=excluded.dmt_exception_reason,
                        dmt_exception_approver=excluded.dmt_exception_approver,
                        dmt_compliant=excluded.dmt_compliant,
                        compliance_failures=excluded.compliance_failures,
                        raw_source_data=excluded.raw_source_data",
                    rusqlite::params![
                        id,
                        source_config_id,
                        external_id,
                        title,
                        description,
                        item_type,
                        status,
                        status_category,
                        priority,
                        parent_id,
                        story_points,
                        ai_usage_percent,
                        coverage_percent,
                        creator_email,
                        assignee_email,
                        assignee_name,
                        resolved_assignee_id,
                        sprint_id,
                        created_at,
                        updated_at,
                        started_at,
                        resolved_at,
                        ac_quality,
                        unit_testing_status,
                        pr_links,
                        reviewer_dmt_signoff,
                        dmt_exception_required,
                        dmt_exception_reason,
                        dmt_exception_approver,
                        dmt_compliant,
                        compliance_failures,
                        raw_source_data,
                    ],
                )?;
                Ok(())
            })
            .await?;

        // The unique key resolves the canonical id regardless of whether the
        // statement inserted or updated.
        self.work_item_id(item.source_config_id, &item.external_id)
            .await?
            .ok_or(crate::CoreError::NotFound {
                entity: "work_item",
                id: item.external_id.clone(),
            })
    }

    /// Canonical row id for `(source_config_id, external_id)`, if present.
    pub async fn work_item_id(
        &self,
        source_config_id: Uuid,
        external_id: &str,
    ) -> crate::Result<Option<Uuid>> {
        let source = source_config_id.to_string();
        let external = external_id.to_string();
        let id = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM work_items WHERE source_config_id = ?1 AND external_id = ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![source, external])?;
                match rows.next()? {
                    Some(row) => {
                        let raw: String = row.get(0)?;
                        Ok(Some(raw))
                    }
                    None => Ok(None),
                }
            })
            .await?;
        Ok(id.map(|s| parse_uuid(&s)))
    }

    pub async fn get_work_item(&self, id: Uuid) -> crate::Result<Option<WorkItem>> {
        let id_str = id.to_string();
        let item = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_work_item(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(item)
    }

    pub async fn get_work_item_by_external(
        &self,
        source_config_id: Uuid,
        external_id: &str,
    ) -> crate::Result<Option<WorkItem>> {
        let source = source_config_id.to_string();
        let external = external_id.to_string();
        let item = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items
                     WHERE source_config_id = ?1 AND external_id = ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![source, external])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_work_item(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(item)
    }

    pub async fn list_work_items(&self) -> crate::Result<Vec<WorkItem>> {
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items ORDER BY external_id"
                ))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_work_item(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(items)
    }

    pub async fn list_work_items_for_source(
        &self,
        source_config_id: Uuid,
    ) -> crate::Result<Vec<WorkItem>> {
        let source = source_config_id.to_string();
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items
                     WHERE source_config_id = ?1 ORDER BY external_id"
                ))?;
                let mut rows = stmt.query(rusqlite::params![source])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_work_item(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(items)
    }

    /// Items in a sprint, optionally narrowed to a set of sources (the
    /// per-project scope used by the aggregator).
    pub async fn list_work_items_for_sprint(
        &self,
        sprint_id: Uuid,
        source_ids: Option<&[Uuid]>,
    ) -> crate::Result<Vec<WorkItem>> {
        let sprint = sprint_id.to_string();
        let sources: Option<Vec<String>> =
            source_ids.map(|ids| ids.iter().map(|u| u.to_string()).collect());
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items
                     WHERE sprint_id = ?1 ORDER BY external_id"
                ))?;
                let mut rows = stmt.query(rusqlite::params![sprint])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let item = row_to_work_item(row)?;
                    if let Some(ref allowed) = sources {
                        if !allowed.contains(&item.source_config_id.to_string()) {
                            continue;
                        }
                    }
                    out.push(item);
                }
                Ok(out)
            })
            .await?;
        Ok(items)
    }

    pub async fn list_children(&self, parent_id: Uuid) -> crate::Result<Vec<WorkItem>> {
        let parent = parent_id.to_string();
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items WHERE parent_id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![parent])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_work_item(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(items)
    }

    /// Items stuck in progress with no update since the cutoff.
    pub async fn list_stagnant_work_items(
        &self,
        cutoff: DateTime<Utc>,
        source_ids: Option<&[Uuid]>,
    ) -> crate::Result<Vec<WorkItem>> {
        let cutoff = cutoff.to_rfc3339();
        let sources: Option<Vec<String>> =
            source_ids.map(|ids| ids.iter().map(|u| u.to_string()).collect());
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items
                     WHERE status_category = 'in_progress' AND updated_at < ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![cutoff])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let item = row_to_work_item(row)?;
                    if let Some(ref allowed) = sources {
                        if !allowed.contains(&item.source_config_id.to_string()) {
                            continue;
                        }
                    }
                    out.push(item);
                }
                Ok(out)
            })
            .await?;
        Ok(items)
    }

    pub async fn set_work_item_parent(
        &self,
        id: Uuid,
        parent_id: Option<Uuid>,
    ) -> crate::Result<()> {
        let id = id.to_string();
        let parent = parent_id.map(|u| u.to_string());
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE work_items SET parent_id = ?2 WHERE id = ?1",
                    rusqlite::params![id, parent],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_work_item_compliance(
        &self,
        id: Uuid,
        compliant: bool,
        failures: &[ComplianceFailure],
    ) -> crate::Result<()> {
        let id = id.to_string();
        let failures = serde_json::to_string(failures)?;
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE work_items SET dmt_compliant = ?2, compliance_failures = ?3
                     WHERE id = ?1",
                    rusqlite::params![id, compliant, failures],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Count (total, compliant) over all items, optionally narrowed to a set
    /// of sources. Used by the live compliance fallback.
    pub async fn count_compliance(
        &self,
        source_ids: Option<&[Uuid]>,
    ) -> crate::Result<(u32, u32)> {
        let items = match source_ids {
            Some(ids) => {
                let mut all = Vec::new();
                for id in ids {
                    all.extend(self.list_work_items_for_source(*id).await?);
                }
                all
            }
            None => self.list_work_items().await?,
        };
        let total = items.len() as u32;
        let compliant = items.iter().filter(|i| i.dmt_compliant).count() as u32;
        Ok((total, compliant))
    }

    /// Retention: delete done items resolved before the cutoff.
    pub async fn delete_work_items_resolved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> crate::Result<usize> {
        let cutoff = cutoff.to_rfc3339();
        let deleted = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM work_items
                     WHERE status_category = 'done'
                       AND resolved_at IS NOT NULL AND resolved_at < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(n)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn count_work_items(&self, created_before: DateTime<Utc>) -> crate::Result<(u32, u32)> {
        let cutoff = created_before.to_rfc3339();
        let counts = self
            .conn()
            .call(move |conn| {
                let total: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM work_items WHERE created_at < ?1",
                    rusqlite::params![cutoff],
                    |r| r.get(0),
                )?;
                let compliant: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM work_items
                     WHERE created_at < ?1 AND dmt_compliant = 1",
                    rusqlite::params![cutoff],
                    |r| r.get(0),
                )?;
                Ok((total, compliant))
            })
            .await?;
        Ok(counts)
    }

    /// Items resolved within `[from, to)`, for the daily aggregation.
    pub async fn list_resolved_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> crate::Result<Vec<WorkItem>> {
        let from = from.to_rfc3339();
        let to = to.to_rfc3339();
        let items = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORK_ITEM_COLS} FROM work_items
                     WHERE resolved_at IS NOT NULL AND resolved_at >= ?1 AND resolved_at < ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![from, to])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_work_item(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(items)
    }
}
