use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use super::rows::*;
use super::TenantStore;
use crate::types::{DailyMetric, DeveloperMetrics, SprintMetrics};

impl TenantStore {
    /// Upsert keyed by `(sprint_name, sprint_end_date, project)`.
    ///
    /// `project IS NULL` means the tenant-global row; the match is done with
    /// `IS` so null project keys collapse to a single row rather than
    /// multiplying (SQLite UNIQUE treats nulls as distinct).
    pub async fn upsert_sprint_metrics(&self, m: &SprintMetrics) -> crate::Result<Uuid> {
        let id = m.id.to_string();
        let sprint_name = m.sprint_name.clone();
        let sprint_start_date = m.sprint_start_date.map(|d| d.to_string());
        let sprint_end_date = m.sprint_end_date.to_string();
        let project_id = m.project_id.map(|u| u.to_string());
        let velocity = m.velocity;
        let total_points = m.total_story_points_completed;
        let items_completed = m.items_completed as i64;
        let stories_completed = m.stories_completed as i64;
        let bugs_completed = m.bugs_completed as i64;
        let total_items = m.total_items as i64;
        let compliant_items = m.compliant_items as i64;
        let compliance_rate = m.compliance_rate_percent;
        let defect_density = m.defect_density_per_100_points;
        let avg_cycle_time = m.avg_cycle_time_days;
        let pr_health = m.pr_health_percent;
        let now = Utc::now().to_rfc3339();

        let canonical = self
            .conn()
            .call(move |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT id FROM sprint_metrics
                         WHERE sprint_name = ?1 AND sprint_end_date = ?2 AND project_id IS ?3",
                        rusqlite::params![sprint_name, sprint_end_date, project_id],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                match existing {
                    Some(existing_id) => {
                        conn.execute(
                            "UPDATE sprint_metrics SET
                                sprint_start_date = ?2, velocity = ?3,
                                total_story_points_completed = ?4, items_completed = ?5,
                                stories_completed = ?6, bugs_completed = ?7,
                                total_items = ?8, compliant_items = ?9,
                                compliance_rate_percent = ?10,
                                defect_density_per_100_points = ?11,
                                avg_cycle_time_days = ?12, pr_health_percent = ?13,
                                updated_at = ?14
                             WHERE id = ?1",
                            rusqlite::params![
                                existing_id,
                                sprint_start_date,
                                velocity,
                                total_points,
                                items_completed,
                                stories_completed,
                                bugs_completed,
                                total_items,
                                compliant_items,
                                compliance_rate,
                                defect_density,
                                avg_cycle_time,
                                pr_health,
                                now,
                            ],
                        )?;
                        Ok(existing_id)
                    }
                    None => {
                        conn.execute(
                            "INSERT INTO sprint_metrics (id, sprint_name, sprint_start_date,
                                sprint_end_date, project_id, velocity,
                                total_story_points_completed, items_completed,
                                stories_completed, bugs_completed, total_items,
                                compliant_items, compliance_rate_percent,
                                defect_density_per_100_points, avg_cycle_time_days,
                                pr_health_percent, created_at, updated_at)
                             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,
                                     ?17,?17)",
                            rusqlite::params![
                                id,
                                sprint_name,
                                sprint_start_date,
                                sprint_end_date,
                                project_id,
                                velocity,
                                total_points,
                                items_completed,
                                stories_completed,
                                bugs_completed,
                                total_items,
                                compliant_items,
                                compliance_rate,
                                defect_density,
                                avg_cycle_time,
                                pr_health,
                                now,
                            ],
                        )?;
                        Ok(id)
                    }
                }
            })
            .await?;
        Ok(parse_uuid(&canonical))
    }

    /// Last `limit` rollups for a scope, descending by sprint end date.
    pub async fn list_recent_sprint_metrics(
        &self,
        project_id: Option<Uuid>,
        limit: u32,
    ) -> crate::Result<Vec<SprintMetrics>> {
        let project = project_id.map(|u| u.to_string());
        let rows = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SPRINT_METRICS_COLS} FROM sprint_metrics
                     WHERE project_id IS ?1
                     ORDER BY sprint_end_date DESC LIMIT ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_sprint_metrics(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    pub async fn list_sprint_metrics_for_sprint(
        &self,
        sprint_name: &str,
        sprint_end_date: NaiveDate,
    ) -> crate::Result<Vec<SprintMetrics>> {
        let name = sprint_name.to_string();
        let end = sprint_end_date.to_string();
        let rows = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SPRINT_METRICS_COLS} FROM sprint_metrics
                     WHERE sprint_name = ?1 AND sprint_end_date = ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![name, end])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_sprint_metrics(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    /// Upsert keyed by `(developer_email, sprint_name, sprint_end_date,
    /// project)`, with the same `IS`-match for the null project key.
    pub async fn upsert_developer_metrics(&self, m: &DeveloperMetrics) -> crate::Result<Uuid> {
        let id = m.id.to_string();
        let email = m.developer_email.clone();
        let name = m.developer_name.clone();
        let sprint_name = m.sprint_name.clone();
        let sprint_end_date = m.sprint_end_date.to_string();
        let project_id = m.project_id.map(|u| u.to_string());
        let points = m.story_points_completed;
        let items_completed = m.items_completed as i64;
        let prs_authored = m.prs_authored as i64;
        let prs_merged = m.prs_merged as i64;
        let prs_reviewed = m.prs_reviewed as i64;
        let defects = m.defects_attributed as i64;
        let coverage = m.coverage_avg_percent;
        let ai_usage = m.ai_usage_avg_percent;
        let compliance = m.dmt_compliance_rate;
        let cycle_time = m.avg_cycle_time_days;
        let now = Utc::now().to_rfc3339();

        let canonical = self
            .conn()
            .call(move |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT id FROM developer_metrics
                         WHERE developer_email = ?1 AND sprint_name = ?2
                           AND sprint_end_date = ?3 AND project_id IS ?4",
                        rusqlite::params![email, sprint_name, sprint_end_date, project_id],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                match existing {
                    Some(existing_id) => {
                        conn.execute(
                            "UPDATE developer_metrics SET
                                developer_name = ?2, story_points_completed = ?3,
                                items_completed = ?4, prs_authored = ?5, prs_merged = ?6,
                                prs_reviewed = ?7, defects_attributed = ?8,
                                coverage_avg_percent = ?9, ai_usage_avg_percent = ?10,
                                dmt_compliance_rate = ?11, avg_cycle_time_days = ?12,
                                updated_at = ?13
                             WHERE id = ?1",
                            rusqlite::params![
                                existing_id,
                                name,
                                points,
                                items_completed,
                                prs_authored,
                                prs_merged,
                                prs_reviewed,
                                defects,
                                coverage,
                                ai_usage,
                                compliance,
                                cycle_time,
                                now,
                            ],
                        )?;
                        Ok(existing_id)
                    }
                    None => {
                        conn.execute(
                            "INSERT INTO developer_metrics (id, developer_email,
                                developer_name, sprint_name, sprint_end_date, project_id,
                                story_points_completed, items_completed, prs_authored,
                                prs_merged, prs_reviewed, defects_attributed,
                                coverage_avg_percent, ai_usage_avg_percent,
                                dmt_compliance_rate, avg_cycle_time_days, created_at,
                                updated_at)
                             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,
                                     ?17,?17)",
                            rusqlite::params![
                                id,
                                email,
                                name,
                                sprint_name,
                                sprint_end_date,
                                project_id,
                                points,
                                items_completed,
                                prs_authored,
                                prs_merged,
                                prs_reviewed,
                                defects,
                                coverage,
                                ai_usage,
                                compliance,
                                cycle_time,
                                now,
                            ],
                        )?;
                        Ok(id)
                    }
                }
            })
            .await?;
        Ok(parse_uuid(&canonical))
    }

    /// All developer rows for one sprint (any project scope).
    pub async fn list_developer_metrics_for_sprint(
        &self,
        sprint_name: &str,
        sprint_end_date: NaiveDate,
    ) -> crate::Result<Vec<DeveloperMetrics>> {
        let name = sprint_name.to_string();
        let end = sprint_end_date.to_string();
        let rows = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DEVELOPER_METRICS_COLS} FROM developer_metrics
                     WHERE sprint_name = ?1 AND sprint_end_date = ?2
                     ORDER BY developer_email"
                ))?;
                let mut rows = stmt.query(rusqlite::params![name, end])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_developer_metrics(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    /// A developer's last `limit` sprint rows, newest first.
    pub async fn list_recent_developer_metrics(
        &self,
        developer_email: &str,
        limit: u32,
    ) -> crate::Result<Vec<DeveloperMetrics>> {
        let email = developer_email.to_string();
        let rows = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DEVELOPER_METRICS_COLS} FROM developer_metrics
                     WHERE developer_email = ?1
                     ORDER BY sprint_end_date DESC LIMIT ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![email, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_developer_metrics(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(rows)
    }

    /// Upsert the per-day audit row.
    pub async fn upsert_daily_metric(&self, m: &DailyMetric) -> crate::Result<()> {
        let id = m.id.to_string();
        let date = m.date.to_string();
        let total = m.total_work_items as i64;
        let compliant = m.compliant_work_items as i64;
        let rate = m.compliance_rate;
        let cycle_hours = m.avg_cycle_time_hours;
        let prs_merged = m.prs_merged_count as i64;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO daily_metrics (id, date, total_work_items,
                        compliant_work_items, compliance_rate, avg_cycle_time_hours,
                        prs_merged_count, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?8)
                     ON CONFLICT(date) DO UPDATE SET
                        total_work_items=excluded.total_work_items,
                        compliant_work_items=excluded.compliant_work_items,
                        compliance_rate=excluded.compliance_rate,
                        avg_cycle_time_hours=excluded.avg_cycle_time_hours,
                        prs_merged_count=excluded.prs_merged_count,
                        updated_at=excluded.updated_at",
                    rusqlite::params![id, date, total, compliant, rate, cycle_hours, prs_merged, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_daily_metric(&self, date: NaiveDate) -> crate::Result<Option<DailyMetric>> {
        let date = date.to_string();
        let row = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DAILY_METRIC_COLS} FROM daily_metrics WHERE date = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![date])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_daily_metric(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(row)
    }
}
