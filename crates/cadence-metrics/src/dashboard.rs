//! Dashboard reads.
//!
//! Summaries use the last five `SprintMetrics` rows in descending end-date
//! order. A stored compliance rate that drifts more than five percentage
//! points from a live recomputation is overridden at read time, so the
//! dashboard never shows a stale rate while rollups catch up.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cadence_core::tenant::TenantContext;
use cadence_core::types::{SprintStatus, StatusCategory};

use crate::{mean, round1, round2, Result};

/// Maximum allowed drift between the stored rate and a live recomputation.
const COMPLIANCE_DRIFT_TOLERANCE: f64 = 5.0;
const ROLLUP_WINDOW: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintSnapshot {
    pub total_points: f64,
    pub item_count: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightSummary {
    pub id: Uuid,
    pub summary: String,
    pub suggestion_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    /// Current sprint's compliance rate (live-overridden when stale).
    pub compliance_rate: f64,
    /// Five-sprint averages for velocity and throughput.
    pub active_sprint: SprintSnapshot,
    pub avg_cycle_time: f64,
    /// Five-sprint bug total.
    pub bugs_resolved: u32,
    pub latest_insight: Option<InsightSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartPoint {
    pub sprint_name: String,
    pub sprint_end_date: String,
    pub value: f64,
}

/// Dashboard headline for a project scope (None = tenant-global).
pub async fn dashboard_summary(
    ctx: &TenantContext,
    project_id: Option<Uuid>,
) -> Result<DashboardSummary> {
    let recent = ctx
        .store
        .list_recent_sprint_metrics(project_id, ROLLUP_WINDOW)
        .await?;

    let latest_insight = ctx
        .store
        .latest_ai_insight(project_id)
        .await?
        .map(|i| InsightSummary {
            id: i.id,
            suggestion_count: i.suggestions.len(),
            summary: i.summary,
        });

    let source_ids: Option<Vec<Uuid>> = match project_id {
        Some(p) => Some(
            ctx.store
                .list_sources(Some(p))
                .await?
                .iter()
                .map(|s| s.id)
                .collect(),
        ),
        None => None,
    };

    if recent.is_empty() {
        return live_summary(ctx, source_ids.as_deref(), latest_insight).await;
    }

    let count = recent.len() as f64;
    let avg_velocity = recent.iter().map(|m| m.velocity).sum::<f64>() / count;
    let avg_items = recent.iter().map(|m| m.items_completed as f64).sum::<f64>() / count;
    let avg_cycle = recent
        .iter()
        .filter_map(|m| m.avg_cycle_time_days)
        .sum::<f64>()
        / count;
    let total_bugs: u32 = recent.iter().map(|m| m.bugs_completed).sum();

    let stored_rate = recent[0].compliance_rate_percent;
    let compliance_rate = reconcile_compliance(ctx, source_ids.as_deref(), stored_rate).await?;

    Ok(DashboardSummary {
        compliance_rate: round2(compliance_rate),
        active_sprint: SprintSnapshot {
            total_points: round1(avg_velocity),
            item_count: round1(avg_items),
        },
        avg_cycle_time: round1(avg_cycle),
        bugs_resolved: total_bugs,
        latest_insight,
    })
}

/// Apply the staleness override: keep the stored rate unless it drifted
/// more than the tolerance from the live value.
async fn reconcile_compliance(
    ctx: &TenantContext,
    source_ids: Option<&[Uuid]>,
    stored_rate: f64,
) -> Result<f64> {
    let (total, compliant) = ctx.store.count_compliance(source_ids).await?;
    if total == 0 {
        return Ok(stored_rate);
    }
    let live = compliant as f64 / total as f64 * 100.0;
    if (stored_rate - live).abs() > COMPLIANCE_DRIFT_TOLERANCE {
        tracing::debug!(stored_rate, live, "stored compliance stale, using live value");
        Ok(live)
    } else {
        Ok(stored_rate)
    }
}

/// Fallback when no rollups exist yet: compute everything from the work
/// items directly.
async fn live_summary(
    ctx: &TenantContext,
    source_ids: Option<&[Uuid]>,
    latest_insight: Option<InsightSummary>,
) -> Result<DashboardSummary> {
    let (total, compliant) = ctx.store.count_compliance(source_ids).await?;
    let compliance_rate = if total > 0 {
        compliant as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let sprints: Vec<_> = ctx
        .store
        .list_sprints()
        .await?
        .into_iter()
        .filter(|s| s.status != SprintStatus::Backlog && s.end_date.is_some())
        .take(ROLLUP_WINDOW as usize)
        .collect();

    let mut velocities = Vec::new();
    let mut item_counts = Vec::new();
    let mut bugs = 0u32;
    let mut cycle_times = Vec::new();

    for sprint in &sprints {
        let items = ctx
            .store
            .list_work_items_for_sprint(sprint.id, source_ids)
            .await?;
        let done: Vec<_> = items
            .iter()
            .filter(|i| i.status_category == StatusCategory::Done)
            .collect();
        velocities.push(done.iter().filter_map(|i| i.story_points).sum::<f64>());
        item_counts.push(done.len() as f64);
        bugs += done
            .iter()
            .filter(|i| i.item_type == cadence_core::types::ItemType::Bug)
            .count() as u32;
        cycle_times.extend(done.iter().filter_map(|i| i.cycle_time_days()));
    }

    Ok(DashboardSummary {
        compliance_rate: round2(compliance_rate),
        active_sprint: SprintSnapshot {
            total_points: round1(mean(velocities).unwrap_or(0.0)),
            item_count: round1(mean(item_counts).unwrap_or(0.0)),
        },
        avg_cycle_time: round1(mean(cycle_times).unwrap_or(0.0)),
        bugs_resolved: bugs,
        latest_insight,
    })
}

/// Velocity per sprint, oldest first (chart order).
pub async fn velocity_chart(
    ctx: &TenantContext,
    project_id: Option<Uuid>,
) -> Result<Vec<ChartPoint>> {
    let mut points: Vec<ChartPoint> = ctx
        .store
        .list_recent_sprint_metrics(project_id, ROLLUP_WINDOW)
        .await?
        .into_iter()
        .map(|m| ChartPoint {
            sprint_name: m.sprint_name,
            sprint_end_date: m.sprint_end_date.to_string(),
            value: m.velocity,
        })
        .collect();
    points.reverse();
    Ok(points)
}

/// Compliance rate per sprint, oldest first.
pub async fn compliance_chart(
    ctx: &TenantContext,
    project_id: Option<Uuid>,
) -> Result<Vec<ChartPoint>> {
    let mut points: Vec<ChartPoint> = ctx
        .store
        .list_recent_sprint_metrics(project_id, ROLLUP_WINDOW)
        .await?
        .into_iter()
        .map(|m| ChartPoint {
            sprint_name: m.sprint_name,
            sprint_end_date: m.sprint_end_date.to_string(),
            value: m.compliance_rate_percent,
        })
        .collect();
    points.reverse();
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cadence_core::store::TenantStore;
    use cadence_core::types::*;
    use chrono::{Duration, NaiveDate, Utc};

    async fn ctx() -> TenantContext {
        TenantContext::new(
            Tenant::new("T", "t"),
            Arc::new(TenantStore::open_in_memory().await.unwrap()),
        )
    }

    fn metrics_row(name: &str, end: NaiveDate, velocity: f64, compliance: f64) -> SprintMetrics {
        SprintMetrics {
            id: Uuid::new_v4(),
            sprint_name: name.into(),
            sprint_start_date: None,
            sprint_end_date: end,
            project_id: None,
            velocity,
            total_story_points_completed: velocity,
            items_completed: 4,
            stories_completed: 2,
            bugs_completed: 1,
            total_items: 5,
            compliant_items: 4,
            compliance_rate_percent: compliance,
            defect_density_per_100_points: 0.0,
            avg_cycle_time_days: Some(2.0),
            pr_health_percent: 100.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(source: Uuid, ext: &str, compliant: bool) -> WorkItem {
        let mut i = WorkItem::new(source, ext, ext);
        i.dmt_compliant = compliant;
        i
    }

    #[tokio::test]
    async fn summary_averages_last_five() {
        let ctx = ctx().await;
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..6 {
            ctx.store
                .upsert_sprint_metrics(&metrics_row(
                    &format!("S{i}"),
                    base + Duration::days(14 * i as i64),
                    (i + 1) as f64 * 10.0,
                    80.0,
                ))
                .await
                .unwrap();
        }

        let summary = dashboard_summary(&ctx, None).await.unwrap();
        // Sprints S1..S5 (velocities 20..60) are the window; S0 fell off.
        assert_eq!(summary.active_sprint.total_points, 40.0);
        assert_eq!(summary.bugs_resolved, 5);
        assert_eq!(summary.avg_cycle_time, 2.0);
        // No work items at all: stored rate passes through untouched.
        assert_eq!(summary.compliance_rate, 80.0);
    }

    #[tokio::test]
    async fn stale_compliance_overridden_by_live_value() {
        let ctx = ctx().await;
        let source = Uuid::new_v4();
        ctx.store
            .upsert_sprint_metrics(&metrics_row(
                "S1",
                NaiveDate::from_ymd_opt(2024, 2, 19).unwrap(),
                30.0,
                90.0,
            ))
            .await
            .unwrap();

        // Live truth: 1 of 4 compliant = 25%, far below the stored 90%.
        ctx.store.upsert_work_item(&item(source, "A", true)).await.unwrap();
        for ext in ["B", "C", "D"] {
            ctx.store.upsert_work_item(&item(source, ext, false)).await.unwrap();
        }

        let summary = dashboard_summary(&ctx, None).await.unwrap();
        assert_eq!(summary.compliance_rate, 25.0);
    }

    #[tokio::test]
    async fn small_drift_keeps_stored_value() {
        let ctx = ctx().await;
        let source = Uuid::new_v4();
        ctx.store
            .upsert_sprint_metrics(&metrics_row(
                "S1",
                NaiveDate::from_ymd_opt(2024, 2, 19).unwrap(),
                30.0,
                78.0,
            ))
            .await
            .unwrap();

        // Live: 4/5 = 80%, within 5pp of 78, so stored wins.
        for (ext, ok) in [("A", true), ("B", true), ("C", true), ("D", true), ("E", false)] {
            ctx.store.upsert_work_item(&item(source, ext, ok)).await.unwrap();
        }

        let summary = dashboard_summary(&ctx, None).await.unwrap();
        assert_eq!(summary.compliance_rate, 78.0);
    }

    #[tokio::test]
    async fn empty_rollups_fall_back_to_live() {
        let ctx = ctx().await;
        let source = Uuid::new_v4();
        ctx.store.upsert_work_item(&item(source, "A", true)).await.unwrap();
        ctx.store.upsert_work_item(&item(source, "B", false)).await.unwrap();

        let summary = dashboard_summary(&ctx, None).await.unwrap();
        assert_eq!(summary.compliance_rate, 50.0);
        assert_eq!(summary.active_sprint.total_points, 0.0);
    }

    #[tokio::test]
    async fn charts_are_oldest_first() {
        let ctx = ctx().await;
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for i in 0..3 {
            ctx.store
                .upsert_sprint_metrics(&metrics_row(
                    &format!("S{i}"),
                    base + Duration::days(14 * i as i64),
                    (i + 1) as f64,
                    50.0 + i as f64,
                ))
                .await
                .unwrap();
        }

        let velocity = velocity_chart(&ctx, None).await.unwrap();
        assert_eq!(velocity.len(), 3);
        assert_eq!(velocity[0].sprint_name, "S0");
        assert_eq!(velocity[2].sprint_name, "S2");
        assert!(velocity.windows(2).all(|w| w[0].sprint_end_date < w[1].sprint_end_date));

        let compliance = compliance_chart(&ctx, None).await.unwrap();
        assert_eq!(compliance[2].value, 52.0);
    }
}
