//! Sprint-grain rollups.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use cadence_core::tenant::TenantContext;
use cadence_core::types::{ItemType, SprintMetrics, StatusCategory, WorkItem};

use crate::{mean, round1, round2, Result};

/// Recompute and persist the rollups for one sprint: one row per project
/// that has items in the sprint, plus the tenant-global row. Sprints
/// without both dates are skipped (static lists never get rollups).
pub async fn populate_sprint_metrics(
    ctx: &TenantContext,
    sprint_id: Uuid,
) -> Result<Vec<SprintMetrics>> {
    let sprint = match ctx.store.get_sprint(sprint_id).await? {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };
    let (start, end) = match (sprint.start_date, sprint.end_date) {
        (Some(s), Some(e)) => (s, e),
        _ => return Ok(Vec::new()),
    };

    let projects = ctx.store.list_projects().await?;
    let mut scopes: Vec<Option<Uuid>> = projects.iter().map(|p| Some(p.id)).collect();
    scopes.push(None); // tenant-global view

    let all_prs = ctx.store.list_pull_requests().await?;
    let mut results = Vec::new();

    for scope in scopes {
        let source_ids: Option<Vec<Uuid>> = match scope {
            Some(project_id) => Some(
                ctx.store
                    .list_sources(Some(project_id))
                    .await?
                    .iter()
                    .map(|s| s.id)
                    .collect(),
            ),
            None => None,
        };

        let items = ctx
            .store
            .list_work_items_for_sprint(sprint_id, source_ids.as_deref())
            .await?;
        if items.is_empty() && scope.is_some() {
            continue; // skip projects with no items in this sprint
        }

        let completed: Vec<&WorkItem> = items
            .iter()
            .filter(|i| i.status_category == StatusCategory::Done)
            .collect();

        let velocity: f64 = completed.iter().filter_map(|i| i.story_points).sum();
        let stories_completed = completed
            .iter()
            .filter(|i| i.item_type == ItemType::Story)
            .count() as u32;
        let bugs_completed = completed
            .iter()
            .filter(|i| i.item_type == ItemType::Bug)
            .count() as u32;

        // The compliance denominator is parent-level items only; subtasks
        // are exempt and would inflate the rate.
        let parents: Vec<&WorkItem> = items.iter().filter(|i| i.parent_id.is_none()).collect();
        let total_items = parents.len() as u32;
        let compliant_items = parents.iter().filter(|i| i.dmt_compliant).count() as u32;
        let compliance_rate = if total_items > 0 {
            compliant_items as f64 / total_items as f64 * 100.0
        } else {
            0.0
        };

        let defect_density = if velocity > 0.0 {
            bugs_completed as f64 / velocity * 100.0
        } else {
            0.0
        };

        let avg_cycle_time = mean(completed.iter().filter_map(|i| i.cycle_time_days()))
            .map(round1)
            .unwrap_or(0.0);

        // PR health over the sprint window: merged share of PRs opened
        // within the sprint (scoped to the project's sources when scoped).
        let window_prs: Vec<_> = all_prs
            .iter()
            .filter(|pr| pr.created_at >= start && pr.created_at <= end)
            .filter(|pr| match &source_ids {
                Some(ids) => ids.contains(&pr.source_config_id),
                None => true,
            })
            .collect();
        let pr_health = if window_prs.is_empty() {
            100.0
        } else {
            window_prs.iter().filter(|pr| pr.status.is_merged()).count() as f64
                / window_prs.len() as f64
                * 100.0
        };

        let metrics = SprintMetrics {
            id: Uuid::new_v4(),
            sprint_name: sprint.name.clone(),
            sprint_start_date: Some(start.date_naive()),
            sprint_end_date: end.date_naive(),
            project_id: scope,
            velocity,
            total_story_points_completed: velocity,
            items_completed: completed.len() as u32,
            stories_completed,
            bugs_completed,
            total_items,
            compliant_items,
            compliance_rate_percent: round2(compliance_rate),
            defect_density_per_100_points: round2(defect_density),
            avg_cycle_time_days: Some(avg_cycle_time),
            pr_health_percent: round2(pr_health),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        ctx.store.upsert_sprint_metrics(&metrics).await?;
        debug!(
            sprint = %sprint.name,
            project = ?scope,
            velocity,
            compliance = metrics.compliance_rate_percent,
            "sprint metrics written"
        );
        results.push(metrics);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cadence_core::store::TenantStore;
    use cadence_core::types::*;
    use chrono::{Duration, Utc};

    async fn ctx() -> TenantContext {
        TenantContext::new(
            Tenant::new("T", "t"),
            Arc::new(TenantStore::open_in_memory().await.unwrap()),
        )
    }

    fn done_item(source: Uuid, ext: &str, points: f64, item_type: ItemType) -> WorkItem {
        let now = Utc::now();
        let mut item = WorkItem::new(source, ext, ext);
        item.item_type = item_type;
        item.status_category = StatusCategory::Done;
        item.story_points = Some(points);
        item.created_at = now - Duration::days(5);
        item.started_at = Some(now - Duration::days(4));
        item.resolved_at = Some(now - Duration::days(2));
        item.dmt_compliant = true;
        item
    }

    #[tokio::test]
    async fn global_and_project_rows_written() {
        let ctx = ctx().await;
        let now = Utc::now();

        let project = Project::new(ctx.tenant.id, "Platform", "PLAT");
        ctx.store.insert_project(&project).await.unwrap();
        let source = SourceConfiguration::new(project.id, SourceType::Jira, "J", "https://x");
        ctx.store.insert_source(&source).await.unwrap();

        let mut sprint = Sprint::new("s1", "Sprint 1");
        sprint.start_date = Some(now - Duration::days(14));
        sprint.end_date = Some(now - Duration::days(1));
        sprint.status = SprintStatus::Completed;
        let sprint = ctx.store.upsert_sprint(&sprint).await.unwrap();

        for (ext, points, kind) in [
            ("A-1", 5.0, ItemType::Story),
            ("A-2", 3.0, ItemType::Bug),
        ] {
            let mut item = done_item(source.id, ext, points, kind);
            item.sprint_id = Some(sprint.id);
            ctx.store.upsert_work_item(&item).await.unwrap();
        }
        // An in-progress, non-compliant item drags the rate to 2/3.
        let mut open = WorkItem::new(source.id, "A-3", "open");
        open.sprint_id = Some(sprint.id);
        open.status_category = StatusCategory::InProgress;
        ctx.store.upsert_work_item(&open).await.unwrap();

        let rows = populate_sprint_metrics(&ctx, sprint.id).await.unwrap();
        assert_eq!(rows.len(), 2, "project row + global row");

        let global = rows.iter().find(|r| r.project_id.is_none()).unwrap();
        assert_eq!(global.velocity, 8.0);
        assert_eq!(global.items_completed, 2);
        assert_eq!(global.stories_completed, 1);
        assert_eq!(global.bugs_completed, 1);
        assert_eq!(global.total_items, 3);
        assert_eq!(global.compliant_items, 2);
        assert_eq!(global.compliance_rate_percent, 66.67);
        assert_eq!(global.avg_cycle_time_days, Some(2.0));
        assert_eq!(global.defect_density_per_100_points, 12.5);

        let scoped = rows.iter().find(|r| r.project_id == Some(project.id)).unwrap();
        assert_eq!(scoped.velocity, 8.0);
    }

    #[tokio::test]
    async fn project_without_items_is_skipped() {
        let ctx = ctx().await;
        let now = Utc::now();

        let busy = Project::new(ctx.tenant.id, "Busy", "B");
        let idle = Project::new(ctx.tenant.id, "Idle", "I");
        ctx.store.insert_project(&busy).await.unwrap();
        ctx.store.insert_project(&idle).await.unwrap();
        let source = SourceConfiguration::new(busy.id, SourceType::Clickup, "C", "https://x");
        ctx.store.insert_source(&source).await.unwrap();

        let mut sprint = Sprint::new("s2", "Sprint 2");
        sprint.start_date = Some(now - Duration::days(14));
        sprint.end_date = Some(now - Duration::days(1));
        let sprint = ctx.store.upsert_sprint(&sprint).await.unwrap();

        let mut item = done_item(source.id, "B-1", 2.0, ItemType::Task);
        item.sprint_id = Some(sprint.id);
        ctx.store.upsert_work_item(&item).await.unwrap();

        let rows = populate_sprint_metrics(&ctx, sprint.id).await.unwrap();
        let scopes: Vec<Option<Uuid>> = rows.iter().map(|r| r.project_id).collect();
        assert!(scopes.contains(&Some(busy.id)));
        assert!(scopes.contains(&None));
        assert!(!scopes.contains(&Some(idle.id)));
    }

    #[tokio::test]
    async fn undated_sprint_gets_no_rollup() {
        let ctx = ctx().await;
        let sprint = ctx
            .store
            .upsert_sprint(&Sprint::new("backlog", "Backlog"))
            .await
            .unwrap();
        let rows = populate_sprint_metrics(&ctx, sprint.id).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn rerun_rewrites_rather_than_duplicates() {
        let ctx = ctx().await;
        let now = Utc::now();
        let mut sprint = Sprint::new("s3", "Sprint 3");
        sprint.start_date = Some(now - Duration::days(14));
        sprint.end_date = Some(now - Duration::days(1));
        let sprint = ctx.store.upsert_sprint(&sprint).await.unwrap();

        populate_sprint_metrics(&ctx, sprint.id).await.unwrap();
        populate_sprint_metrics(&ctx, sprint.id).await.unwrap();

        let rows = ctx.store.list_recent_sprint_metrics(None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
