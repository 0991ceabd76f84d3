//! Developer-grain rollups and competitive titles.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use cadence_core::tenant::TenantContext;
use cadence_core::types::{
    DeveloperMetrics, ItemType, PullRequest, Sprint, StatusCategory, WorkItem,
};

use crate::{mean, round1, round2, Result};

/// The four single-holder recognitions, granted in this order.
pub const TITLE_VELOCITY_KING: &str = "Velocity King";
pub const TITLE_QUALITY_CHAMPION: &str = "Quality Champion";
pub const TITLE_TOP_REVIEWER: &str = "Top Reviewer";
pub const TITLE_AI_SPECIALIST: &str = "AI Specialist";

/// Per-developer breakdown of one sprint, written per project scope plus
/// the tenant-global scope, then competitive titles are re-granted.
pub async fn populate_developer_metrics(
    ctx: &TenantContext,
    sprint_id: Uuid,
) -> Result<Vec<DeveloperMetrics>> {
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
    scopes.push(None);

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
            continue;
        }

        // BTreeMap keeps email order stable, which makes tie-breaks stable.
        let mut by_email: BTreeMap<String, Vec<&WorkItem>> = BTreeMap::new();
        for item in &items {
            let email = match item.assignee_email.as_deref().map(str::trim) {
                Some(e) if !e.is_empty() => e.to_lowercase(),
                _ => continue,
            };
            by_email.entry(email).or_default().push(item);
        }

        let window_prs: Vec<&PullRequest> = all_prs
            .iter()
            .filter(|pr| pr.created_at >= start && pr.created_at <= end)
            .filter(|pr| match &source_ids {
                Some(ids) => ids.contains(&pr.source_config_id),
                None => true,
            })
            .collect();

        for (email, dev_items) in &by_email {
            let completed: Vec<&&WorkItem> = dev_items
                .iter()
                .filter(|i| i.status_category == StatusCategory::Done)
                .collect();

            let parents: Vec<&&WorkItem> =
                dev_items.iter().filter(|i| i.parent_id.is_none()).collect();
            let compliance_rate = if parents.is_empty() {
                0.0
            } else {
                parents.iter().filter(|i| i.dmt_compliant).count() as f64
                    / parents.len() as f64
                    * 100.0
            };

            let dev_prs: Vec<&&PullRequest> = window_prs
                .iter()
                .filter(|pr| {
                    pr.author_email
                        .as_deref()
                        .map(|a| a.eq_ignore_ascii_case(email))
                        .unwrap_or(false)
                })
                .collect();

            let metrics = DeveloperMetrics {
                id: Uuid::new_v4(),
                developer_email: email.clone(),
                developer_name: dev_items
                    .iter()
                    .find_map(|i| i.assignee_name.clone()),
                sprint_name: sprint.name.clone(),
                sprint_end_date: end.date_naive(),
                project_id: scope,
                story_points_completed: completed
                    .iter()
                    .filter_map(|i| i.story_points)
                    .sum(),
                items_completed: completed.len() as u32,
                prs_authored: dev_prs.len() as u32,
                prs_merged: dev_prs.iter().filter(|pr| pr.status.is_merged()).count() as u32,
                prs_reviewed: 0,
                defects_attributed: completed
                    .iter()
                    .filter(|i| i.item_type == ItemType::Bug)
                    .count() as u32,
                coverage_avg_percent: mean(dev_items.iter().filter_map(|i| i.coverage_percent))
                    .map(round1),
                ai_usage_avg_percent: mean(dev_items.iter().filter_map(|i| i.ai_usage_percent))
                    .map(round1),
                dmt_compliance_rate: round2(compliance_rate),
                avg_cycle_time_days: mean(completed.iter().filter_map(|i| i.cycle_time_days()))
                    .map(round1),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };

            ctx.store.upsert_developer_metrics(&metrics).await?;
            results.push(metrics);
        }
    }

    update_competitive_titles(ctx, &sprint).await?;
    Ok(results)
}

/// Clear every competitive title in the tenant, then grant each of the four
/// titles to the single top developer of this sprint. A developer holds at
/// most one title; ties break on email sort order; a category with no
/// positive score stays vacant.
pub async fn update_competitive_titles(ctx: &TenantContext, sprint: &Sprint) -> Result<()> {
    let end = match sprint.end_date {
        Some(e) => e.date_naive(),
        None => return Ok(()),
    };

    ctx.store.clear_competitive_titles().await?;

    // The tenant-global rows carry each developer exactly once.
    let rows: Vec<DeveloperMetrics> = ctx
        .store
        .list_developer_metrics_for_sprint(&sprint.name, end)
        .await?
        .into_iter()
        .filter(|r| r.project_id.is_none())
        .collect();
    if rows.is_empty() {
        return Ok(());
    }

    let mut titled: Vec<String> = Vec::new();

    let categories: [(&str, Box<dyn Fn(&DeveloperMetrics) -> f64 + Send + Sync>, Box<dyn Fn(&DeveloperMetrics) -> String + Send + Sync>); 4] = [
        (
            TITLE_VELOCITY_KING,
            Box::new(|r| r.story_points_completed),
            Box::new(|r| {
                format!(
                    "Completed {} story points in {}",
                    round1(r.story_points_completed),
                    r.sprint_name
                )
            }),
        ),
        (
            TITLE_QUALITY_CHAMPION,
            Box::new(|r| r.dmt_compliance_rate),
            Box::new(|r| {
                format!(
                    "Highest DMT compliance at {:.1}% in {}",
                    r.dmt_compliance_rate, r.sprint_name
                )
            }),
        ),
        (
            TITLE_TOP_REVIEWER,
            Box::new(|r| r.prs_reviewed as f64),
            Box::new(|r| format!("Reviewed {} pull requests in {}", r.prs_reviewed, r.sprint_name)),
        ),
        (
            TITLE_AI_SPECIALIST,
            Box::new(|r| r.ai_usage_avg_percent.unwrap_or(0.0)),
            Box::new(|r| {
                format!(
                    "Highest AI adoption at {:.1}% in {}",
                    r.ai_usage_avg_percent.unwrap_or(0.0),
                    r.sprint_name
                )
            }),
        ),
    ];

    for (title, score, reason) in &categories {
        let winner = rows
            .iter()
            .filter(|r| !titled.contains(&r.developer_email))
            .filter(|r| score(r) > 0.0)
            // max_by on a stable-sorted list: the FIRST maximal row wins the
            // tie, so we scan and keep strictly-greater candidates.
            .fold(None::<&DeveloperMetrics>, |best, r| match best {
                Some(b) if score(r) > score(b) => Some(r),
                Some(b) => Some(b),
                None => Some(r),
            });

        let Some(winner) = winner else {
            debug!(title, "no positive score, title stays vacant");
            continue;
        };

        let user = ctx.store.find_user_by_email(&winner.developer_email).await?;
        if let Some(user) = user {
            ctx.store
                .set_competitive_title(user.id, title, &reason(winner))
                .await?;
            titled.push(winner.developer_email.clone());
            info!(title, developer = %winner.developer_email, "competitive title granted");
        } else {
            // Unlinked email; the title is still "taken" so a lesser score
            // cannot claim it under another category pass.
            titled.push(winner.developer_email.clone());
        }
    }

    Ok(())
}
