//! Daily metric aggregation (operator audit trail).

use chrono::{NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use cadence_core::tenant::TenantContext;
use cadence_core::types::DailyMetric;

use crate::{mean, round2, Result};

/// Compute and store the audit row for one calendar day: work-item totals
/// as of the end of the day, PRs merged during it, and the average
/// resolution time (hours) of items resolved that day.
pub async fn aggregate_daily_metric(
    ctx: &TenantContext,
    date: NaiveDate,
) -> Result<DailyMetric> {
    let day_start = Utc
        .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"));
    let day_end = day_start + chrono::Duration::days(1);

    let (total, compliant) = ctx.store.count_work_items(day_end).await?;
    let compliance_rate = if total > 0 {
        compliant as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let resolved = ctx.store.list_resolved_between(day_start, day_end).await?;
    let avg_cycle_time_hours = mean(resolved.iter().filter_map(|i| {
        let resolved_at = i.resolved_at?;
        let secs = (resolved_at - i.created_at).num_seconds();
        (secs >= 0).then(|| secs as f64 / 3600.0)
    }))
    .unwrap_or(0.0);

    let prs_merged = ctx.store.count_prs_merged_between(day_start, day_end).await?;

    let metric = DailyMetric {
        id: Uuid::new_v4(),
        date,
        total_work_items: total,
        compliant_work_items: compliant,
        compliance_rate: round2(compliance_rate),
        avg_cycle_time_hours: round2(avg_cycle_time_hours),
        prs_merged_count: prs_merged,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    ctx.store.upsert_daily_metric(&metric).await?;
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cadence_core::store::TenantStore;
    use cadence_core::types::*;
    use chrono::Duration;

    #[tokio::test]
    async fn daily_row_counts_day_window() {
        let ctx = TenantContext::new(
            Tenant::new("T", "t"),
            Arc::new(TenantStore::open_in_memory().await.unwrap()),
        );
        let source = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let noon = Utc
            .from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap());

        // Resolved inside the day, created 24h earlier.
        let mut resolved = WorkItem::new(source, "R-1", "r");
        resolved.status_category = StatusCategory::Done;
        resolved.created_at = noon - Duration::days(1);
        resolved.resolved_at = Some(noon);
        resolved.dmt_compliant = true;
        ctx.store.upsert_work_item(&resolved).await.unwrap();

        // Created after the day: excluded from totals.
        let mut later = WorkItem::new(source, "R-2", "r2");
        later.created_at = noon + Duration::days(3);
        ctx.store.upsert_work_item(&later).await.unwrap();

        let pr = PullRequest {
            id: Uuid::new_v4(),
            source_config_id: source,
            external_id: "9".into(),
            title: "t".into(),
            author_email: None,
            resolved_author_id: None,
            work_item_id: None,
            status: PullRequestState::Merged,
            repository_name: "r".into(),
            source_branch: "b".into(),
            target_branch: "main".into(),
            created_at: noon - Duration::days(1),
            updated_at: noon,
            merged_at: Some(noon),
        };
        ctx.store.upsert_pull_request(&pr).await.unwrap();

        let metric = aggregate_daily_metric(&ctx, date).await.unwrap();
        assert_eq!(metric.total_work_items, 1);
        assert_eq!(metric.compliant_work_items, 1);
        assert_eq!(metric.compliance_rate, 100.0);
        assert_eq!(metric.avg_cycle_time_hours, 24.0);
        assert_eq!(metric.prs_merged_count, 1);

        // Idempotent per date.
        aggregate_daily_metric(&ctx, date).await.unwrap();
        assert!(ctx.store.get_daily_metric(date).await.unwrap().is_some());
    }
}
