//! Retention sweep.
//!
//! Deletes data past each tenant's retention caps: done work items by
//! `resolved_at`, sprints by `end_date`, pull requests by merge or update
//! time, insights by `created_at`.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use cadence_core::registry::Registry;
use cadence_core::types::TenantStatus;

use crate::Result;

/// Months are approximated at 30 days, matching the retention settings UI.
const DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub work_items: usize,
    pub sprints: usize,
    pub pull_requests: usize,
    pub insights: usize,
}

/// Sweep one tenant according to its caps.
pub async fn sweep_tenant(registry: &Registry, schema_name: &str) -> Result<SweepOutcome> {
    let ctx = registry.open_context(schema_name).await?;
    let now = Utc::now();

    let cutoff_wi = now - Duration::days(ctx.tenant.retention_work_items as i64 * DAYS_PER_MONTH);
    let cutoff_pr =
        now - Duration::days(ctx.tenant.retention_pull_requests as i64 * DAYS_PER_MONTH);
    let cutoff_ai = now - Duration::days(ctx.tenant.retention_ai_insights as i64 * DAYS_PER_MONTH);

    let outcome = SweepOutcome {
        work_items: ctx.store.delete_work_items_resolved_before(cutoff_wi).await?,
        sprints: ctx.store.delete_sprints_ended_before(cutoff_wi).await?,
        pull_requests: ctx.store.delete_pull_requests_before(cutoff_pr).await?,
        insights: ctx.store.delete_ai_insights_before(cutoff_ai).await?,
    };

    if outcome != SweepOutcome::default() {
        info!(
            tenant = schema_name,
            work_items = outcome.work_items,
            sprints = outcome.sprints,
            pull_requests = outcome.pull_requests,
            insights = outcome.insights,
            "retention sweep deleted rows"
        );
    }
    Ok(outcome)
}

/// Sweep every active tenant. Per-tenant failures are logged and do not
/// stop the remaining tenants.
pub async fn sweep_all(registry: &Registry) -> Result<usize> {
    let tenants = registry.list_tenants(Some(TenantStatus::Active)).await?;
    let mut swept = 0usize;
    for tenant in tenants {
        match sweep_tenant(registry, &tenant.schema_name).await {
            Ok(_) => swept += 1,
            Err(e) => {
                warn!(tenant = %tenant.schema_name, error = %e, "retention sweep failed for tenant");
            }
        }
    }
    Ok(swept)
}
