//! Periodic schedule.
//!
//! - 02:00 UTC daily: retention sweep across all active tenants;
//! - 03:00 UTC daily: per-tenant aggregation of yesterday's DailyMetric;
//! - every `sync_interval` minutes: sync fan-out for all active sources,
//!   skipping any source that is mid-sync or already queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use cadence_core::types::{SyncStatus, TenantStatus};

use crate::queue::Job;
use crate::worker::WorkerEnv;
use crate::Result;

const TICK: Duration = Duration::from_secs(60);
const RETENTION_HOUR: u32 = 2;
const AGGREGATION_HOUR: u32 = 3;

/// Tracks which daily firings have already happened.
#[derive(Debug, Default)]
pub struct ScheduleState {
    last_retention: Option<NaiveDate>,
    last_aggregation: Option<NaiveDate>,
    last_fanout: Option<DateTime<Utc>>,
}

impl ScheduleState {
    /// A daily task fires once per calendar day, at or after its hour.
    fn daily_due(last: &mut Option<NaiveDate>, now: DateTime<Utc>, hour: u32) -> bool {
        let today = now.date_naive();
        if now.hour() >= hour && *last != Some(today) {
            *last = Some(today);
            return true;
        }
        false
    }

    pub fn retention_due(&mut self, now: DateTime<Utc>) -> bool {
        Self::daily_due(&mut self.last_retention, now, RETENTION_HOUR)
    }

    pub fn aggregation_due(&mut self, now: DateTime<Utc>) -> bool {
        Self::daily_due(&mut self.last_aggregation, now, AGGREGATION_HOUR)
    }

    pub fn fanout_due(&mut self, now: DateTime<Utc>, interval_minutes: u64) -> bool {
        let due = match self.last_fanout {
            Some(last) => now - last >= chrono::Duration::minutes(interval_minutes as i64),
            None => true,
        };
        if due {
            self.last_fanout = Some(now);
        }
        due
    }
}

/// Run the schedule until shutdown.
pub async fn run_scheduler(
    env: Arc<WorkerEnv>,
    sync_interval_minutes: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = ScheduleState::default();
    info!(sync_interval_minutes, "scheduler started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = tick(&env, &mut state, Utc::now(), sync_interval_minutes).await {
            warn!(error = %e, "scheduler tick failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("scheduler stopped");
}

/// One pass over the schedule; extracted for tests.
pub async fn tick(
    env: &WorkerEnv,
    state: &mut ScheduleState,
    now: DateTime<Utc>,
    sync_interval_minutes: u64,
) -> Result<()> {
    if state.retention_due(now) {
        env.queue.enqueue(&Job::RetentionSweep).await?;
        info!("retention sweep enqueued");
    }

    if state.aggregation_due(now) {
        let yesterday = now.date_naive() - chrono::Duration::days(1);
        for tenant in env.registry.list_tenants(Some(TenantStatus::Active)).await? {
            env.queue
                .enqueue(&Job::DailyAggregation {
                    schema_name: tenant.schema_name.clone(),
                    date: yesterday,
                })
                .await?;
        }
        info!("daily aggregation enqueued");
    }

    if state.fanout_due(now, sync_interval_minutes) {
        let triggered = fan_out_syncs(env).await?;
        if triggered > 0 {
            info!(triggered, "sync fan-out enqueued");
        }
    }

    Ok(())
}

/// Enqueue a sync for every active source of every active tenant, skipping
/// sources that are mid-sync or already queued. A source stuck in
/// `in_progress` with no live job (worker death) is reset here and synced
/// again.
pub async fn fan_out_syncs(env: &WorkerEnv) -> Result<usize> {
    let mut triggered = 0usize;
    for tenant in env.registry.list_tenants(Some(TenantStatus::Active)).await? {
        let ctx = env.registry.open_context(&tenant.schema_name).await?;
        for source in ctx.store.list_active_sources().await? {
            let pending = env.queue.has_pending_sync(source.id).await?;
            if source.last_sync_status == SyncStatus::InProgress {
                if pending {
                    continue;
                }
                warn!(source = %source.name, "resetting sync orphaned by a dead worker");
                ctx.store.reset_stuck_sync(source.id).await?;
            } else if pending {
                continue;
            }
            env.queue
                .enqueue(&Job::SourceSync {
                    source_id: source.id,
                    schema_name: tenant.schema_name.clone(),
                })
                .await?;
            triggered += 1;
        }
    }
    Ok(triggered)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use cadence_bridge::bus::InMemoryBus;
    use cadence_connectors::HttpClient;
    use cadence_core::registry::Registry;
    use cadence_core::types::{Project, SourceConfiguration, SourceType};

    use crate::queue::{JobQueue, QUEUE_DEFAULT};

    async fn env() -> Arc<WorkerEnv> {
        Arc::new(WorkerEnv {
            registry: Arc::new(Registry::open_in_memory().await.unwrap()),
            queue: Arc::new(JobQueue::open_in_memory().await.unwrap()),
            bus: InMemoryBus::new(),
            http: HttpClient::new().unwrap(),
            default_ai_key: None,
        })
    }

    #[test]
    fn daily_tasks_fire_once_per_day() {
        let mut state = ScheduleState::default();
        let before = Utc.with_ymd_and_hms(2024, 5, 1, 1, 59, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 30).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 5, 2, 2, 1, 0).unwrap();

        assert!(!state.retention_due(before));
        assert!(state.retention_due(at));
        assert!(!state.retention_due(later), "already fired today");
        assert!(state.retention_due(next_day));
    }

    #[test]
    fn fanout_respects_interval() {
        let mut state = ScheduleState::default();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert!(state.fanout_due(t0, 30));
        assert!(!state.fanout_due(t0 + chrono::Duration::minutes(10), 30));
        assert!(state.fanout_due(t0 + chrono::Duration::minutes(31), 30));
    }

    #[tokio::test]
    async fn fan_out_skips_queued_and_resets_orphans() {
        let env = env().await;
        env.registry.create_tenant("Acme", "acme").await.unwrap();
        let ctx = env.registry.open_context("acme").await.unwrap();

        let project = Project::new(ctx.tenant.id, "P", "P");
        ctx.store.insert_project(&project).await.unwrap();
        let ready = SourceConfiguration::new(project.id, SourceType::Jira, "A", "https://a");
        let orphaned = SourceConfiguration::new(project.id, SourceType::Clickup, "B", "https://b");
        let mut inactive = SourceConfiguration::new(project.id, SourceType::Github, "C", "https://c");
        inactive.is_active = false;
        for s in [&ready, &orphaned, &inactive] {
            ctx.store.insert_source(s).await.unwrap();
        }
        // In progress but with no queued or running job: a dead worker.
        ctx.store.try_mark_sync_started(orphaned.id).await.unwrap();

        let triggered = fan_out_syncs(&env).await.unwrap();
        assert_eq!(triggered, 2, "ready source plus the reset orphan");
        let reset = ctx.store.get_source(orphaned.id).await.unwrap().unwrap();
        assert_ne!(
            reset.last_sync_status,
            cadence_core::types::SyncStatus::InProgress
        );

        // A second fan-out enqueues nothing: both syncs are still queued.
        let triggered = fan_out_syncs(&env).await.unwrap();
        assert_eq!(triggered, 0);

        let mut synced = Vec::new();
        while let Some(claimed) = env.queue.claim(QUEUE_DEFAULT).await.unwrap() {
            match claimed.job {
                Job::SourceSync { source_id, .. } => synced.push(source_id),
                other => panic!("unexpected job {other:?}"),
            }
        }
        assert!(synced.contains(&ready.id));
        assert!(synced.contains(&orphaned.id));
        assert!(!synced.contains(&inactive.id));
    }

    #[tokio::test]
    async fn tick_enqueues_daily_jobs() {
        let env = env().await;
        env.registry.create_tenant("Acme", "acme").await.unwrap();
        let mut state = ScheduleState::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 3, 30, 0).unwrap();

        tick(&env, &mut state, now, 30).await.unwrap();

        let mut kinds = Vec::new();
        while let Some(job) = env.queue.claim(QUEUE_DEFAULT).await.unwrap() {
            kinds.push(job.job.name());
        }
        assert!(kinds.contains(&"retention_sweep"));
        assert!(kinds.contains(&"daily_aggregation"));
    }
}
