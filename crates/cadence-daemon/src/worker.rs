//! Worker loop and job dispatch.
//!
//! A worker claims one job at a time and runs it inside a tenant context
//! derived from the job's explicit `schema_name`. A job that names an
//! unknown tenant fails loud; there is no fall-through to a shared
//! partition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cadence_bridge::bus::{InMemoryBus, Publisher};
use cadence_bridge::protocol::TelemetryEvent;
use cadence_connectors::HttpClient;
use cadence_core::registry::Registry;
use cadence_insights::provider::build_provider;

use crate::orchestrator;
use crate::queue::{Job, JobQueue, QueuedJob};
use crate::retention;
use crate::{DaemonError, Result};

/// Transient sync failures are retried this many times before they count
/// toward `consecutive_failures`.
const MAX_SYNC_ATTEMPTS: u32 = 3;
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Everything a worker needs, shared across workers.
pub struct WorkerEnv {
    pub registry: Arc<Registry>,
    pub queue: Arc<JobQueue>,
    pub bus: InMemoryBus,
    pub http: HttpClient,
    pub default_ai_key: Option<String>,
}

/// Drain the given queues until shutdown is signalled.
pub async fn run_worker(
    env: Arc<WorkerEnv>,
    queues: Vec<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(queues = ?queues, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut worked = false;
        for queue_name in &queues {
            match env.queue.claim(queue_name).await {
                Ok(Some(job)) => {
                    worked = true;
                    dispatch(&env, job).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue = queue_name, error = %e, "failed to claim job");
                }
            }
        }

        if !worked {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_POLL) => {}
                _ = shutdown.changed() => break,
            }
        }
    }
    info!("worker stopped");
}

/// Execute one claimed job, recording its outcome on the queue.
pub async fn dispatch(env: &WorkerEnv, queued: QueuedJob) {
    let job_name = queued.job.name();
    match execute(env, &queued).await {
        Ok(()) => {
            if let Err(e) = env.queue.complete(queued.id).await {
                error!(job = job_name, error = %e, "failed to mark job done");
            }
        }
        Err(e) => {
            let retry_at = match &e {
                // Transient vendor errors back off exponentially until the
                // attempt budget is spent.
                DaemonError::Connector(ce)
                    if ce.is_transient() && queued.attempts < MAX_SYNC_ATTEMPTS =>
                {
                    let delay = 30u64 * 2u64.pow(queued.attempts);
                    Some(Utc::now() + chrono::Duration::seconds(delay as i64))
                }
                _ => None,
            };
            let terminal = retry_at.is_none();
            if let Err(qe) = env.queue.fail(queued.id, &e.to_string(), retry_at).await {
                error!(job = job_name, error = %qe, "failed to record job failure");
            }
            if terminal {
                error!(job = job_name, error = %e, "job failed");
            } else {
                warn!(job = job_name, error = %e, attempts = queued.attempts, "job will retry");
            }
        }
    }
}

async fn execute(env: &WorkerEnv, queued: &QueuedJob) -> Result<()> {
    match &queued.job {
        Job::SourceSync {
            source_id,
            schema_name,
        } => {
            let ctx = env.registry.open_context(schema_name).await?;
            let final_attempt = queued.attempts >= MAX_SYNC_ATTEMPTS;
            orchestrator::run_source_sync(
                &ctx,
                *source_id,
                Arc::new(env.bus.clone()),
                &env.queue,
                env.http.clone(),
                final_attempt,
            )
            .await?;
            Ok(())
        }

        Job::MetricsRecalc {
            schema_name,
            sync_source_id,
        } => {
            let ctx = env.registry.open_context(schema_name).await?;
            let sprints = ctx.store.list_sprints().await?;
            let mut updated = 0usize;
            // Oldest first, so the newest sprint's aggregation runs last and
            // competitive titles end up reflecting it.
            for sprint in sprints.iter().rev() {
                let rows = cadence_metrics::sprint::populate_sprint_metrics(&ctx, sprint.id).await?;
                cadence_metrics::developer::populate_developer_metrics(&ctx, sprint.id).await?;
                if !rows.is_empty() {
                    updated += 1;
                }
            }
            info!(tenant = schema_name, sprints = updated, "sprint metrics recalculated");

            // Scope the AI refresh to the synced source's project when known.
            let project_id = match sync_source_id {
                Some(source_id) => ctx
                    .store
                    .get_source(*source_id)
                    .await?
                    .map(|s| s.project_id),
                None => None,
            };
            env.bus.publish(
                &ctx.telemetry_channel(),
                &TelemetryEvent::MetricsUpdate {
                    project_id,
                    sync_id: *sync_source_id,
                },
            );
            env.queue
                .enqueue(&Job::AiRefresh {
                    schema_name: schema_name.clone(),
                    project_id,
                })
                .await?;
            Ok(())
        }

        Job::AiRefresh {
            schema_name,
            project_id,
        } => {
            let ctx = env.registry.open_context(schema_name).await?;
            let provider = build_provider(&ctx.tenant, env.default_ai_key.as_deref());
            cadence_insights::refresh_insights(&ctx, *project_id, provider.as_ref(), &env.bus)
                .await?;
            Ok(())
        }

        Job::RetentionSweep => {
            let swept = retention::sweep_all(&env.registry).await?;
            info!(tenants = swept, "retention sweep completed");
            Ok(())
        }

        Job::DailyAggregation { schema_name, date } => {
            let ctx = env.registry.open_context(schema_name).await?;
            cadence_metrics::daily::aggregate_daily_metric(&ctx, *date).await?;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
