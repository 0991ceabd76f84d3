//! Sync orchestrator.
//!
//! Runs one source's full extract → transform → persist cycle:
//!
//! ```text
//! queued → starting(5%) → connecting(20%) → discovery(25–45%)
//!        → fetch/transform(50–90%) → post-sync(95%) → success(100%)
//!        | failed(0%, terminal)
//! ```
//!
//! Every state change publishes to the tenant channel; task telemetry is
//! written to the tenant's `task_logs`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};
use uuid::Uuid;

use cadence_bridge::bus::Publisher;
use cadence_bridge::protocol::{ProgressStatus, TelemetryEvent};
use cadence_connectors::{
    build_connector, ConnectorConfig, ConnectorError, HttpClient, ProgressReporter, SyncStats,
};
use cadence_core::store::SourcePatch;
use cadence_core::tenant::TenantContext;
use cadence_core::types::{TaskLog, TaskStatus};

use crate::queue::{Job, JobQueue};
use crate::{DaemonError, Result};

/// Run one source sync end to end. `final_attempt` controls whether a
/// transient failure counts toward `consecutive_failures` (it does only
/// once the scheduler's retries are exhausted).
pub async fn run_source_sync(
    ctx: &TenantContext,
    source_id: Uuid,
    publisher: Arc<dyn Publisher>,
    queue: &JobQueue,
    http: HttpClient,
    final_attempt: bool,
) -> Result<SyncStats> {
    let started = Instant::now();
    let mut log = TaskLog::running("source_sync", Some(source_id.to_string()));
    ctx.store.insert_task_log(&log).await?;

    let source = match ctx.store.get_source(source_id).await? {
        Some(s) if s.is_active => s,
        _ => {
            log.status = TaskStatus::Failed;
            ctx.store
                .finish_task_log(
                    log.id,
                    TaskStatus::Failed,
                    Some(format!("Source {source_id} not found or inactive.")),
                    started.elapsed().as_millis() as i64,
                )
                .await?;
            return Err(DaemonError::SourceUnavailable(source_id));
        }
    };

    // The row is the de-facto lock; an overlapping sync is rejected.
    if !ctx.store.try_mark_sync_started(source_id).await? {
        ctx.store
            .finish_task_log(
                log.id,
                TaskStatus::Failed,
                Some("sync already in progress".to_string()),
                started.elapsed().as_millis() as i64,
            )
            .await?;
        return Err(DaemonError::SyncInProgress(source_id));
    }

    let project = ctx.store.get_project(source.project_id).await?;
    let project_id = project.as_ref().map(|p| p.id);
    let coverage_threshold = project
        .as_ref()
        .map(|p| p.default_coverage_threshold)
        .unwrap_or(80.0);

    let channel = ctx.telemetry_channel();
    let emit = {
        let publisher = publisher.clone();
        let channel = channel.clone();
        move |progress: u8, message: &str, status: ProgressStatus, stats: Option<serde_json::Value>| {
            publisher.publish(
                &channel,
                &TelemetryEvent::SyncProgress {
                    source_id,
                    project_id,
                    progress,
                    message: message.to_string(),
                    status,
                    stats,
                },
            );
        }
    };

    emit(5, "Initializing sync...", ProgressStatus::InProgress, None);
    emit(
        20,
        &format!("Connecting to {}...", source.name),
        ProgressStatus::InProgress,
        None,
    );

    let config = ConnectorConfig::from_source(&source, coverage_threshold);
    let connector = build_connector(source.source_type, config, http);

    let reporter = {
        let emit = emit.clone();
        ProgressReporter::new(move |pct, msg| {
            emit(pct, msg, ProgressStatus::InProgress, None);
        })
    };
    // The orchestrator already reported 20%.
    reporter.report(20, "Connected");

    match connector.sync(ctx, source_id, &reporter).await {
        Ok(stats) => {
            let now = chrono::Utc::now();
            ctx.store.record_sync_success(source_id, now).await?;
            ctx.store
                .finish_task_log(
                    log.id,
                    TaskStatus::Success,
                    None,
                    started.elapsed().as_millis() as i64,
                )
                .await?;

            // Metric recalculation runs after persistence; the dashboard
            // refresh event fires only once both have returned.
            queue
                .enqueue(&Job::MetricsRecalc {
                    schema_name: ctx.schema_name().to_string(),
                    sync_source_id: Some(source_id),
                })
                .await?;

            emit(
                100,
                &format!("Sync completed. {} items processed.", stats.item_count),
                ProgressStatus::Success,
                serde_json::to_value(&stats).ok(),
            );
            info!(
                source = %source.name,
                items = stats.item_count,
                prs = stats.pull_request_count,
                "sync succeeded"
            );
            Ok(stats)
        }
        Err(e) => {
            error!(source = %source.name, error = %e, "sync failed");
            let message = e.to_string();

            let retryable = e.is_transient() && !final_attempt;
            if retryable {
                ctx.store.record_sync_retry(source_id, &message).await?;
            } else if e.is_config() {
                // Config errors surface to the admin without moving the
                // failure counter.
                ctx.store.record_sync_retry(source_id, &message).await?;
            } else {
                let failures = ctx.store.record_sync_failure(source_id, &message).await?;
                if failures >= source.failure_alert_threshold {
                    publisher.publish(
                        &channel,
                        &TelemetryEvent::SyncAlert {
                            source_id,
                            consecutive_failures: failures,
                            message: message.clone(),
                        },
                    );
                }
            }

            ctx.store
                .finish_task_log(
                    log.id,
                    TaskStatus::Failed,
                    Some(message.clone()),
                    started.elapsed().as_millis() as i64,
                )
                .await?;

            emit(
                0,
                &format!("Sync failed: {message}"),
                ProgressStatus::Failed,
                None,
            );
            Err(e.into())
        }
    }
}

/// Apply an admin config patch. Changing `active_folder_id` enqueues a
/// sync; that decision lives here, not in the storage layer.
pub async fn apply_source_patch(
    ctx: &TenantContext,
    queue: &JobQueue,
    source_id: Uuid,
    patch: SourcePatch,
) -> Result<bool> {
    let (source, change) = ctx.store.update_source_config(source_id, patch).await?;

    if change.changed() {
        if queue.has_pending_sync(source_id).await? {
            info!(source = %source.name, "folder changed but a sync is already pending");
            return Ok(false);
        }
        queue
            .enqueue(&Job::SourceSync {
                source_id,
                schema_name: ctx.schema_name().to_string(),
            })
            .await?;
        info!(
            source = %source.name,
            old = ?change.old_folder,
            new = ?change.new_folder,
            "folder scope changed, sync enqueued"
        );
        return Ok(true);
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cadence_bridge::bus::InMemoryBus;
    use cadence_core::store::TenantStore;
    use cadence_core::types::*;

    async fn ctx() -> TenantContext {
        TenantContext::new(
            Tenant::new("Acme", "acme"),
            Arc::new(TenantStore::open_in_memory().await.unwrap()),
        )
    }

    async fn seed_source(ctx: &TenantContext, source_type: SourceType) -> SourceConfiguration {
        let project = Project::new(ctx.tenant.id, "P", "P");
        ctx.store.insert_project(&project).await.unwrap();
        let mut source = SourceConfiguration::new(
            project.id,
            source_type,
            "Primary",
            "https://vendor.invalid",
        );
        source.config_json = serde_json::json!({ "active_folder_id": "f1" });
        ctx.store.insert_source(&source).await.unwrap();
        source
    }

    #[tokio::test]
    async fn missing_source_fails_with_task_log() {
        let ctx = ctx().await;
        let bus = Arc::new(InMemoryBus::new());
        let queue = JobQueue::open_in_memory().await.unwrap();

        let err = run_source_sync(
            &ctx,
            Uuid::new_v4(),
            bus,
            &queue,
            HttpClient::new().unwrap(),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn overlapping_sync_is_rejected() {
        let ctx = ctx().await;
        let bus = Arc::new(InMemoryBus::new());
        let queue = JobQueue::open_in_memory().await.unwrap();
        let source = seed_source(&ctx, SourceType::Jira).await;

        // Simulate a running sync holding the row.
        assert!(ctx.store.try_mark_sync_started(source.id).await.unwrap());

        let err = run_source_sync(
            &ctx,
            source.id,
            bus,
            &queue,
            HttpClient::new().unwrap(),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::SyncInProgress(_)));
    }

    #[tokio::test]
    async fn config_error_does_not_move_failure_counter() {
        let ctx = ctx().await;
        let bus = Arc::new(InMemoryBus::new());
        let queue = JobQueue::open_in_memory().await.unwrap();
        // Jira with no username/token → ConnectorError::Config before any IO.
        let source = seed_source(&ctx, SourceType::Jira).await;

        let rx = bus.subscribe(&ctx.telemetry_channel());
        let err = run_source_sync(
            &ctx,
            source.id,
            bus.clone(),
            &queue,
            HttpClient::new().unwrap(),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::Connector(ConnectorError::Config(_))));

        let loaded = ctx.store.get_source(source.id).await.unwrap().unwrap();
        assert_eq!(loaded.consecutive_failures, 0);
        assert_eq!(loaded.last_sync_status, SyncStatus::Failed);

        // A failed progress frame went out, ending at 0%.
        let events: Vec<TelemetryEvent> = rx.drain().collect();
        let last = events.last().unwrap();
        assert!(matches!(
            last,
            TelemetryEvent::SyncProgress {
                progress: 0,
                status: ProgressStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn folder_change_enqueues_sync_once() {
        let ctx = ctx().await;
        let queue = JobQueue::open_in_memory().await.unwrap();
        let source = seed_source(&ctx, SourceType::Clickup).await;

        let enqueued = apply_source_patch(
            &ctx,
            &queue,
            source.id,
            SourcePatch {
                config_json: Some(serde_json::json!({ "active_folder_id": "f2" })),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(enqueued);
        assert_eq!(queue.depth().await.unwrap(), 1);

        // Same folder again: no change, nothing enqueued.
        let enqueued = apply_source_patch(
            &ctx,
            &queue,
            source.id,
            SourcePatch {
                config_json: Some(serde_json::json!({ "active_folder_id": "f2" })),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!enqueued);
        assert_eq!(queue.depth().await.unwrap(), 1);

        // Another change while a sync is already queued: rejected.
        let enqueued = apply_source_patch(
            &ctx,
            &queue,
            source.id,
            SourcePatch {
                config_json: Some(serde_json::json!({ "active_folder_id": "f3" })),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!enqueued);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }
}
