//! Pipeline integration: metric recalculation chains into AI refresh, and
//! every stage surfaces on the tenant's channels only.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use cadence_bridge::bus::InMemoryBus;
use cadence_bridge::protocol::TelemetryEvent;
use cadence_connectors::HttpClient;
use cadence_core::registry::Registry;
use cadence_core::types::*;
use cadence_daemon::queue::{JobQueue, QUEUE_AI_INSIGHTS, QUEUE_DEFAULT};
use cadence_daemon::worker::{dispatch, WorkerEnv};
use cadence_daemon::queue::Job;

async fn test_env() -> Arc<WorkerEnv> {
    Arc::new(WorkerEnv {
        registry: Arc::new(Registry::open_in_memory().await.unwrap()),
        queue: Arc::new(JobQueue::open_in_memory().await.unwrap()),
        bus: InMemoryBus::new(),
        http: HttpClient::new().unwrap(),
        default_ai_key: None,
    })
}

/// Seed one tenant with a project, a source, a finished sprint and a couple
/// of work items, as a completed sync would leave them.
async fn seed_tenant(env: &WorkerEnv) -> (cadence_core::tenant::TenantContext, Uuid) {
    env.registry.create_tenant("Acme Corp", "acme_corp").await.unwrap();
    let ctx = env.registry.open_context("acme_corp").await.unwrap();

    let project = Project::new(ctx.tenant.id, "Platform", "PLAT");
    ctx.store.insert_project(&project).await.unwrap();
    let source = SourceConfiguration::new(
        project.id,
        SourceType::Jira,
        "Jira main",
        "https://jira.example",
    );
    ctx.store.insert_source(&source).await.unwrap();

    let now = Utc::now();
    let mut sprint = Sprint::new("jira_sprint_7", "Sprint 7");
    sprint.start_date = Some(now - Duration::days(14));
    sprint.end_date = Some(now - Duration::days(1));
    sprint.status = SprintStatus::Completed;
    let sprint = ctx.store.upsert_sprint(&sprint).await.unwrap();

    let mut done = WorkItem::new(source.id, "PLAT-1", "Ship feature");
    done.item_type = ItemType::Story;
    done.sprint_id = Some(sprint.id);
    done.status_category = StatusCategory::Done;
    done.story_points = Some(5.0);
    done.assignee_email = Some("dev@acme.io".into());
    done.created_at = now - Duration::days(10);
    done.started_at = Some(now - Duration::days(8));
    done.resolved_at = Some(now - Duration::days(2));
    done.dmt_compliant = true;
    ctx.store.upsert_work_item(&done).await.unwrap();

    let mut open = WorkItem::new(source.id, "PLAT-2", "Fix bug");
    open.item_type = ItemType::Bug;
    open.sprint_id = Some(sprint.id);
    open.status_category = StatusCategory::InProgress;
    open.assignee_email = Some("dev@acme.io".into());
    ctx.store.upsert_work_item(&open).await.unwrap();

    (ctx, source.id)
}

#[tokio::test]
async fn recalc_chains_into_ai_refresh_and_stays_tenant_scoped() {
    let env = test_env().await;
    let (ctx, source_id) = seed_tenant(&env).await;

    // Another tenant subscribed to its own channel must see nothing.
    env.registry.create_tenant("Other Co", "other_co").await.unwrap();
    let other_ctx = env.registry.open_context("other_co").await.unwrap();
    let other_rx = env.bus.subscribe(&other_ctx.telemetry_channel());

    let rx = env.bus.subscribe(&ctx.telemetry_channel());
    let signals_rx = env.bus.subscribe(&ctx.data_channel());

    // 1. Metric recalculation, as the orchestrator enqueues it post-sync.
    env.queue
        .enqueue(&Job::MetricsRecalc {
            schema_name: "acme_corp".into(),
            sync_source_id: Some(source_id),
        })
        .await
        .unwrap();
    let job = env.queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
    dispatch(&env, job).await;

    // Sprint and developer rollups exist.
    let rollups = ctx.store.list_recent_sprint_metrics(None, 5).await.unwrap();
    assert_eq!(rollups.len(), 1);
    assert_eq!(rollups[0].velocity, 5.0);
    assert_eq!(rollups[0].total_items, 2);

    let end = rollups[0].sprint_end_date;
    let devs = ctx
        .store
        .list_developer_metrics_for_sprint("Sprint 7", end)
        .await
        .unwrap();
    assert!(devs.iter().any(|d| d.developer_email == "dev@acme.io"));

    // 2. The chained AI refresh runs on its own queue; with no provider key
    //    configured it stores the fallback insight.
    let ai_job = env.queue.claim(QUEUE_AI_INSIGHTS).await.unwrap().unwrap();
    dispatch(&env, ai_job).await;

    let project_scope = ctx.store.list_projects().await.unwrap()[0].id;
    let insight = ctx
        .store
        .latest_ai_insight(Some(project_scope))
        .await
        .unwrap()
        .expect("insight stored for the synced project scope");
    assert_eq!(insight.summary, "AI Insight generation currently unavailable.");

    // 3. Events: metrics_update plus the three AI stages and the final
    //    update, all on the tenant's telemetry channel.
    let events: Vec<TelemetryEvent> = rx.drain().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, TelemetryEvent::MetricsUpdate { .. })));
    let ai_progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            TelemetryEvent::AiInsightProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(ai_progress, vec![25, 60, 90]);
    assert!(events
        .iter()
        .any(|e| matches!(e, TelemetryEvent::AiInsightUpdate { .. })));

    // insight_ready lands on the data-signal channel.
    let signals: Vec<TelemetryEvent> = signals_rx.drain().collect();
    assert!(signals
        .iter()
        .any(|e| matches!(e, TelemetryEvent::InsightReady { .. })));

    // 4. Tenant isolation: the other tenant received nothing at all.
    assert_eq!(other_rx.drain().count(), 0);
}

#[tokio::test]
async fn daily_aggregation_then_dashboard_summary() {
    let env = test_env().await;
    let (ctx, _) = seed_tenant(&env).await;

    env.queue
        .enqueue(&Job::MetricsRecalc {
            schema_name: "acme_corp".into(),
            sync_source_id: None,
        })
        .await
        .unwrap();
    let job = env.queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
    dispatch(&env, job).await;

    let summary = cadence_metrics::dashboard::dashboard_summary(&ctx, None)
        .await
        .unwrap();
    // One completed 5-point story over one sprint in the window.
    assert_eq!(summary.active_sprint.total_points, 5.0);
    assert_eq!(summary.active_sprint.item_count, 1.0);
    // Stored rate (1 compliant of 2) matches the live recomputation, so no
    // override kicks in.
    assert_eq!(summary.compliance_rate, 50.0);
}
