//! The insight worker.
//!
//! Gather metric context → consult the provider → persist the insight,
//! publishing progress at the Gathering / Consulting / Finalizing stages.

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use cadence_bridge::bus::Publisher;
use cadence_bridge::protocol::{truncate_summary, TelemetryEvent};
use cadence_core::tenant::TenantContext;
use cadence_core::types::{AiInsight, StatusCategory, WorkItem};

use crate::provider::{AiProvider, InsightMetrics};

const STAGNANT_AFTER_DAYS: i64 = 5;
const HISTORY_WINDOW: u32 = 5;

/// Generate and persist one insight for a project scope (None =
/// tenant-global). Provider failures degrade to the fallback payload and
/// never error out of the worker.
pub async fn refresh_insights(
    ctx: &TenantContext,
    project_id: Option<Uuid>,
    provider: &dyn AiProvider,
    publisher: &dyn Publisher,
) -> cadence_core::Result<AiInsight> {
    let channel = ctx.telemetry_channel();

    publisher.publish(
        &channel,
        &TelemetryEvent::AiInsightProgress {
            project_id,
            progress: 25,
            status: "Gathering project metrics...".to_string(),
        },
    );
    let metrics = gather_metrics(ctx, project_id).await?;

    publisher.publish(
        &channel,
        &TelemetryEvent::AiInsightProgress {
            project_id,
            progress: 60,
            status: "Consulting AI expert...".to_string(),
        },
    );
    let payload = provider.generate_optimization_insights(&metrics).await;

    publisher.publish(
        &channel,
        &TelemetryEvent::AiInsightProgress {
            project_id,
            progress: 90,
            status: "Finalizing suggestions...".to_string(),
        },
    );

    let insight = AiInsight {
        id: Uuid::new_v4(),
        project_id,
        summary: payload.summary,
        suggestions: payload.suggestions,
        forecast: payload.forecast,
        created_at: Utc::now(),
    };
    ctx.store.insert_ai_insight(&insight).await?;
    info!(insight = %insight.id, project = ?project_id, "AI insight stored");

    publisher.publish(&channel, &TelemetryEvent::AiInsightUpdate { project_id });
    publisher.publish(
        &ctx.data_channel(),
        &TelemetryEvent::InsightReady {
            insight_id: insight.id,
            summary: truncate_summary(&insight.summary),
            created_at: insight.created_at,
        },
    );

    Ok(insight)
}

/// Assemble the provider's context: the last five sprint rollups, the
/// assignee distribution over those sprints, stagnant items, and each
/// involved developer's recent history.
pub async fn gather_metrics(
    ctx: &TenantContext,
    project_id: Option<Uuid>,
) -> cadence_core::Result<InsightMetrics> {
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

    let recent = ctx
        .store
        .list_recent_sprint_metrics(project_id, HISTORY_WINDOW)
        .await?;

    let (avg_cycle_time, compliance_rate) = if recent.is_empty() {
        // No rollups yet: compute live, exactly like the storage fallback.
        let (total, compliant) = ctx.store.count_compliance(source_ids.as_deref()).await?;
        let rate = if total > 0 {
            compliant as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        (None, rate)
    } else {
        let cycles: Vec<f64> = recent.iter().filter_map(|m| m.avg_cycle_time_days).collect();
        let avg = if cycles.is_empty() {
            None
        } else {
            Some(cycles.iter().sum::<f64>() / cycles.len() as f64)
        };
        (avg, recent[0].compliance_rate_percent)
    };

    let velocity_history: Vec<serde_json::Value> = recent
        .iter()
        .map(|m| {
            serde_json::json!({
                "sprint": m.sprint_name,
                "end_date": m.sprint_end_date.to_string(),
                "velocity": m.velocity,
                "items_completed": m.items_completed,
                "compliance_rate": m.compliance_rate_percent,
            })
        })
        .collect();

    // Items in the window sprints, for the distribution.
    let mut window_items: Vec<WorkItem> = Vec::new();
    for m in &recent {
        if let Some(sprint) = ctx.store.get_sprint_by_name(&m.sprint_name).await? {
            window_items.extend(
                ctx.store
                    .list_work_items_for_sprint(sprint.id, source_ids.as_deref())
                    .await?,
            );
        }
    }
    let assignee_distribution = assignee_distribution(ctx, &window_items).await?;

    let stagnant_cutoff = Utc::now() - Duration::days(STAGNANT_AFTER_DAYS);
    let stagnant_items: Vec<serde_json::Value> = ctx
        .store
        .list_stagnant_work_items(stagnant_cutoff, source_ids.as_deref())
        .await?
        .iter()
        .map(|i| {
            serde_json::json!({
                "external_id": i.external_id,
                "title": i.title,
                "assignee": i.assignee_email,
                "updated_at": i.updated_at.to_rfc3339(),
            })
        })
        .collect();

    // Recent history for the developers in the distribution.
    let mut developer_history = Vec::new();
    for row in &assignee_distribution {
        if let Some(email) = row.get("email").and_then(|v| v.as_str()) {
            for m in ctx
                .store
                .list_recent_developer_metrics(email, HISTORY_WINDOW)
                .await?
            {
                developer_history.push(serde_json::json!({
                    "email": m.developer_email,
                    "sprint": m.sprint_name,
                    "points": m.story_points_completed,
                    "items": m.items_completed,
                    "compliance_rate": m.dmt_compliance_rate,
                    "ai_usage": m.ai_usage_avg_percent,
                }));
            }
        }
    }

    Ok(InsightMetrics {
        avg_cycle_time,
        compliance_rate,
        velocity_history,
        developer_history,
        assignee_distribution,
        stagnant_items,
    })
}

/// Linked-user rows grouped by resolved assignee first, then unlinked
/// email rows deduplicated against them.
async fn assignee_distribution(
    ctx: &TenantContext,
    items: &[WorkItem],
) -> cadence_core::Result<Vec<serde_json::Value>> {
    use std::collections::BTreeMap;

    struct Row {
        name: String,
        email: String,
        in_progress: u32,
        completed: u32,
        cycle_times: Vec<f64>,
    }

    let mut linked: BTreeMap<Uuid, Row> = BTreeMap::new();
    let mut unlinked: BTreeMap<String, Row> = BTreeMap::new();

    for item in items {
        let bucket = match item.resolved_assignee_id {
            Some(user_id) => {
                if !linked.contains_key(&user_id) {
                    let user = ctx.store.get_user(user_id).await?;
                    let (name, email) = match user {
                        Some(u) => {
                            let name = if u.full_name().is_empty() {
                                u.username.clone()
                            } else {
                                u.full_name()
                            };
                            (name, u.email.unwrap_or_default())
                        }
                        None => (String::new(), String::new()),
                    };
                    linked.insert(
                        user_id,
                        Row {
                            name,
                            email,
                            in_progress: 0,
                            completed: 0,
                            cycle_times: Vec::new(),
                        },
                    );
                }
                linked.get_mut(&user_id).expect("just inserted")
            }
            None => {
                let email = match item.assignee_email.as_deref().map(str::trim) {
                    Some(e) if !e.is_empty() => e.to_lowercase(),
                    _ => continue,
                };
                unlinked.entry(email.clone()).or_insert_with(|| Row {
                    name: item.assignee_name.clone().unwrap_or_else(|| email.clone()),
                    email,
                    in_progress: 0,
                    completed: 0,
                    cycle_times: Vec::new(),
                })
            }
        };

        match item.status_category {
            StatusCategory::InProgress => bucket.in_progress += 1,
            StatusCategory::Done => {
                bucket.completed += 1;
                if let Some(days) = item.cycle_time_days() {
                    bucket.cycle_times.push(days);
                }
            }
            StatusCategory::Todo => {}
        }
    }

    // Drop unlinked rows whose email already appears under a linked user.
    let linked_emails: Vec<String> = linked
        .values()
        .map(|r| r.email.to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    let to_json = |row: &Row| {
        let avg_cycle = if row.cycle_times.is_empty() {
            serde_json::Value::Null
        } else {
            let avg = row.cycle_times.iter().sum::<f64>() / row.cycle_times.len() as f64;
            serde_json::json!((avg * 10.0).round() / 10.0)
        };
        serde_json::json!({
            "name": row.name,
            "email": row.email,
            "in_progress": row.in_progress,
            "completed": row.completed,
            "avg_cycle_time": avg_cycle,
        })
    };

    let mut out: Vec<serde_json::Value> = linked.values().map(to_json).collect();
    out.extend(
        unlinked
            .values()
            .filter(|r| !linked_emails.contains(&r.email))
            .map(to_json),
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use cadence_bridge::bus::InMemoryBus;
    use cadence_core::store::TenantStore;
    use cadence_core::types::*;

    use crate::provider::{fallback_insight, InsightPayload};

    struct CannedProvider {
        payload: InsightPayload,
        seen: Mutex<Vec<InsightMetrics>>,
    }

    #[async_trait]
    impl AiProvider for CannedProvider {
        async fn generate_optimization_insights(&self, metrics: &InsightMetrics) -> InsightPayload {
            self.seen.lock().unwrap().push(metrics.clone());
            self.payload.clone()
        }
    }

    async fn ctx() -> TenantContext {
        TenantContext::new(
            Tenant::new("Acme", "acme"),
            Arc::new(TenantStore::open_in_memory().await.unwrap()),
        )
    }

    fn canned() -> CannedProvider {
        CannedProvider {
            payload: InsightPayload {
                summary: "Team is overloaded on reviews".to_string(),
                suggestions: vec![Suggestion {
                    id: "sg-1".into(),
                    title: "Rotate reviewers".into(),
                    impact: "High".into(),
                    description: "Spread the load".into(),
                    status: SuggestionStatus::Pending,
                    updated_at: None,
                }],
                forecast: Some("On track".into()),
            },
            seen: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn worker_publishes_three_stages_then_update() {
        let ctx = ctx().await;
        let bus = InMemoryBus::new();
        let telemetry = bus.subscribe(&ctx.telemetry_channel());
        let signals = bus.subscribe(&ctx.data_channel());
        let provider = canned();

        let insight = refresh_insights(&ctx, None, &provider, &bus).await.unwrap();
        assert_eq!(insight.summary, "Team is overloaded on reviews");

        let events: Vec<TelemetryEvent> = telemetry.drain().collect();
        let mut progress = Vec::new();
        let mut saw_update = false;
        for event in &events {
            match event {
                TelemetryEvent::AiInsightProgress { progress: p, status, .. } => {
                    progress.push((*p, status.clone()));
                }
                TelemetryEvent::AiInsightUpdate { .. } => saw_update = true,
                _ => {}
            }
        }
        assert_eq!(
            progress.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
            vec![25, 60, 90]
        );
        assert!(progress[0].1.contains("Gathering"));
        assert!(progress[1].1.contains("Consulting"));
        assert!(progress[2].1.contains("Finalizing"));
        assert!(saw_update);

        // insight_ready lands on the data channel with a truncated summary.
        let ready: Vec<TelemetryEvent> = signals.drain().collect();
        assert!(matches!(ready[0], TelemetryEvent::InsightReady { .. }));

        // Persisted and retrievable.
        let stored = ctx.store.latest_ai_insight(None).await.unwrap().unwrap();
        assert_eq!(stored.id, insight.id);
        assert_eq!(stored.suggestions.len(), 1);
    }

    #[tokio::test]
    async fn gather_falls_back_to_live_compliance() {
        let ctx = ctx().await;
        let source = Uuid::new_v4();
        let mut ok = WorkItem::new(source, "A", "a");
        ok.dmt_compliant = true;
        ctx.store.upsert_work_item(&ok).await.unwrap();
        ctx.store
            .upsert_work_item(&WorkItem::new(source, "B", "b"))
            .await
            .unwrap();

        let metrics = gather_metrics(&ctx, None).await.unwrap();
        assert_eq!(metrics.compliance_rate, 50.0);
        assert!(metrics.avg_cycle_time.is_none());
        assert!(metrics.velocity_history.is_empty());
    }

    #[tokio::test]
    async fn stagnant_items_use_five_day_cutoff() {
        let ctx = ctx().await;
        let source = Uuid::new_v4();
        let now = Utc::now();

        let mut stale = WorkItem::new(source, "S-1", "stuck");
        stale.status_category = StatusCategory::InProgress;
        stale.updated_at = now - Duration::days(6);
        ctx.store.upsert_work_item(&stale).await.unwrap();

        let mut fresh = WorkItem::new(source, "S-2", "moving");
        fresh.status_category = StatusCategory::InProgress;
        fresh.updated_at = now - Duration::days(2);
        ctx.store.upsert_work_item(&fresh).await.unwrap();

        let metrics = gather_metrics(&ctx, None).await.unwrap();
        assert_eq!(metrics.stagnant_items.len(), 1);
        assert_eq!(metrics.stagnant_items[0]["external_id"], "S-1");
    }

    #[tokio::test]
    async fn distribution_dedupes_unlinked_against_linked() {
        let ctx = ctx().await;
        let source = Uuid::new_v4();

        let mut user = User::shadow("ana", Some("ana@x.io".into()));
        user.first_name = "Ana".into();
        user.last_name = "Lima".into();
        ctx.store.insert_user(&user).await.unwrap();

        let mut sprint = Sprint::new("s", "S1");
        sprint.start_date = Some(Utc::now() - Duration::days(10));
        sprint.end_date = Some(Utc::now());
        let sprint = ctx.store.upsert_sprint(&sprint).await.unwrap();

        // One linked item, one unlinked item with the same email, one
        // unlinked item with a different email.
        let mut linked = WorkItem::new(source, "L-1", "l");
        linked.sprint_id = Some(sprint.id);
        linked.resolved_assignee_id = Some(user.id);
        linked.status_category = StatusCategory::InProgress;
        let mut same_email = WorkItem::new(source, "L-2", "l2");
        same_email.sprint_id = Some(sprint.id);
        same_email.assignee_email = Some("ANA@x.io".into());
        same_email.status_category = StatusCategory::InProgress;
        let mut other = WorkItem::new(source, "L-3", "l3");
        other.sprint_id = Some(sprint.id);
        other.assignee_email = Some("bo@x.io".into());
        other.assignee_name = Some("Bo".into());
        other.status_category = StatusCategory::InProgress;

        for item in [&linked, &same_email, &other] {
            ctx.store.upsert_work_item(item).await.unwrap();
        }

        let rows = assignee_distribution(
            &ctx,
            &ctx.store.list_work_items().await.unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 2, "{rows:?}");
        let emails: Vec<&str> = rows.iter().filter_map(|r| r["email"].as_str()).collect();
        assert!(emails.contains(&"ana@x.io"));
        assert!(emails.contains(&"bo@x.io"));
        let ana = rows.iter().find(|r| r["email"] == "ana@x.io").unwrap();
        assert_eq!(ana["name"], "Ana Lima");
    }

    #[tokio::test]
    async fn provider_fallback_is_persisted_not_raised() {
        struct FailingProvider;
        #[async_trait]
        impl AiProvider for FailingProvider {
            async fn generate_optimization_insights(
                &self,
                _metrics: &InsightMetrics,
            ) -> InsightPayload {
                fallback_insight()
            }
        }

        let ctx = ctx().await;
        let bus = InMemoryBus::new();
        let insight = refresh_insights(&ctx, None, &FailingProvider, &bus)
            .await
            .unwrap();
        assert_eq!(insight.summary, "AI Insight generation currently unavailable.");
        assert!(insight.suggestions.is_empty());
    }
}
