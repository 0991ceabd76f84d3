use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status field carried by progress frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Success,
    Failed,
}

/// JSON frames on the tenant channels, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// One sync's staged progress; percents are monotonic per sync.
    SyncProgress {
        source_id: Uuid,
        project_id: Option<Uuid>,
        progress: u8,
        message: String,
        status: ProgressStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<serde_json::Value>,
    },
    /// Metric rollups changed; dashboards should refetch.
    MetricsUpdate {
        project_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sync_id: Option<Uuid>,
    },
    /// AI worker stage transitions (Gathering / Consulting / Finalizing).
    AiInsightProgress {
        project_id: Option<Uuid>,
        progress: u8,
        status: String,
    },
    /// A new insight row exists.
    AiInsightUpdate { project_id: Option<Uuid> },
    /// Post-persist notification with a truncated summary.
    InsightReady {
        insight_id: Uuid,
        summary: String,
        created_at: DateTime<Utc>,
    },
    /// A source crossed its failure-alert threshold.
    SyncAlert {
        source_id: Uuid,
        consecutive_failures: u32,
        message: String,
    },
    /// Admin channel: periodic platform health.
    HealthUpdate { data: serde_json::Value },
    /// Admin channel: audit-log activity.
    ActivityUpdate { data: serde_json::Value },
}

/// Truncate an insight summary for `insight_ready` frames: at most 100
/// characters plus an ellipsis.
pub fn truncate_summary(summary: &str) -> String {
    let mut truncated: String = summary.chars().take(100).collect();
    if summary.chars().count() > 100 {
        truncated.push('…');
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_discriminator() {
        let event = TelemetryEvent::SyncProgress {
            source_id: Uuid::nil(),
            project_id: None,
            progress: 45,
            message: "Discovering...".into(),
            status: ProgressStatus::InProgress,
            stats: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sync_progress");
        assert_eq!(json["progress"], 45);
        assert_eq!(json["status"], "in_progress");
        assert!(json.get("stats").is_none());

        let event = TelemetryEvent::MetricsUpdate {
            project_id: None,
            sync_id: None,
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "metrics_update");
    }

    #[test]
    fn events_round_trip() {
        let event = TelemetryEvent::InsightReady {
            insight_id: Uuid::new_v4(),
            summary: "short".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TelemetryEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, TelemetryEvent::InsightReady { .. }));
    }

    #[test]
    fn summary_truncation_at_100_chars() {
        assert_eq!(truncate_summary("ok"), "ok");
        let long = "x".repeat(150);
        let t = truncate_summary(&long);
        assert_eq!(t.chars().count(), 101);
        assert!(t.ends_with('…'));
        // Multi-byte safety.
        let unicode = "é".repeat(120);
        assert_eq!(truncate_summary(&unicode).chars().count(), 101);
    }
}
