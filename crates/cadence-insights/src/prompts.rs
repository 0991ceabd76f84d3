//! Prompt templates for the insight providers.

use crate::provider::InsightMetrics;

pub const TEAM_HEALTH_SYSTEM_PROMPT: &str = "\
You are a high-performance engineering manager AI.
Analyze the following team performance data and identify BOTTLENECKS, OVERLOADED developers, and STAGNANT work.

Team Data:
- Average Cycle Time: {avg_cycle_time}
- Velocity History (Last 5 Sprints): {velocity_history}
- Developer History (Last 5 Sprints): {developer_history}
- Current Assignee Distribution: {assignee_distribution}
- Stagnant Items (>5 days in progress): {stagnant_items}

Response format (JSON):
{
  \"summary\": \"High-level team health overview with trend analysis based on last 5 sprints\",
  \"suggestions\": [
    {
      \"id\": \"unique_short_id\",
      \"title\": \"Short title\",
      \"impact\": \"High/Medium/Low\",
      \"description\": \"Specific advice considering trends\",
      \"status\": \"pending\"
    }
  ],
  \"forecast\": \"Predicted delivery risk\"
}";

/// Appended for chat-completion providers that like to wrap JSON in
/// markdown fences.
pub const JSON_ONLY_SUFFIX: &str = "\n\nYou MUST return a single JSON object. \
Do not wrap in markdown blocks, just return raw JSON.";

/// Fill the team-health template from gathered metrics.
pub fn team_health_prompt(metrics: &InsightMetrics) -> String {
    let avg_cycle_time = metrics
        .avg_cycle_time
        .map(|d| format!("{d:.1} days"))
        .unwrap_or_else(|| "N/A".to_string());

    TEAM_HEALTH_SYSTEM_PROMPT
        .replace("{avg_cycle_time}", &avg_cycle_time)
        .replace(
            "{velocity_history}",
            &serde_json::to_string(&metrics.velocity_history).unwrap_or_default(),
        )
        .replace(
            "{developer_history}",
            &serde_json::to_string(&metrics.developer_history).unwrap_or_default(),
        )
        .replace(
            "{assignee_distribution}",
            &serde_json::to_string(&metrics.assignee_distribution).unwrap_or_default(),
        )
        .replace(
            "{stagnant_items}",
            &serde_json::to_string(&metrics.stagnant_items).unwrap_or_default(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_placeholders_are_filled() {
        let metrics = InsightMetrics {
            avg_cycle_time: Some(2.5),
            compliance_rate: 80.0,
            velocity_history: vec![serde_json::json!({"sprint": "S1", "velocity": 20.0})],
            developer_history: vec![],
            assignee_distribution: vec![serde_json::json!({"email": "a@b.c"})],
            stagnant_items: vec![],
        };
        let prompt = team_health_prompt(&metrics);

        assert!(prompt.contains("2.5 days"));
        assert!(prompt.contains("\"sprint\":\"S1\""));
        assert!(prompt.contains("a@b.c"));
        assert!(!prompt.contains("{avg_cycle_time}"));
        assert!(!prompt.contains("{stagnant_items}"));
    }

    #[test]
    fn missing_cycle_time_renders_na() {
        let metrics = InsightMetrics::default();
        assert!(team_health_prompt(&metrics).contains("N/A"));
    }
}
