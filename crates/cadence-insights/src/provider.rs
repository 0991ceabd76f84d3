//! LLM providers for insight generation.
//!
//! Provider selection follows the tenant's `ai_provider` tag. Every call
//! runs through [`ResilientCaller`]: up to three attempts with exponential
//! backoff and jitter, a consecutive-failure count shared with the circuit
//! breaker, and a fallback payload when everything fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use cadence_core::types::{AiProviderKind, Suggestion, SuggestionStatus, Tenant};

use crate::breaker::{Breaker, BreakerConfig};
use crate::prompts::{self, JSON_ONLY_SUFFIX};

const MAX_ATTEMPTS: u32 = 3;
const AI_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Data shapes
// ---------------------------------------------------------------------------

/// Context assembled by the worker for one generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightMetrics {
    pub avg_cycle_time: Option<f64>,
    pub compliance_rate: f64,
    pub velocity_history: Vec<serde_json::Value>,
    pub developer_history: Vec<serde_json::Value>,
    pub assignee_distribution: Vec<serde_json::Value>,
    pub stagnant_items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightPayload {
    pub summary: String,
    pub suggestions: Vec<Suggestion>,
    pub forecast: Option<String>,
}

/// The payload returned whenever the provider cannot answer.
pub fn fallback_insight() -> InsightPayload {
    InsightPayload {
        summary: "AI Insight generation currently unavailable.".to_string(),
        suggestions: Vec::new(),
        forecast: Some("N/A".to_string()),
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Generate team-health insights; degrades to the fallback payload, it
    /// never errors outward.
    async fn generate_optimization_insights(&self, metrics: &InsightMetrics) -> InsightPayload;
}

/// Instantiate the provider for a tenant's AI configuration.
pub fn build_provider(tenant: &Tenant, default_api_key: Option<&str>) -> Arc<dyn AiProvider> {
    let api_key = tenant
        .ai_api_key
        .clone()
        .or_else(|| default_api_key.map(String::from));
    match tenant.ai_provider {
        AiProviderKind::Gemini => Arc::new(GeminiProvider::new(
            api_key,
            tenant.ai_model.clone(),
            tenant.ai_base_url.clone(),
        )),
        AiProviderKind::Kimi => Arc::new(KimiProvider::new(
            api_key,
            tenant.ai_model.clone(),
            tenant.ai_base_url.clone(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Retry + breaker engine
// ---------------------------------------------------------------------------

/// Retry with exponential backoff (`2^n + uniform(0,1)` seconds) behind the
/// circuit breaker. `None` means the caller should use the fallback.
pub struct ResilientCaller {
    breaker: Breaker,
    max_attempts: u32,
    /// One backoff unit; production uses one second, tests shrink it.
    backoff_unit: Duration,
}

impl ResilientCaller {
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            breaker: Breaker::new(breaker_config),
            max_attempts: MAX_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    pub fn for_tests(breaker_config: BreakerConfig, max_attempts: u32) -> Self {
        Self {
            breaker: Breaker::new(breaker_config),
            max_attempts,
            backoff_unit: Duration::from_millis(1),
        }
    }

    pub fn breaker(&self) -> &Breaker {
        &self.breaker
    }

    pub async fn call<F, Fut, T, E>(&self, op: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.breaker.allow() {
            warn!("AI circuit breaker is OPEN, skipping provider call");
            return None;
        }

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Some(value);
                }
                Err(e) => {
                    error!(attempt, error = %e, "AI generation failed");
                    if self.breaker.record_failure() {
                        break; // circuit just opened; stop retrying
                    }
                    if attempt < self.max_attempts {
                        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
                        let delay = self
                            .backoff_unit
                            .mul_f64(2f64.powi(attempt as i32) + jitter);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Strip a surrounding ```json / ``` fence if the model added one despite
/// instructions.
pub fn strip_code_fence(text: &str) -> &str {
    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest;
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest;
    }
    trimmed.trim()
}

/// Parse the model's JSON object into a payload; suggestions without ids
/// get generated ones, statuses default to pending.
pub fn parse_insight_payload(raw: &str) -> Option<InsightPayload> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw)).ok()?;
    let summary = value.get("summary")?.as_str()?.to_string();

    let mut suggestions = Vec::new();
    for (i, s) in value
        .get("suggestions")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .enumerate()
    {
        let title = match s.get("title").and_then(|v| v.as_str()) {
            Some(t) => t.to_string(),
            None => continue,
        };
        suggestions.push(Suggestion {
            id: s
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("sg-{}", i + 1)),
            title,
            impact: s
                .get("impact")
                .and_then(|v| v.as_str())
                .unwrap_or("Medium")
                .to_string(),
            description: s
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: SuggestionStatus::Pending,
            updated_at: None,
        });
    }

    Some(InsightPayload {
        summary,
        suggestions,
        forecast: value
            .get("forecast")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Google Gemini via the REST generateContent endpoint.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    caller: ResilientCaller,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(AI_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: model.unwrap_or_else(|| "gemini-1.5-pro".to_string()),
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            caller: ResilientCaller::new(BreakerConfig::default()),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, String> {
        let api_key = self.api_key.as_deref().ok_or("no API key configured")?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            api_key
        );
        let body = serde_json::json!({
            "contents": [ { "parts": [ { "text": prompt } ] } ],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("gemini returned {}", resp.status()));
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        value
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| "no text candidate in response".to_string())
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    async fn generate_optimization_insights(&self, metrics: &InsightMetrics) -> InsightPayload {
        if self.api_key.is_none() {
            return fallback_insight();
        }
        let prompt = prompts::team_health_prompt(metrics);
        let parsed = self
            .caller
            .call(|| async {
                let text = self.generate(&prompt).await?;
                parse_insight_payload(&text).ok_or_else(|| "unparseable payload".to_string())
            })
            .await;
        parsed.unwrap_or_else(fallback_insight)
    }
}

// ---------------------------------------------------------------------------
// Kimi
// ---------------------------------------------------------------------------

/// Moonshot Kimi via an OpenAI-style chat-completions endpoint.
pub struct KimiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    caller: ResilientCaller,
}

impl KimiProvider {
    pub fn new(api_key: Option<String>, model: Option<String>, base_url: Option<String>) -> Self {
        let base = base_url
            .unwrap_or_else(|| "https://integrate.api.nvidia.com/v1/chat/completions".to_string());
        Self {
            client: reqwest::Client::builder()
                .timeout(AI_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: model.unwrap_or_else(|| "moonshotai/kimi-k2.5".to_string()),
            base_url: normalize_chat_url(&base),
            caller: ResilientCaller::new(BreakerConfig::default()),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, String> {
        let api_key = self.api_key.as_deref().ok_or("no API key configured")?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": [ { "role": "user", "content": prompt } ],
            "temperature": 0.2,
            "max_tokens": 1024,
            "chat_template_kwargs": { "thinking": true }
        });

        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("kimi returned {}", resp.status()));
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| "no completion choice in response".to_string())
    }
}

#[async_trait]
impl AiProvider for KimiProvider {
    async fn generate_optimization_insights(&self, metrics: &InsightMetrics) -> InsightPayload {
        if self.api_key.is_none() {
            return fallback_insight();
        }
        let prompt = format!("{}{JSON_ONLY_SUFFIX}", prompts::team_health_prompt(metrics));
        let parsed = self
            .caller
            .call(|| async {
                let text = self.generate(&prompt).await?;
                parse_insight_payload(&text).ok_or_else(|| "unparseable payload".to_string())
            })
            .await;
        parsed.unwrap_or_else(fallback_insight)
    }
}

/// Accept both a bare host and a full chat-completions URL.
fn normalize_chat_url(url: &str) -> String {
    if url.ends_with("/chat/completions") {
        url.to_string()
    } else {
        format!("{}/v1/chat/completions", url.trim_end_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn payload_parsing_defaults_and_ids() {
        let raw = r#"```json
        {
          "summary": "Team healthy",
          "suggestions": [
            { "id": "load", "title": "Rebalance", "impact": "High", "description": "d", "status": "pending" },
            { "title": "No id given", "description": "x" }
          ],
          "forecast": "Low risk"
        }
        ```"#;
        let payload = parse_insight_payload(raw).unwrap();
        assert_eq!(payload.summary, "Team healthy");
        assert_eq!(payload.suggestions.len(), 2);
        assert_eq!(payload.suggestions[0].id, "load");
        assert_eq!(payload.suggestions[1].id, "sg-2");
        assert_eq!(payload.suggestions[1].impact, "Medium");
        assert!(payload
            .suggestions
            .iter()
            .all(|s| s.status == SuggestionStatus::Pending));
        assert_eq!(payload.forecast.as_deref(), Some("Low risk"));
    }

    #[test]
    fn garbage_payload_is_none() {
        assert!(parse_insight_payload("not json").is_none());
        assert!(parse_insight_payload("{\"no_summary\": true}").is_none());
    }

    #[test]
    fn chat_url_normalization() {
        assert_eq!(
            normalize_chat_url("https://integrate.api.nvidia.com/v1/chat/completions"),
            "https://integrate.api.nvidia.com/v1/chat/completions"
        );
        assert_eq!(
            normalize_chat_url("https://host.example/"),
            "https://host.example/v1/chat/completions"
        );
    }

    #[test]
    fn fallback_shape_matches_contract() {
        let fb = fallback_insight();
        assert_eq!(fb.summary, "AI Insight generation currently unavailable.");
        assert!(fb.suggestions.is_empty());
        assert_eq!(fb.forecast.as_deref(), Some("N/A"));
    }

    #[tokio::test]
    async fn retries_three_times_then_gives_up() {
        let caller = ResilientCaller::for_tests(BreakerConfig::default(), 3);
        let calls = AtomicU32::new(0);

        let result: Option<()> = caller
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(caller.breaker().consecutive_failures(), 3);
    }

    #[tokio::test]
    async fn success_resets_failures() {
        let caller = ResilientCaller::for_tests(BreakerConfig::default(), 3);
        let calls = AtomicU32::new(0);

        let result = caller
            .call(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err("first fails".to_string())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Some(42));
        assert_eq!(caller.breaker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn breaker_short_circuits_then_probes_after_cooldown() {
        // One attempt per call so each call is exactly one provider exception.
        let caller = ResilientCaller::for_tests(
            BreakerConfig {
                failure_threshold: 5,
                cooldown: Duration::from_millis(50),
            },
            1,
        );
        let calls = AtomicU32::new(0);
        let failing = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("provider down")
        };

        // Five consecutive exceptions trip the breaker.
        for _ in 0..5 {
            assert!(caller.call(failing).await.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // Sixth call short-circuits without touching the provider.
        assert!(caller.call(failing).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // After the cooldown the seventh call reaches the provider again.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(caller.call(failing).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }
}
