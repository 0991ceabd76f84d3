//! Connector framework.
//!
//! A [`Connector`] is a polymorphic value over `{test_connection,
//! list_folders, sync}`. Vendor implementations share one [`HttpClient`]
//! port so retries, timeouts and error mapping stay uniform, and report
//! progress through a [`ProgressReporter`] whose percents are monotonic
//! within a sync.

pub mod ado;
pub mod clickup;
pub mod github;
pub mod http;
pub mod jira;
pub mod link;

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use cadence_core::tenant::TenantContext;
use cadence_core::types::{SourceConfiguration, SourceType};

pub use http::HttpClient;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Connector error taxonomy. `Config` never counts toward a source's
/// consecutive failures; `Transient` is retried by the scheduler before it
/// does.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Missing credential or base url; surfaced verbatim to the admin UI.
    #[error("{0}")]
    Config(String),

    /// HTTP 401/403 after any refresh attempt.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP 5xx, network failure, timeout.
    #[error("transient vendor error: {0}")]
    Transient(String),

    /// Any other 4xx; terminal for this sync.
    #[error("vendor error: {0}")]
    Permanent(String),

    #[error(transparent)]
    Storage(#[from] cadence_core::CoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, ConnectorError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The slice of a source configuration a connector needs, plus the
/// project's coverage threshold for the compliance evaluator.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub username: Option<String>,
    pub workspace_id: Option<String>,
    pub config_json: serde_json::Value,
    pub coverage_threshold: f64,
}

impl ConnectorConfig {
    pub fn from_source(source: &SourceConfiguration, coverage_threshold: f64) -> Self {
        Self {
            base_url: source.base_url.trim_end_matches('/').to_string(),
            api_token: source.api_token.clone(),
            username: source.username.clone(),
            workspace_id: source.workspace_id.clone(),
            config_json: source.config_json.clone(),
            coverage_threshold,
        }
    }

    /// `config_json.field_mapping`, or an empty object.
    pub fn field_mapping(&self) -> serde_json::Value {
        self.config_json
            .get("field_mapping")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }

    pub fn active_folder_id(&self) -> Option<&str> {
        self.config_json
            .get("active_folder_id")
            .and_then(|v| v.as_str())
    }

    pub(crate) fn require_token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConnectorError::Config("API token is required".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback with a monotonic clamp: a report below the last
/// observed percent is raised to it, so subscribers always see a
/// non-decreasing sequence within one sync.
pub struct ProgressReporter {
    callback: Box<dyn Fn(u8, &str) + Send + Sync>,
    last: AtomicU8,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(u8, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            last: AtomicU8::new(0),
        }
    }

    /// Swallows all reports (tests, fire-and-forget syncs).
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, percent: u8, message: &str) {
        let percent = percent.min(100);
        let clamped = self.last.fetch_max(percent, Ordering::SeqCst).max(percent);
        (self.callback)(clamped, message);
    }

    pub fn last_percent(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A folder (board, space, project) the admin can scope a source to.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

/// Counters returned by a completed sync.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SyncStats {
    pub item_count: u64,
    pub sprint_count: u64,
    pub pull_request_count: u64,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// A real auth round-trip against the vendor. Errors carry a message
    /// safe to surface to the admin UI.
    async fn test_connection(&self) -> Result<bool>;

    /// Folders the admin can scope this source to.
    async fn list_folders(&self) -> Result<Vec<Folder>>;

    /// Full extract → transform → persist cycle for one source. The hot
    /// path: paginates vendor APIs, resolves assignees, evaluates
    /// compliance, and upserts by `(source_config_id, external_id)`.
    async fn sync(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        progress: &ProgressReporter,
    ) -> Result<SyncStats>;
}

/// Instantiate the connector for a source type.
pub fn build_connector(
    source_type: SourceType,
    config: ConnectorConfig,
    http: HttpClient,
) -> Box<dyn Connector> {
    match source_type {
        SourceType::Jira => Box::new(jira::JiraConnector::new(config, http)),
        SourceType::Clickup => Box::new(clickup::ClickupConnector::new(config, http)),
        SourceType::AzureDevops => Box::new(ado::AzureDevOpsConnector::new(config, http)),
        SourceType::Github => Box::new(github::GithubConnector::new(config, http)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn progress_reporter_is_monotonic() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(move |pct, _| sink.lock().unwrap().push(pct));

        reporter.report(5, "start");
        reporter.report(20, "connect");
        reporter.report(10, "late page"); // clamped up to 20
        reporter.report(95, "post");
        reporter.report(100, "done");

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![5, 20, 20, 95, 100]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn progress_caps_at_100() {
        let reporter = ProgressReporter::noop();
        reporter.report(250, "overflow");
        assert_eq!(reporter.last_percent(), 100);
    }

    #[test]
    fn connector_config_reads_scoping() {
        let mut source = SourceConfiguration::new(
            Uuid::new_v4(),
            SourceType::Clickup,
            "cu",
            "https://api.clickup.com/api/v2/",
        );
        source.config_json = serde_json::json!({
            "active_folder_id": "fold-9",
            "field_mapping": { "ai_usage_id": "cf_1" }
        });
        let config = ConnectorConfig::from_source(&source, 85.0);

        assert_eq!(config.base_url, "https://api.clickup.com/api/v2");
        assert_eq!(config.active_folder_id(), Some("fold-9"));
        assert_eq!(config.field_mapping()["ai_usage_id"], "cf_1");
        assert_eq!(config.coverage_threshold, 85.0);
        assert!(config.require_token().is_err());
    }
}
