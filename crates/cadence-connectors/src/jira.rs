//! Jira Cloud connector.
//!
//! Issues come from `/rest/api/3/search` with `expand=changelog`; sprints
//! are discovered by enumerating agile boards. Basic auth with
//! `email:api_token` by default; when `config_json` carries OAuth refresh
//! credentials the connector uses a bearer token and replays a failed call
//! once after a refresh.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use cadence_core::compliance;
use cadence_core::identity::{self, ExternalAssignee};
use cadence_core::tenant::TenantContext;
use cadence_core::types::{ItemType, Sprint, SprintStatus, StatusCategory, WorkItem};

use crate::http::HttpClient;
use crate::{Connector, ConnectorConfig, ConnectorError, Folder, ProgressReporter, Result, SyncStats};

const PAGE_SIZE: u32 = 50;
const PROVIDER: &str = "jira";

pub struct JiraConnector {
    config: ConnectorConfig,
    http: HttpClient,
    /// OAuth access token once refreshed; None for basic auth.
    bearer: RwLock<Option<String>>,
}

impl JiraConnector {
    pub fn new(config: ConnectorConfig, http: HttpClient) -> Self {
        Self {
            config,
            http,
            bearer: RwLock::new(None),
        }
    }

    fn base(&self) -> &str {
        &self.config.base_url
    }

    fn oauth_refresh_token(&self) -> Option<&str> {
        self.config
            .config_json
            .get("oauth")
            .and_then(|o| o.get("refresh_token"))
            .and_then(|v| v.as_str())
    }

    async fn auth_headers(&self) -> Result<Vec<(&'static str, String)>> {
        if let Some(token) = self.bearer.read().await.clone() {
            return Ok(vec![
                ("authorization", format!("Bearer {token}")),
                ("accept", "application/json".to_string()),
            ]);
        }
        let email = self
            .config
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConnectorError::Config("Jira requires a username (email)".into()))?;
        let token = self.config.require_token()?;
        let basic = base64::engine::general_purpose::STANDARD.encode(format!("{email}:{token}"));
        Ok(vec![
            ("authorization", format!("Basic {basic}")),
            ("accept", "application/json".to_string()),
        ])
    }

    /// Exchange the refresh token for a new access token.
    async fn refresh_oauth(&self) -> Result<()> {
        let oauth = self
            .config
            .config_json
            .get("oauth")
            .cloned()
            .unwrap_or_default();
        let refresh_token = self
            .oauth_refresh_token()
            .ok_or_else(|| ConnectorError::Config("no OAuth refresh token".into()))?;
        let client_id = oauth.get("client_id").and_then(|v| v.as_str()).unwrap_or("");
        let client_secret = oauth
            .get("client_secret")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let resp = self
            .http
            .post_form(
                "https://auth.atlassian.com/oauth/token",
                &[
                    ("grant_type", "refresh_token"),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("refresh_token", refresh_token),
                ],
            )
            .await?;

        let access = resp
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConnectorError::Auth("token refresh returned no access_token".into()))?;
        *self.bearer.write().await = Some(access.to_string());
        info!("refreshed Jira OAuth access token");
        Ok(())
    }

    /// GET with a single refresh-and-replay on auth failure when OAuth is
    /// configured. The second auth failure is terminal.
    async fn get(&self, url: &str) -> Result<serde_json::Value> {
        let headers = self.auth_headers().await?;
        match self.http.get_json(url, &headers).await {
            Err(ConnectorError::Auth(msg)) if self.oauth_refresh_token().is_some() => {
                warn!("Jira auth failed, attempting token refresh: {msg}");
                self.refresh_oauth().await?;
                let headers = self.auth_headers().await?;
                self.http.get_json(url, &headers).await.map_err(|e| match e {
                    ConnectorError::Auth(m) => {
                        ConnectorError::Permanent(format!("auth failed after refresh: {m}"))
                    }
                    other => other,
                })
            }
            other => other,
        }
    }

    /// Discover boards and their sprints; upsert sprint rows and return a
    /// map from the vendor sprint id to the stored row.
    async fn sync_sprints(
        &self,
        ctx: &TenantContext,
        progress: &ProgressReporter,
    ) -> Result<(HashMap<String, Sprint>, u64)> {
        let mut sprint_map = HashMap::new();
        let mut count = 0u64;

        let boards_url = match &self.config.workspace_id {
            Some(key) if !key.is_empty() => format!(
                "{}/rest/agile/1.0/board?projectKeyOrId={}",
                self.base(),
                urlencoding::encode(key)
            ),
            _ => format!("{}/rest/agile/1.0/board", self.base()),
        };

        let boards = match self.get(&boards_url).await {
            Ok(v) => v,
            Err(e) => {
                // Sprint discovery is best-effort; issues still sync.
                warn!(error = %e, "failed to enumerate Jira boards");
                return Ok((sprint_map, count));
            }
        };

        let board_list = boards
            .get("values")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for (i, board) in board_list.iter().enumerate() {
            let board_id = match board.get("id").and_then(|v| v.as_i64()) {
                Some(id) => id,
                None => continue,
            };
            progress.report(
                25 + ((i * 20) / board_list.len().max(1)) as u8,
                &format!("Scanning board {board_id} for sprints..."),
            );

            let sprints_url = format!("{}/rest/agile/1.0/board/{board_id}/sprint", self.base());
            let sprints = match self.get(&sprints_url).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(board_id, error = %e, "failed to fetch sprints for board");
                    continue;
                }
            };

            for s in sprints
                .get("values")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
            {
                let vendor_id = match s.get("id").and_then(|v| v.as_i64()) {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                let mut sprint = Sprint::new(
                    format!("jira_sprint_{vendor_id}"),
                    s.get("name").and_then(|v| v.as_str()).unwrap_or("Sprint"),
                );
                sprint.start_date = s
                    .get("startDate")
                    .and_then(|v| v.as_str())
                    .and_then(parse_jira_date);
                sprint.end_date = s
                    .get("endDate")
                    .and_then(|v| v.as_str())
                    .and_then(parse_jira_date);
                sprint.completed_at = s
                    .get("completeDate")
                    .and_then(|v| v.as_str())
                    .and_then(parse_jira_date);
                sprint.status =
                    SprintStatus::from_dates(sprint.start_date, sprint.end_date, Utc::now());

                let stored = ctx.store.upsert_sprint(&sprint).await?;
                sprint_map.insert(vendor_id, stored);
                count += 1;
            }
        }

        Ok((sprint_map, count))
    }

    async fn sync_issue(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        issue: &serde_json::Value,
        sprint_map: &HashMap<String, Sprint>,
    ) -> Result<()> {
        let mut item = issue_to_work_item(issue, source_id, sprint_map);

        let fields = issue.get("fields").cloned().unwrap_or_default();
        let assignee = fields.get("assignee").cloned().unwrap_or_default();
        let account_id = assignee.get("accountId").and_then(|v| v.as_str());
        let email = assignee.get("emailAddress").and_then(|v| v.as_str());
        let display_name = assignee.get("displayName").and_then(|v| v.as_str());

        if account_id.is_some() || email.is_some() {
            let resolved = identity::resolve_user(
                &ctx.store,
                PROVIDER,
                ExternalAssignee {
                    external_user_id: account_id,
                    email,
                    name: display_name,
                },
            )
            .await?;
            item.resolved_assignee_id = resolved.map(|u| u.id);
        }

        compliance::apply(&mut item, self.config.coverage_threshold);
        ctx.store.upsert_work_item(&item).await?;
        Ok(())
    }
}

#[async_trait]
impl Connector for JiraConnector {
    async fn test_connection(&self) -> Result<bool> {
        if self.base().is_empty() {
            return Err(ConnectorError::Config("Base URL is required for Jira".into()));
        }
        let url = format!("{}/rest/api/3/myself", self.base());
        self.get(&url)
            .await
            .map(|_| true)
            .map_err(|e| match e {
                ConnectorError::Config(m) => ConnectorError::Config(m),
                other => ConnectorError::Permanent(format!("Jira connection failed: {other}")),
            })
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        let url = format!("{}/rest/agile/1.0/board", self.base());
        let body = self.get(&url).await?;
        Ok(body
            .get("values")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|b| {
                Some(Folder {
                    id: b.get("id")?.as_i64()?.to_string(),
                    name: b.get("name")?.as_str()?.to_string(),
                })
            })
            .collect())
    }

    async fn sync(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        progress: &ProgressReporter,
    ) -> Result<SyncStats> {
        let project_key = self.config.workspace_id.clone().filter(|k| !k.is_empty());
        let jql = match &project_key {
            Some(key) => format!("project = '{key}'"),
            None => "order by updated desc".to_string(),
        };

        progress.report(25, &format!("Starting Jira sync with JQL: {jql}"));
        let (sprint_map, sprint_count) = self.sync_sprints(ctx, progress).await?;
        progress.report(45, &format!("Discovered {sprint_count} sprints"));

        let mut stats = SyncStats {
            sprint_count,
            ..Default::default()
        };

        let mut start_at: u64 = 0;
        let mut total: u64 = 1;
        while start_at < total {
            // *all keeps the customfield_* values the sprint detector scans.
            let url = format!(
                "{}/rest/api/3/search?jql={}&startAt={}&maxResults={}&fields=*all&expand=changelog",
                self.base(),
                urlencoding::encode(&jql),
                start_at,
                PAGE_SIZE,
            );
            let page = self.get(&url).await?;

            total = page.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
            let issues = page
                .get("issues")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            if issues.is_empty() {
                break;
            }

            for issue in &issues {
                self.sync_issue(ctx, source_id, issue, &sprint_map).await?;
                stats.item_count += 1;
            }

            start_at += issues.len() as u64;
            let pct = if total > 0 {
                50 + ((start_at * 40) / total) as u8
            } else {
                90
            };
            progress.report(
                pct.min(90),
                &format!("Processed {start_at}/{total} Jira issues..."),
            );
        }

        progress.report(95, &format!("Sync complete. Processed {} items.", stats.item_count));
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Pure transforms
// ---------------------------------------------------------------------------

/// Jira timestamps come as RFC 3339 or as `2024-02-14T10:30:00.000+0000`.
pub(crate) fn parse_jira_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn status_category_from_key(key: &str) -> StatusCategory {
    match key {
        "done" => StatusCategory::Done,
        "indeterminate" => StatusCategory::InProgress,
        _ => StatusCategory::Todo,
    }
}

/// Flatten an Atlassian Document Format tree to plain text by concatenating
/// all `text` leaves.
pub fn flatten_adf(adf: &serde_json::Value) -> String {
    if let Some(s) = adf.as_str() {
        return s.to_string();
    }
    let mut texts: Vec<String> = Vec::new();
    collect_text(adf, &mut texts);
    texts.join(" ")
}

fn collect_text(node: &serde_json::Value, out: &mut Vec<String>) {
    match node {
        serde_json::Value::Object(map) => {
            if map.get("type").and_then(|v| v.as_str()) == Some("text") {
                if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        out.push(trimmed.to_string());
                    }
                }
            }
            for value in map.values() {
                collect_text(value, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}

/// First changelog transition into a status whose name includes
/// "in progress" / "active" / "development".
pub fn extract_started_at(changelog: &serde_json::Value) -> Option<DateTime<Utc>> {
    let histories = changelog.get("histories")?.as_array()?;
    let mut sorted: Vec<&serde_json::Value> = histories.iter().collect();
    sorted.sort_by_key(|h| h.get("created").and_then(|v| v.as_str()).unwrap_or(""));

    for record in sorted {
        let created = record.get("created").and_then(|v| v.as_str());
        for item in record.get("items").and_then(|v| v.as_array()).into_iter().flatten() {
            if item.get("field").and_then(|v| v.as_str()) != Some("status") {
                continue;
            }
            let to = item
                .get("toString")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            if to.contains("in progress") || to.contains("active") || to.contains("development") {
                return created.and_then(parse_jira_date);
            }
        }
    }
    None
}

/// Identify the sprint custom field: any `customfield_*` whose value is a
/// list whose elements either carry an `id` or serialize with `id=(\d+)`.
pub fn extract_sprint_vendor_id(fields: &serde_json::Value) -> Option<String> {
    let obj = fields.as_object()?;
    for (key, value) in obj {
        if !key.starts_with("customfield_") {
            continue;
        }
        let list = match value.as_array() {
            Some(l) if !l.is_empty() => l,
            _ => continue,
        };
        let first = &list[0];
        if let Some(id) = first.get("id") {
            if let Some(n) = id.as_i64() {
                return Some(n.to_string());
            }
            if let Some(s) = id.as_str() {
                return Some(s.to_string());
            }
        }
        if let Some(s) = first.as_str() {
            if let Some(caps) = sprint_id_regex().captures(s) {
                return Some(caps[1].to_string());
            }
        }
    }
    None
}

fn sprint_id_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"id=(\d+)").expect("valid regex"))
}

/// Build a normalized work item from a Jira issue (assignee resolution and
/// compliance are applied by the caller).
pub fn issue_to_work_item(
    issue: &serde_json::Value,
    source_id: Uuid,
    sprint_map: &HashMap<String, Sprint>,
) -> WorkItem {
    let empty = serde_json::json!({});
    let fields = issue.get("fields").unwrap_or(&empty);

    let external_id = issue
        .get("key")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut item = WorkItem::new(
        source_id,
        external_id,
        fields
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled"),
    );

    item.description = fields.get("description").map(flatten_adf).filter(|d| !d.is_empty());

    let status = fields.get("status").cloned().unwrap_or_default();
    item.status = status
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("Open")
        .to_string();
    item.status_category = status_category_from_key(
        status
            .get("statusCategory")
            .and_then(|c| c.get("key"))
            .and_then(|v| v.as_str())
            .unwrap_or("new"),
    );

    item.item_type = ItemType::from_vendor(
        fields
            .get("issuetype")
            .and_then(|t| t.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("Task"),
    );
    item.priority = fields
        .get("priority")
        .and_then(|p| p.get("name"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_lowercase());

    if let Some(created) = fields.get("created").and_then(|v| v.as_str()).and_then(parse_jira_date)
    {
        item.created_at = created;
    }
    if let Some(updated) = fields.get("updated").and_then(|v| v.as_str()).and_then(parse_jira_date)
    {
        item.updated_at = updated;
    }
    item.resolved_at = fields
        .get("resolutiondate")
        .and_then(|v| v.as_str())
        .and_then(parse_jira_date);
    item.started_at = issue
        .get("changelog")
        .and_then(|c| extract_started_at(c));

    item.creator_email = fields
        .get("creator")
        .and_then(|c| c.get("emailAddress"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let assignee = fields.get("assignee").cloned().unwrap_or_default();
    item.assignee_email = assignee
        .get("emailAddress")
        .and_then(|v| v.as_str())
        .map(String::from);
    item.assignee_name = assignee
        .get("displayName")
        .and_then(|v| v.as_str())
        .map(String::from);

    if let Some(vendor_id) = extract_sprint_vendor_id(fields) {
        item.sprint_id = sprint_map.get(&vendor_id).map(|s| s.id);
    }

    item.raw_source_data = Some(issue.clone());
    item.ensure_resolved_at();
    item
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
