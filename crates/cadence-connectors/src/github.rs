//! GitHub connector (pull-only).
//!
//! PRs come from `{base}/pulls?state=all&per_page=100` with `Link: next`
//! pagination; status checks are read per PR from the head commit's
//! `check-runs`. The configured base URL points at the repo API root,
//! e.g. `https://api.github.com/repos/{owner}/{repo}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use cadence_core::identity::{self, ExternalAssignee};
use cadence_core::tenant::TenantContext;
use cadence_core::types::{CheckState, PullRequest, PullRequestState, PullRequestStatus};

use crate::http::HttpClient;
use crate::{Connector, ConnectorConfig, ConnectorError, Folder, ProgressReporter, Result, SyncStats};

const PROVIDER: &str = "github";

pub struct GithubConnector {
    config: ConnectorConfig,
    http: HttpClient,
}

impl GithubConnector {
    pub fn new(config: ConnectorConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        let token = self.config.require_token()?;
        Ok(vec![
            ("authorization", format!("token {token}")),
            ("accept", "application/vnd.github.v3+json".to_string()),
            ("user-agent", "cadence-sync".to_string()),
        ])
    }

    fn base(&self) -> &str {
        &self.config.base_url
    }

    async fn sync_pr(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        pr: &serde_json::Value,
    ) -> Result<Uuid> {
        let mut record = pull_request_from_json(pr, source_id);

        let user = pr.get("user").cloned().unwrap_or_default();
        let login = user.get("login").and_then(|v| v.as_str());
        let resolved = identity::resolve_existing(
            &ctx.store,
            PROVIDER,
            ExternalAssignee {
                external_user_id: login,
                email: record.author_email.as_deref(),
                name: login,
            },
        )
        .await?;
        record.resolved_author_id = resolved.map(|u| u.id);

        let pr_id = ctx.store.upsert_pull_request(&record).await?;
        Ok(pr_id)
    }

    /// Check runs for a PR's head commit, mapped onto the normalized states.
    async fn sync_check_runs(
        &self,
        ctx: &TenantContext,
        pr_id: Uuid,
        head_sha: &str,
    ) -> Result<()> {
        let url = format!("{}/commits/{head_sha}/check-runs", self.base());
        let body = match self.http.get_json(&url, &self.headers()?).await {
            Ok(b) => b,
            Err(e) => {
                // Checks are best-effort; a missing commit must not fail the sync.
                warn!(head_sha, error = %e, "failed to fetch check runs");
                return Ok(());
            }
        };

        let now = Utc::now();
        for run in body
            .get("check_runs")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
        {
            let name = match run.get("name").and_then(|v| v.as_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let state = map_check_state(
                run.get("status").and_then(|v| v.as_str()).unwrap_or(""),
                run.get("conclusion").and_then(|v| v.as_str()),
            );
            let check = PullRequestStatus {
                id: Uuid::new_v4(),
                pull_request_id: pr_id,
                name,
                state,
                target_url: run
                    .get("html_url")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                description: run
                    .get("output")
                    .and_then(|o| o.get("title"))
                    .and_then(|v| v.as_str())
                    .map(String::from),
                created_at: now,
                updated_at: now,
            };
            ctx.store.upsert_pr_status(&check).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for GithubConnector {
    async fn test_connection(&self) -> Result<bool> {
        self.http
            .get_json(self.base(), &self.headers()?)
            .await
            .map(|_| true)
            .map_err(|e| match e {
                ConnectorError::Config(m) => ConnectorError::Config(m),
                other => ConnectorError::Permanent(format!("GitHub connection failed: {other}")),
            })
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        // One repo per source; there is nothing to scope.
        Ok(Vec::new())
    }

    async fn sync(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        progress: &ProgressReporter,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let mut url = Some(format!("{}/pulls?state=all&per_page=100", self.base()));
        let mut page = 0u32;

        progress.report(25, "Fetching pull requests...");

        while let Some(current) = url.take() {
            let (body, next) = self
                .http
                .get_json_with_next(&current, &self.headers()?)
                .await?;
            page += 1;

            for pr in body.as_array().into_iter().flatten() {
                let pr_id = self.sync_pr(ctx, source_id, pr).await?;
                stats.pull_request_count += 1;

                if let Some(sha) = pr
                    .get("head")
                    .and_then(|h| h.get("sha"))
                    .and_then(|v| v.as_str())
                {
                    self.sync_check_runs(ctx, pr_id, sha).await?;
                }
            }

            progress.report(
                (50 + page * 5).min(90) as u8,
                &format!("Processed page {page} ({} PRs so far)...", stats.pull_request_count),
            );
            url = next;
        }

        progress.report(95, "Linking pull requests to work items...");
        crate::link::link_pull_requests(ctx, source_id).await?;

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Pure transforms
// ---------------------------------------------------------------------------

fn parse_gh_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `(status, conclusion)` → normalized check state. Anything non-success
/// that completed without an explicit failure conclusion is an error.
pub fn map_check_state(status: &str, conclusion: Option<&str>) -> CheckState {
    if status != "completed" {
        return CheckState::Pending;
    }
    match conclusion {
        Some("success") => CheckState::Success,
        Some("failure") | Some("timed_out") | Some("cancelled") => CheckState::Failure,
        _ => CheckState::Error,
    }
}

/// Build a pull-request record from the REST payload. A merge date wins
/// over the raw state when mapping status.
pub fn pull_request_from_json(pr: &serde_json::Value, source_id: Uuid) -> PullRequest {
    let merged_at = pr
        .get("merged_at")
        .and_then(|v| v.as_str())
        .and_then(parse_gh_date);
    let status = if merged_at.is_some() {
        PullRequestState::Merged
    } else {
        match pr.get("state").and_then(|v| v.as_str()).unwrap_or("open") {
            "closed" => PullRequestState::Closed,
            _ => PullRequestState::Open,
        }
    };

    let user = pr.get("user").cloned().unwrap_or_default();
    let login = user.get("login").and_then(|v| v.as_str()).unwrap_or("unknown");
    let author_email = user
        .get("email")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("{login}@users.noreply.github.com"));

    let now = Utc::now();
    PullRequest {
        id: Uuid::new_v4(),
        source_config_id: source_id,
        external_id: pr.get("number").map(|v| v.to_string()).unwrap_or_default(),
        title: pr.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        author_email: Some(author_email),
        resolved_author_id: None,
        work_item_id: None,
        status,
        repository_name: pr
            .get("base")
            .and_then(|b| b.get("repo"))
            .and_then(|r| r.get("full_name"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        source_branch: pr
            .get("head")
            .and_then(|h| h.get("ref"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        target_branch: pr
            .get("base")
            .and_then(|b| b.get("ref"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        created_at: pr
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(parse_gh_date)
            .unwrap_or(now),
        updated_at: pr
            .get("updated_at")
            .and_then(|v| v.as_str())
            .and_then(parse_gh_date)
            .unwrap_or(now),
        merged_at,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_state_mapping_table() {
        assert_eq!(map_check_state("queued", None), CheckState::Pending);
        assert_eq!(map_check_state("in_progress", None), CheckState::Pending);
        assert_eq!(map_check_state("completed", Some("success")), CheckState::Success);
        assert_eq!(map_check_state("completed", Some("failure")), CheckState::Failure);
        assert_eq!(map_check_state("completed", Some("timed_out")), CheckState::Failure);
        assert_eq!(map_check_state("completed", Some("cancelled")), CheckState::Failure);
        assert_eq!(map_check_state("completed", Some("neutral")), CheckState::Error);
        assert_eq!(map_check_state("completed", Some("skipped")), CheckState::Error);
        assert_eq!(map_check_state("completed", None), CheckState::Error);
    }

    fn pr_fixture(merged: bool) -> serde_json::Value {
        serde_json::json!({
            "number": 101,
            "title": "[PROJ-42] Fix login",
            "state": if merged { "closed" } else { "open" },
            "merged_at": if merged { serde_json::json!("2024-02-02T12:00:00Z") } else { serde_json::Value::Null },
            "user": { "login": "octocat" },
            "head": { "ref": "fix/proj-42-login", "sha": "abc123" },
            "base": { "ref": "main", "repo": { "full_name": "acme/platform" } },
            "created_at": "2024-02-01T12:00:00Z",
            "updated_at": "2024-02-02T12:00:00Z"
        })
    }

    #[test]
    fn merged_pr_wins_over_state() {
        let record = pull_request_from_json(&pr_fixture(true), Uuid::new_v4());
        assert_eq!(record.status, PullRequestState::Merged);
        assert!(record.merged_at.is_some());
        assert_eq!(record.repository_name, "acme/platform");
    }

    #[test]
    fn author_email_falls_back_to_noreply() {
        let record = pull_request_from_json(&pr_fixture(false), Uuid::new_v4());
        assert_eq!(
            record.author_email.as_deref(),
            Some("octocat@users.noreply.github.com")
        );
        assert_eq!(record.status, PullRequestState::Open);
    }
}
