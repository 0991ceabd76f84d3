//! Azure DevOps connector.
//!
//! PAT auth (`Basic base64(":" + pat)`); the base URL is parsed into an
//! organization and optional project. Work items come from a WIQL id query
//! followed by batched detail reads; iterations are fetched per team with
//! the default `{project} Team` tried first.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use cadence_core::compliance;
use cadence_core::identity::{self, ExternalAssignee};
use cadence_core::tenant::TenantContext;
use cadence_core::types::{
    AcQuality, ItemType, PullRequest, PullRequestState, Sprint, SprintStatus, StatusCategory,
    UnitTestingStatus, WorkItem,
};

use crate::http::HttpClient;
use crate::{Connector, ConnectorConfig, ConnectorError, Folder, ProgressReporter, Result, SyncStats};

const API_VERSION: &str = "6.0";
const DETAIL_BATCH: usize = 200;
const PROVIDER: &str = "azure_devops";

pub struct AzureDevOpsConnector {
    config: ConnectorConfig,
    http: HttpClient,
    organization: Option<String>,
    project: Option<String>,
    api_base: String,
}

impl AzureDevOpsConnector {
    pub fn new(config: ConnectorConfig, http: HttpClient) -> Self {
        let (organization, mut project, api_base) = parse_base_url(&config.base_url);
        // The workspace field in the UI overrides the URL's project segment.
        if let Some(ws) = config.workspace_id.as_deref().filter(|w| !w.is_empty()) {
            project = Some(ws.to_string());
        }
        Self {
            config,
            http,
            organization,
            project,
            api_base,
        }
    }

    fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        let pat = self.config.require_token()?.trim();
        let basic = base64::engine::general_purpose::STANDARD.encode(format!(":{pat}"));
        Ok(vec![("authorization", format!("Basic {basic}"))])
    }

    async fn get(&self, url: &str) -> Result<serde_json::Value> {
        self.http.get_json(url, &self.headers()?).await
    }

    async fn projects_to_sync(&self) -> Result<Vec<String>> {
        if let Some(project) = &self.project {
            return Ok(vec![project.clone()]);
        }
        let url = format!("{}/_apis/projects?api-version={API_VERSION}", self.api_base);
        let body = self.get(&url).await?;
        Ok(body
            .get("value")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|p| p.get("name").and_then(|v| v.as_str()).map(String::from))
            .collect())
    }

    /// Iterations for the project's default team, falling back to the first
    /// team whose iterations endpoint answers.
    async fn sync_sprints(&self, ctx: &TenantContext, project: &str) -> Result<u64> {
        let default_team = format!("{project} Team");
        let mut teams = vec![default_team];

        let teams_url = format!(
            "{}/_apis/projects/{}/teams?api-version={API_VERSION}",
            self.api_base,
            urlencoding::encode(project)
        );
        if let Ok(body) = self.get(&teams_url).await {
            for team in body.get("value").and_then(|v| v.as_array()).into_iter().flatten() {
                if let Some(name) = team.get("name").and_then(|v| v.as_str()) {
                    if !teams.contains(&name.to_string()) {
                        teams.push(name.to_string());
                    }
                }
            }
        }

        for team in teams {
            let url = format!(
                "{}/{}/{}/_apis/work/teamsettings/iterations?api-version={API_VERSION}",
                self.api_base,
                urlencoding::encode(project),
                urlencoding::encode(&team)
            );
            let body = match self.get(&url).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            let iterations = body
                .get("value")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let mut count = 0u64;
            for it in &iterations {
                let it_id = match it.get("id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                let attributes = it.get("attributes").cloned().unwrap_or_default();
                let mut sprint = Sprint::new(
                    it_id,
                    it.get("name").and_then(|v| v.as_str()).unwrap_or("Iteration"),
                );
                sprint.start_date = attributes
                    .get("startDate")
                    .and_then(|v| v.as_str())
                    .and_then(parse_ado_date);
                sprint.end_date = attributes
                    .get("finishDate")
                    .and_then(|v| v.as_str())
                    .and_then(parse_ado_date);
                sprint.status =
                    SprintStatus::from_dates(sprint.start_date, sprint.end_date, Utc::now());
                ctx.store.upsert_sprint(&sprint).await?;
                count += 1;
            }
            // One answering team is enough.
            return Ok(count);
        }

        warn!(project, "no team iterations endpoint answered");
        Ok(0)
    }

    async fn sync_work_items(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        project: &str,
        progress: &ProgressReporter,
    ) -> Result<u64> {
        let wiql_url = format!(
            "{}/{}/_apis/wit/wiql?api-version={API_VERSION}",
            self.api_base,
            urlencoding::encode(project)
        );
        let query = serde_json::json!({
            "query": format!(
                "Select [System.Id] From WorkItems Where [System.TeamProject] = '{project}'"
            )
        });
        let body = self.http.post_json(&wiql_url, &self.headers()?, &query).await?;

        let ids: Vec<String> = body
            .get("workItems")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|wi| wi.get("id").and_then(|v| v.as_i64()).map(|n| n.to_string()))
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut count = 0u64;
        let chunks: Vec<&[String]> = ids.chunks(DETAIL_BATCH).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            // No &fields= filter: the Custom.* compliance fields must come back.
            let details_url = format!(
                "{}/{}/_apis/wit/workitems?ids={}&api-version={API_VERSION}",
                self.api_base,
                urlencoding::encode(project),
                chunk.join(",")
            );
            let details = self.get(&details_url).await?;
            for item in details.get("value").and_then(|v| v.as_array()).into_iter().flatten() {
                self.sync_work_item(ctx, source_id, item).await?;
                count += 1;
            }
            progress.report(
                50 + ((i + 1) * 35 / chunks.len()) as u8,
                &format!("Processed {count} work items in {project}..."),
            );
        }
        Ok(count)
    }

    async fn sync_work_item(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        raw: &serde_json::Value,
    ) -> Result<()> {
        let mut item = work_item_from_fields(raw, source_id);

        let empty = serde_json::json!({});
        let fields = raw.get("fields").unwrap_or(&empty);

        // Iteration path tail → sprint by name; running sprint as fallback
        // for anything already started or resolved.
        if let Some(path) = fields.get("System.IterationPath").and_then(|v| v.as_str()) {
            if let Some(tail) = path.rsplit('\\').next().filter(|t| *t != path) {
                if let Some(sprint) = ctx.store.get_sprint_by_name(tail).await? {
                    item.sprint_id = Some(sprint.id);
                }
            }
        }
        if item.sprint_id.is_none() && (item.started_at.is_some() || item.resolved_at.is_some()) {
            item.sprint_id = ctx.store.latest_running_sprint().await?.map(|s| s.id);
        }

        let assigned = fields.get("System.AssignedTo").cloned().unwrap_or_default();
        let descriptor = assigned.get("descriptor").and_then(|v| v.as_str());
        let email = assigned.get("uniqueName").and_then(|v| v.as_str());
        let name = assigned.get("displayName").and_then(|v| v.as_str());
        if descriptor.is_some() || email.is_some() {
            let resolved = identity::resolve_user(
                &ctx.store,
                PROVIDER,
                ExternalAssignee {
                    external_user_id: descriptor,
                    email,
                    name,
                },
            )
            .await?;
            item.resolved_assignee_id = resolved.map(|u| u.id);
        }

        compliance::apply(&mut item, self.config.coverage_threshold);
        ctx.store.upsert_work_item(&item).await?;
        Ok(())
    }

    async fn sync_pull_requests(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        project: &str,
    ) -> Result<u64> {
        let repos_url = format!(
            "{}/{}/_apis/git/repositories?api-version={API_VERSION}",
            self.api_base,
            urlencoding::encode(project)
        );
        let repos = match self.get(&repos_url).await {
            Ok(body) => body
                .get("value")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                warn!(project, error = %e, "failed to list repositories");
                return Ok(0);
            }
        };

        let mut count = 0u64;
        for repo in &repos {
            let repo_id = match repo.get("id").and_then(|v| v.as_str()) {
                Some(id) => id,
                None => continue,
            };
            let repo_name = repo.get("name").and_then(|v| v.as_str()).unwrap_or(repo_id);

            let prs_url = format!(
                "{}/{}/_apis/git/repositories/{repo_id}/pullrequests?searchCriteria.status=all&api-version={API_VERSION}",
                self.api_base,
                urlencoding::encode(project)
            );
            let prs = match self.get(&prs_url).await {
                Ok(body) => body
                    .get("value")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default(),
                Err(_) => continue,
            };

            for pr in &prs {
                let mut record = pull_request_from_json(pr, source_id, repo_name);
                let created_by = pr.get("createdBy").cloned().unwrap_or_default();
                let resolved = identity::resolve_existing(
                    &ctx.store,
                    PROVIDER,
                    ExternalAssignee {
                        external_user_id: created_by.get("descriptor").and_then(|v| v.as_str()),
                        email: created_by.get("uniqueName").and_then(|v| v.as_str()),
                        name: created_by.get("displayName").and_then(|v| v.as_str()),
                    },
                )
                .await?;
                record.resolved_author_id = resolved.map(|u| u.id);
                ctx.store.upsert_pull_request(&record).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl Connector for AzureDevOpsConnector {
    async fn test_connection(&self) -> Result<bool> {
        if self.api_base.is_empty() || self.config.api_token.is_none() {
            return Err(ConnectorError::Config(
                "Base URL and Personal Access Token (PAT) are required".into(),
            ));
        }
        let url = match &self.project {
            Some(project) => format!(
                "{}/_apis/projects/{}?api-version={API_VERSION}",
                self.api_base,
                urlencoding::encode(project)
            ),
            None => format!("{}/_apis/projects?api-version={API_VERSION}", self.api_base),
        };
        self.get(&url).await.map(|_| true).map_err(|e| match e {
            ConnectorError::Config(m) => ConnectorError::Config(m),
            other => ConnectorError::Permanent(format!("ADO connection failed: {other}")),
        })
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        let url = format!("{}/_apis/projects?api-version={API_VERSION}", self.api_base);
        let body = self.get(&url).await?;
        Ok(body
            .get("value")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|p| {
                Some(Folder {
                    id: p.get("id")?.as_str()?.to_string(),
                    name: p.get("name")?.as_str()?.to_string(),
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
        let projects = self.projects_to_sync().await?;
        let total = projects.len().max(1);
        let mut stats = SyncStats::default();

        for (i, project) in projects.iter().enumerate() {
            progress.report(
                25 + ((i * 20) / total) as u8,
                &format!("Syncing project: {project}..."),
            );
            stats.sprint_count += self.sync_sprints(ctx, project).await?;
            stats.item_count += self
                .sync_work_items(ctx, source_id, project, progress)
                .await?;
            progress.report(90, &format!("Syncing pull requests for {project}..."));
            stats.pull_request_count += self.sync_pull_requests(ctx, source_id, project).await?;
        }

        progress.report(95, "Linking pull requests to work items...");
        crate::link::link_pull_requests(ctx, source_id).await?;

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Pure transforms
// ---------------------------------------------------------------------------

/// Extract `(organization, project, api_base)` from the configured URL.
/// Supports `dev.azure.com/{org}[/{project}]` and
/// `{org}.visualstudio.com[/{project}]`.
pub fn parse_base_url(base_url: &str) -> (Option<String>, Option<String>, String) {
    let trimmed = base_url.trim_end_matches('/');
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let mut parts = without_scheme.split('/');
    let host = parts.next().unwrap_or_default();
    let path: Vec<&str> = parts.filter(|p| !p.is_empty()).collect();

    if host == "dev.azure.com" {
        let organization = path.first().map(|s| s.to_string());
        let project = path.get(1).map(|s| s.to_string());
        let api_base = match &organization {
            Some(org) => format!("https://dev.azure.com/{org}"),
            None => trimmed.to_string(),
        };
        (organization, project, api_base)
    } else if host.ends_with(".visualstudio.com") {
        let organization = host.split('.').next().map(|s| s.to_string());
        let project = path.first().map(|s| s.to_string());
        let api_base = format!("https://{host}");
        (organization, project, api_base)
    } else {
        (None, None, trimmed.to_string())
    }
}

/// ADO dates may or may not carry fractional seconds.
pub(crate) fn parse_ado_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ")
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn state_to_category(state: &str) -> StatusCategory {
    match state.to_ascii_lowercase().as_str() {
        "done" | "closed" | "completed" | "resolved" => StatusCategory::Done,
        "new" | "to do" | "proposed" => StatusCategory::Todo,
        _ => StatusCategory::InProgress,
    }
}

fn string_field(fields: &serde_json::Value, key: &str) -> Option<String> {
    fields.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Build a normalized work item from an ADO work-item payload (sprint link,
/// assignee resolution and compliance are applied by the caller).
pub fn work_item_from_fields(raw: &serde_json::Value, source_id: Uuid) -> WorkItem {
    let empty = serde_json::json!({});
    let fields = raw.get("fields").unwrap_or(&empty);
    let external_id = raw
        .get("id")
        .map(|v| v.to_string())
        .unwrap_or_default();

    let mut item = WorkItem::new(
        source_id,
        external_id,
        string_field(fields, "System.Title").unwrap_or_else(|| "Untitled".into()),
    );
    item.description = string_field(fields, "System.Description").filter(|d| !d.is_empty());
    item.item_type = ItemType::from_vendor(
        &string_field(fields, "System.WorkItemType").unwrap_or_else(|| "Task".into()),
    );

    let state = string_field(fields, "System.State").unwrap_or_else(|| "New".into());
    item.status_category = state_to_category(&state);
    item.status = state;

    item.priority = fields
        .get("Microsoft.VSTS.Common.Priority")
        .map(|v| v.to_string().trim_matches('"').to_string());

    if let Some(created) = fields
        .get("System.CreatedDate")
        .and_then(|v| v.as_str())
        .and_then(parse_ado_date)
    {
        item.created_at = created;
    }
    if let Some(changed) = fields
        .get("System.ChangedDate")
        .and_then(|v| v.as_str())
        .and_then(parse_ado_date)
    {
        item.updated_at = changed;
    }
    item.started_at = fields
        .get("Microsoft.VSTS.Common.ActivatedDate")
        .and_then(|v| v.as_str())
        .and_then(parse_ado_date);
    if item.status_category == StatusCategory::Done {
        item.resolved_at = fields
            .get("Microsoft.VSTS.Common.ResolvedDate")
            .and_then(|v| v.as_str())
            .and_then(parse_ado_date);
    }

    let assigned = fields.get("System.AssignedTo").cloned().unwrap_or_default();
    item.assignee_email = assigned
        .get("uniqueName")
        .and_then(|v| v.as_str())
        .map(String::from);
    item.assignee_name = assigned
        .get("displayName")
        .and_then(|v| v.as_str())
        .map(String::from);
    item.creator_email = fields
        .get("System.CreatedBy")
        .and_then(|c| c.get("uniqueName"))
        .and_then(|v| v.as_str())
        .map(String::from);

    // DMT evidence lives in Custom.* fields on the ADO process template.
    item.story_points = fields
        .get("Custom.StoryPoint")
        .and_then(|v| v.as_f64().or_else(|| v.as_str()?.parse().ok()));
    item.ac_quality = string_field(fields, "Custom.ACQuality")
        .as_deref()
        .and_then(AcQuality::from_vendor);
    item.unit_testing_status = string_field(fields, "Custom.UnitTestingStatus")
        .as_deref()
        .and_then(UnitTestingStatus::from_vendor);
    item.reviewer_dmt_signoff = match fields.get("Custom.ReviewerDMTSignoff") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.trim().eq_ignore_ascii_case("y"),
        _ => false,
    };
    item.ai_usage_percent = fields
        .get("Custom.AIUsagePercentage")
        .and_then(|v| v.as_f64().or_else(|| v.as_str()?.parse().ok()));
    item.coverage_percent = fields
        .get("Custom.CoveragePercentageChange")
        .and_then(|v| v.as_f64().or_else(|| v.as_str()?.parse().ok()));
    item.dmt_exception_required = match fields.get("Custom.DMTExceptionRequired") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.trim().eq_ignore_ascii_case("y"),
        _ => false,
    };

    item.raw_source_data = Some(raw.clone());
    item.ensure_resolved_at();
    item
}

/// Build a pull-request record (`completed` → merged at the close date).
pub fn pull_request_from_json(
    pr: &serde_json::Value,
    source_id: Uuid,
    repo_name: &str,
) -> PullRequest {
    let status_raw = pr.get("status").and_then(|v| v.as_str()).unwrap_or("active");
    let status = match status_raw {
        "completed" => PullRequestState::Completed,
        "abandoned" => PullRequestState::Abandoned,
        _ => PullRequestState::Active,
    };

    let created_at = pr
        .get("creationDate")
        .and_then(|v| v.as_str())
        .and_then(parse_ado_date)
        .unwrap_or_else(Utc::now);
    let closed = pr
        .get("closedDate")
        .and_then(|v| v.as_str())
        .and_then(parse_ado_date);
    let merged_at = if status == PullRequestState::Completed {
        closed
    } else {
        None
    };

    PullRequest {
        id: Uuid::new_v4(),
        source_config_id: source_id,
        external_id: pr
            .get("pullRequestId")
            .map(|v| v.to_string())
            .unwrap_or_default(),
        title: pr.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        author_email: pr
            .get("createdBy")
            .and_then(|c| c.get("uniqueName"))
            .and_then(|v| v.as_str())
            .map(String::from),
        resolved_author_id: None,
        work_item_id: None,
        status,
        repository_name: repo_name.to_string(),
        source_branch: pr
            .get("sourceRefName")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim_start_matches("refs/heads/")
            .to_string(),
        target_branch: pr
            .get("targetRefName")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim_start_matches("refs/heads/")
            .to_string(),
        created_at,
        updated_at: merged_at.unwrap_or(created_at),
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
    fn base_url_forms_parse() {
        let (org, project, base) = parse_base_url("https://dev.azure.com/contoso");
        assert_eq!(org.as_deref(), Some("contoso"));
        assert!(project.is_none());
        assert_eq!(base, "https://dev.azure.com/contoso");

        let (org, project, base) = parse_base_url("https://dev.azure.com/contoso/Platform/");
        assert_eq!(org.as_deref(), Some("contoso"));
        assert_eq!(project.as_deref(), Some("Platform"));
        assert_eq!(base, "https://dev.azure.com/contoso");

        let (org, project, base) = parse_base_url("https://contoso.visualstudio.com/Platform");
        assert_eq!(org.as_deref(), Some("contoso"));
        assert_eq!(project.as_deref(), Some("Platform"));
        assert_eq!(base, "https://contoso.visualstudio.com");
    }

    #[test]
    fn ado_dates_with_and_without_fraction() {
        assert!(parse_ado_date("2025-06-29T09:27:52Z").is_some());
        assert!(parse_ado_date("2025-06-29T09:27:52.123Z").is_some());
        assert!(parse_ado_date("junk").is_none());
    }

    fn work_item_fixture() -> serde_json::Value {
        serde_json::json!({
            "id": 512,
            "fields": {
                "System.Title": "Harden API",
                "System.WorkItemType": "User Story",
                "System.State": "Closed",
                "System.CreatedDate": "2024-03-01T08:00:00Z",
                "System.ChangedDate": "2024-03-09T08:00:00Z",
                "Microsoft.VSTS.Common.ActivatedDate": "2024-03-02T08:00:00Z",
                "Microsoft.VSTS.Common.ResolvedDate": "2024-03-08T08:00:00Z",
                "System.AssignedTo": {
                    "displayName": "Jo Dev",
                    "uniqueName": "jo@contoso.com",
                    "descriptor": "aad.abc123"
                },
                "Custom.StoryPoint": 5,
                "Custom.ACQuality": "Testable",
                "Custom.UnitTestingStatus": "Done",
                "Custom.ReviewerDMTSignoff": "Y",
                "Custom.AIUsagePercentage": "40",
                "Custom.CoveragePercentageChange": 87.5
            }
        })
    }

    #[test]
    fn custom_fields_extracted() {
        let item = work_item_from_fields(&work_item_fixture(), Uuid::new_v4());

        assert_eq!(item.external_id, "512");
        assert_eq!(item.item_type, ItemType::Story);
        assert_eq!(item.status_category, StatusCategory::Done);
        assert_eq!(item.story_points, Some(5.0));
        assert_eq!(item.ac_quality, Some(AcQuality::Testable));
        assert_eq!(item.unit_testing_status, Some(UnitTestingStatus::Done));
        assert!(item.reviewer_dmt_signoff);
        assert_eq!(item.ai_usage_percent, Some(40.0));
        assert_eq!(item.coverage_percent, Some(87.5));
        assert!(item.started_at.is_some());
        assert!(item.resolved_at.is_some());
    }

    #[test]
    fn done_without_resolved_date_backfills_from_changed() {
        let mut raw = work_item_fixture();
        raw["fields"]
            .as_object_mut()
            .unwrap()
            .remove("Microsoft.VSTS.Common.ResolvedDate");
        let item = work_item_from_fields(&raw, Uuid::new_v4());
        assert_eq!(item.resolved_at, Some(item.updated_at));
    }

    #[test]
    fn in_progress_state_clears_resolution() {
        let mut raw = work_item_fixture();
        raw["fields"]["System.State"] = serde_json::json!("Active");
        let item = work_item_from_fields(&raw, Uuid::new_v4());
        assert_eq!(item.status_category, StatusCategory::InProgress);
        assert!(item.resolved_at.is_none());
    }

    #[test]
    fn completed_pr_maps_closed_to_merged() {
        let pr = serde_json::json!({
            "pullRequestId": 77,
            "title": "[PLAT-9] tighten validation",
            "status": "completed",
            "createdBy": { "uniqueName": "jo@contoso.com" },
            "creationDate": "2024-03-01T10:00:00Z",
            "closedDate": "2024-03-03T10:00:00Z",
            "sourceRefName": "refs/heads/feature/plat-9",
            "targetRefName": "refs/heads/main"
        });
        let record = pull_request_from_json(&pr, Uuid::new_v4(), "platform-repo");

        assert_eq!(record.external_id, "77");
        assert_eq!(record.status, PullRequestState::Completed);
        assert!(record.status.is_merged());
        assert_eq!(
            record.merged_at.unwrap().to_rfc3339(),
            "2024-03-03T10:00:00+00:00"
        );
        assert_eq!(record.source_branch, "feature/plat-9");
        assert_eq!(record.target_branch, "main");
    }

    #[test]
    fn active_pr_has_no_merge_date() {
        let pr = serde_json::json!({
            "pullRequestId": 78,
            "title": "wip",
            "status": "active",
            "creationDate": "2024-03-01T10:00:00Z",
            "closedDate": null,
            "sourceRefName": "refs/heads/wip",
            "targetRefName": "refs/heads/main"
        });
        let record = pull_request_from_json(&pr, Uuid::new_v4(), "repo");
        assert_eq!(record.status, PullRequestState::Active);
        assert!(record.merged_at.is_none());
    }
}
