//! ClickUp connector.
//!
//! Spaces → folders → lists → tasks, with the raw API token in the
//! `Authorization` header (no `Bearer`). A folder flagged
//! `is_sprint_folder` (or whose name contains "sprint") is a sprint
//! grouping: each list inside becomes a sprint row keyed
//! `clickup_sprint_{list_id}`. Parent/child linking and point aggregation
//! run in a post-sync pass because subtasks can arrive before parents.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use cadence_core::compliance;
use cadence_core::identity::{self, ExternalAssignee};
use cadence_core::tenant::TenantContext;
use cadence_core::types::{
    AcQuality, ItemType, Sprint, SprintStatus, StatusCategory, UnitTestingStatus, WorkItem,
};

use crate::http::HttpClient;
use crate::{Connector, ConnectorConfig, ConnectorError, Folder, ProgressReporter, Result, SyncStats};

const PAGE_SIZE: usize = 100;
const PROVIDER: &str = "clickup";

pub struct ClickupConnector {
    config: ConnectorConfig,
    http: HttpClient,
}

impl ClickupConnector {
    pub fn new(config: ConnectorConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        // ClickUp wants the raw token, not a Bearer scheme.
        let token = self.config.require_token()?;
        Ok(vec![("authorization", token.to_string())])
    }

    fn base(&self) -> &str {
        &self.config.base_url
    }

    async fn get(&self, url: &str) -> Result<serde_json::Value> {
        let headers = self.headers()?;
        self.http.get_json(url, &headers).await
    }

    /// Sprint rows for the lists of one sprint folder. Returns
    /// `list_id -> Sprint`.
    async fn upsert_sprint_lists(
        &self,
        ctx: &TenantContext,
        folder: &serde_json::Value,
    ) -> Result<HashMap<String, Sprint>> {
        let mut map = HashMap::new();
        for lst in folder.get("lists").and_then(|v| v.as_array()).into_iter().flatten() {
            let list_id = match lst.get("id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let mut sprint = Sprint::new(
                format!("clickup_sprint_{list_id}"),
                lst.get("name").and_then(|v| v.as_str()).unwrap_or("Sprint"),
            );
            sprint.start_date = lst
                .get("start_date")
                .and_then(value_as_millis)
                .and_then(millis_to_datetime);
            sprint.end_date = lst
                .get("due_date")
                .and_then(value_as_millis)
                .and_then(millis_to_datetime);
            sprint.status = SprintStatus::from_dates(sprint.start_date, sprint.end_date, Utc::now());
            let stored = ctx.store.upsert_sprint(&sprint).await?;
            map.insert(list_id, stored);
        }
        Ok(map)
    }

    async fn sync_list_tasks(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        list_id: &str,
        sprint: Option<&Sprint>,
    ) -> Result<u64> {
        let field_mapping = self.config.field_mapping();
        let mut count = 0u64;
        let mut page = 0usize;

        loop {
            let url = format!(
                "{}/list/{list_id}/task?subtasks=true&include_closed=true&page={page}&limit={PAGE_SIZE}",
                self.base()
            );
            let body = match self.get(&url).await {
                Ok(b) => b,
                Err(ConnectorError::Permanent(_)) => break, // list gone mid-sync
                Err(e) => return Err(e),
            };

            let tasks = body
                .get("tasks")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            if tasks.is_empty() {
                break;
            }

            for task in &tasks {
                self.sync_task(ctx, source_id, task, &field_mapping, sprint)
                    .await?;
                count += 1;
            }

            let last_page = body
                .get("last_page")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if last_page || tasks.len() < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(count)
    }

    async fn sync_task(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        task: &serde_json::Value,
        field_mapping: &serde_json::Value,
        sprint: Option<&Sprint>,
    ) -> Result<()> {
        let mut item = task_to_work_item(task, source_id, field_mapping);
        item.sprint_id = sprint.map(|s| s.id);

        // Parent may already be synced; otherwise the post-sync pass links it.
        if let Some(parent_ext) = task.get("parent").and_then(|v| v.as_str()) {
            item.parent_id = ctx.store.work_item_id(source_id, parent_ext).await?;
        }

        let assignee = task
            .get("assignees")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .cloned()
            .unwrap_or_default();
        let user_id = assignee.get("id").map(|v| v.to_string());
        let email = assignee.get("email").and_then(|v| v.as_str());
        let username = assignee.get("username").and_then(|v| v.as_str());
        if email.is_some() || assignee.get("id").is_some() {
            let resolved = identity::resolve_user(
                &ctx.store,
                PROVIDER,
                ExternalAssignee {
                    external_user_id: user_id.as_deref(),
                    email,
                    name: username,
                },
            )
            .await?;
            item.resolved_assignee_id = resolved.map(|u| u.id);
        }

        compliance::apply(&mut item, self.config.coverage_threshold);
        ctx.store.upsert_work_item(&item).await?;
        Ok(())
    }

    /// Post-sync pass: link subtasks whose parent arrived later, then sum
    /// child points into parents that carry none and average child AI usage.
    async fn post_sync_linking(&self, ctx: &TenantContext, source_id: Uuid) -> Result<()> {
        let items = ctx.store.list_work_items_for_source(source_id).await?;
        let by_external: HashMap<String, Uuid> = items
            .iter()
            .map(|i| (i.external_id.clone(), i.id))
            .collect();

        // 1. Repair broken parent links.
        for item in &items {
            if item.parent_id.is_some() {
                continue;
            }
            let raw_parent = item
                .raw_source_data
                .as_ref()
                .and_then(|r| r.get("parent"))
                .and_then(|v| v.as_str());
            if let Some(parent_ext) = raw_parent {
                if let Some(parent_id) = by_external.get(parent_ext) {
                    ctx.store.set_work_item_parent(item.id, Some(*parent_id)).await?;
                    // Gaining a parent makes the item unconditionally
                    // compliant; keep the stored flags in step.
                    ctx.store
                        .set_work_item_compliance(item.id, true, &[])
                        .await?;
                    debug!(item = %item.external_id, parent = parent_ext, "linked subtask");
                }
            }
        }

        // 2. Aggregate points and AI usage from subtasks.
        let items = ctx.store.list_work_items_for_source(source_id).await?;
        let parent_ids: Vec<Uuid> = {
            let mut seen = std::collections::HashSet::new();
            items.iter().filter_map(|i| i.parent_id).filter(|p| seen.insert(*p)).collect()
        };

        for parent_id in parent_ids {
            let mut parent = match ctx.store.get_work_item(parent_id).await? {
                Some(p) => p,
                None => continue,
            };
            let children = ctx.store.list_children(parent_id).await?;
            if children.is_empty() {
                continue;
            }

            let subtask_points: f64 = children.iter().filter_map(|c| c.story_points).sum();
            if subtask_points > 0.0 {
                let current = parent.story_points.unwrap_or(0.0);
                // Only overwrite when the parent has no points of its own.
                if current == 0.0 || (current - subtask_points).abs() < f64::EPSILON {
                    parent.story_points = Some(subtask_points);
                }
            }

            let ai_values: Vec<f64> = children.iter().filter_map(|c| c.ai_usage_percent).collect();
            if !ai_values.is_empty() {
                parent.ai_usage_percent =
                    Some(ai_values.iter().sum::<f64>() / ai_values.len() as f64);
            }

            ctx.store.upsert_work_item(&parent).await?;
        }

        Ok(())
    }

    async fn spaces(&self, team_id: &str) -> Result<Vec<serde_json::Value>> {
        let body = self
            .get(&format!("{}/team/{team_id}/space", self.base()))
            .await?;
        Ok(body
            .get("spaces")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    async fn first_team(&self) -> Result<Option<serde_json::Value>> {
        let body = self.get(&format!("{}/team", self.base())).await?;
        Ok(body
            .get("teams")
            .and_then(|v| v.as_array())
            .and_then(|t| t.first())
            .cloned())
    }
}

#[async_trait]
impl Connector for ClickupConnector {
    async fn test_connection(&self) -> Result<bool> {
        let url = format!("{}/user", self.base());
        self.get(&url).await.map(|_| true).map_err(|e| match e {
            ConnectorError::Config(m) => ConnectorError::Config(m),
            other => ConnectorError::Permanent(format!("ClickUp connection failed: {other}")),
        })
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        let team = match self.first_team().await? {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };
        let team_id = team.get("id").and_then(|v| v.as_str()).unwrap_or_default();

        let mut folders = Vec::new();
        for space in self.spaces(team_id).await? {
            let space_id = match space.get("id").and_then(|v| v.as_str()) {
                Some(id) => id,
                None => continue,
            };
            let body = self
                .get(&format!("{}/space/{space_id}/folder", self.base()))
                .await?;
            for folder in body.get("folders").and_then(|v| v.as_array()).into_iter().flatten() {
                if let (Some(id), Some(name)) = (
                    folder.get("id").and_then(|v| v.as_str()),
                    folder.get("name").and_then(|v| v.as_str()),
                ) {
                    folders.push(Folder {
                        id: id.to_string(),
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(folders)
    }

    async fn sync(
        &self,
        ctx: &TenantContext,
        source_id: Uuid,
        progress: &ProgressReporter,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        progress.report(25, "Fetching ClickUp workspaces...");
        let team = match self.first_team().await? {
            Some(t) => t,
            None => return Ok(stats),
        };
        let team_id = team.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        let team_name = team.get("name").and_then(|v| v.as_str()).unwrap_or("workspace");
        info!(team_id, team_name, "syncing ClickUp workspace");

        progress.report(30, &format!("Fetching spaces for workspace {team_name}..."));
        let spaces = self.spaces(team_id).await?;

        let active_folder = self.config.active_folder_id().map(String::from);

        // (list json, sprint row for sprint-folder lists)
        let mut all_lists: Vec<(serde_json::Value, Option<Sprint>)> = Vec::new();

        for (i, space) in spaces.iter().enumerate() {
            let space_id = match space.get("id").and_then(|v| v.as_str()) {
                Some(id) => id,
                None => continue,
            };
            progress.report(
                30 + ((i * 15) / spaces.len().max(1)) as u8,
                &format!(
                    "Scanning space: {}...",
                    space.get("name").and_then(|v| v.as_str()).unwrap_or("?")
                ),
            );

            let folders = self
                .get(&format!("{}/space/{space_id}/folder", self.base()))
                .await
                .ok()
                .and_then(|b| b.get("folders").and_then(|v| v.as_array()).cloned())
                .unwrap_or_default();

            for folder in &folders {
                if let Some(ref wanted) = active_folder {
                    let folder_id = folder.get("id").and_then(|v| v.as_str()).unwrap_or("");
                    if folder_id != wanted {
                        continue;
                    }
                }

                let is_sprint = is_sprint_folder(folder);
                if is_sprint {
                    let sprint_lists = self.upsert_sprint_lists(ctx, folder).await?;
                    stats.sprint_count += sprint_lists.len() as u64;
                    for lst in folder.get("lists").and_then(|v| v.as_array()).into_iter().flatten()
                    {
                        let list_id = lst.get("id").and_then(|v| v.as_str()).unwrap_or("");
                        all_lists.push((lst.clone(), sprint_lists.get(list_id).cloned()));
                    }
                } else {
                    for lst in folder.get("lists").and_then(|v| v.as_array()).into_iter().flatten()
                    {
                        all_lists.push((lst.clone(), None));
                    }
                }
            }

            // Folderless lists are synced but never sprints. Skipped when the
            // admin scoped the source to one folder.
            if active_folder.is_none() {
                let lists = self
                    .get(&format!("{}/space/{space_id}/list", self.base()))
                    .await
                    .ok()
                    .and_then(|b| b.get("lists").and_then(|v| v.as_array()).cloned())
                    .unwrap_or_default();
                for lst in lists {
                    all_lists.push((lst, None));
                }
            }
        }

        let total_lists = all_lists.len().max(1);
        for (i, (lst, sprint)) in all_lists.iter().enumerate() {
            let list_id = match lst.get("id").and_then(|v| v.as_str()) {
                Some(id) => id,
                None => continue,
            };
            progress.report(
                50 + ((i * 40) / total_lists) as u8,
                &format!(
                    "Syncing tasks from list: {}...",
                    lst.get("name").and_then(|v| v.as_str()).unwrap_or(list_id)
                ),
            );
            stats.item_count += self
                .sync_list_tasks(ctx, source_id, list_id, sprint.as_ref())
                .await?;
        }

        progress.report(95, "Resolving parent/child links and aggregating points...");
        self.post_sync_linking(ctx, source_id).await?;

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Pure transforms
// ---------------------------------------------------------------------------

pub(crate) fn is_sprint_folder(folder: &serde_json::Value) -> bool {
    folder
        .get("is_sprint_folder")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
        || folder
            .get("name")
            .and_then(|v| v.as_str())
            .map(|n| n.to_ascii_lowercase().contains("sprint"))
            .unwrap_or(false)
}

/// ClickUp epoch values arrive as strings or numbers, in milliseconds.
fn value_as_millis(value: &serde_json::Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value.as_str().and_then(|s| s.parse().ok())
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Map ClickUp statuses onto the normalized categories.
pub fn normalize_status(raw: &str) -> StatusCategory {
    let status = raw.to_ascii_lowercase();
    const DONE: &[&str] = &[
        "done", "complete", "closed", "resolved", "verified", "completed", "verified - dev",
    ];
    const IN_PROGRESS: &[&str] = &[
        "in progress",
        "active",
        "development",
        "review",
        "in review",
        "ready for testing",
        "testing in progress",
        "testing",
        "dev scoping",
        "reopened",
    ];
    if DONE.contains(&status.as_str()) {
        StatusCategory::Done
    } else if IN_PROGRESS.contains(&status.as_str()) {
        StatusCategory::InProgress
    } else {
        StatusCategory::Todo
    }
}

/// Look up a custom field by id or name and extract its value. Drop-down
/// values are resolved to the option *name* via `orderindex` or option id,
/// never left as a raw index.
pub fn custom_field_value(
    task: &serde_json::Value,
    field_identifier: &str,
) -> Option<serde_json::Value> {
    if field_identifier.is_empty() {
        return None;
    }
    let fields = task.get("custom_fields")?.as_array()?;
    for cf in fields {
        let id = cf.get("id").and_then(|v| v.as_str()).unwrap_or("");
        let name = cf.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if id != field_identifier && name != field_identifier {
            continue;
        }
        let val = cf.get("value")?;

        if cf.get("type").and_then(|v| v.as_str()) == Some("drop_down") && !val.is_null() {
            let options = cf
                .get("type_config")
                .and_then(|tc| tc.get("options"))
                .and_then(|o| o.as_array())
                .cloned()
                .unwrap_or_default();

            // Numeric index → orderindex match, then positional fallback.
            if let Some(idx) = val.as_i64().or_else(|| {
                val.as_str().and_then(|s| if s.chars().all(|c| c.is_ascii_digit()) {
                    s.parse().ok()
                } else {
                    None
                })
            }) {
                for opt in &options {
                    if opt.get("orderindex").and_then(|v| v.as_i64()) == Some(idx) {
                        return opt.get("name").cloned();
                    }
                }
                if let Some(opt) = options.get(idx as usize) {
                    return opt.get("name").cloned();
                }
                return Some(serde_json::Value::String(idx.to_string()));
            }

            // Option-id (uuid string) form.
            if let Some(s) = val.as_str() {
                for opt in &options {
                    if opt.get("id").and_then(|v| v.as_str()) == Some(s) {
                        return opt.get("name").cloned();
                    }
                }
            }
        }

        return Some(val.clone());
    }
    None
}

fn mapped_string(task: &serde_json::Value, mapping: &serde_json::Value, key: &str) -> Option<String> {
    let field_id = mapping.get(key).and_then(|v| v.as_str())?;
    let value = custom_field_value(task, field_id)?;
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn mapped_f64(task: &serde_json::Value, mapping: &serde_json::Value, key: &str) -> Option<f64> {
    let field_id = mapping.get(key).and_then(|v| v.as_str())?;
    let value = custom_field_value(task, field_id)?;
    value.as_f64().or_else(|| value.as_str()?.parse().ok())
}

fn item_type_for(task: &serde_json::Value, mapping: &serde_json::Value) -> ItemType {
    if let Some(mapped) = mapped_string(task, mapping, "item_type_id") {
        let t = ItemType::from_vendor(&mapped);
        if t != ItemType::Task {
            return t;
        }
    }

    // Modern custom_item_id table.
    if let Some(cit) = task.get("custom_item_id").and_then(|v| v.as_i64()) {
        match cit {
            1 | 1007 | 1008 => return ItemType::Epic,
            1001 | 1002 => return ItemType::Story,
            1006 => return ItemType::Bug,
            _ => {}
        }
    }

    // Deprecated custom_type string.
    if let Some(ct) = task.get("custom_type").and_then(|v| v.as_str()) {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("milestone") {
            return ItemType::Epic;
        }
        if ct.contains("feature") {
            return ItemType::Story;
        }
        if ct.contains("bug") {
            return ItemType::Bug;
        }
    }

    // Tag fallback.
    let tags: Vec<String> = task
        .get("tags")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|t| t.get("name").and_then(|v| v.as_str()))
        .map(|s| s.to_ascii_lowercase())
        .collect();
    if tags.iter().any(|t| t == "story" || t == "feature") {
        return ItemType::Story;
    }

    ItemType::Task
}

/// Build a normalized work item from a ClickUp task (sprint link, assignee
/// resolution and compliance are applied by the caller).
pub fn task_to_work_item(
    task: &serde_json::Value,
    source_id: Uuid,
    field_mapping: &serde_json::Value,
) -> WorkItem {
    let external_id = task
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut item = WorkItem::new(
        source_id,
        external_id,
        task.get("name").and_then(|v| v.as_str()).unwrap_or("Untitled"),
    );
    item.description = task
        .get("description")
        .and_then(|v| v.as_str())
        .filter(|d| !d.is_empty())
        .map(String::from);

    if let Some(created) = task.get("date_created").and_then(value_as_millis) {
        if let Some(dt) = millis_to_datetime(created) {
            item.created_at = dt;
        }
    }
    if let Some(updated) = task.get("date_updated").and_then(value_as_millis) {
        if let Some(dt) = millis_to_datetime(updated) {
            item.updated_at = dt;
        }
    }
    item.resolved_at = task
        .get("date_closed")
        .and_then(value_as_millis)
        .and_then(millis_to_datetime);
    item.started_at = task
        .get("date_started")
        .and_then(value_as_millis)
        .and_then(millis_to_datetime)
        .or_else(|| {
            task.get("start_date")
                .and_then(value_as_millis)
                .and_then(millis_to_datetime)
        });

    item.status = task
        .get("status")
        .and_then(|s| s.get("status"))
        .and_then(|v| v.as_str())
        .unwrap_or("Open")
        .to_string();
    item.status_category = normalize_status(&item.status);

    item.priority = task
        .get("priority")
        .and_then(|p| p.get("priority"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .or(Some("normal".to_string()));

    let assignee = task
        .get("assignees")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first());
    item.assignee_email = assignee
        .and_then(|a| a.get("email"))
        .and_then(|v| v.as_str())
        .map(String::from);
    item.assignee_name = assignee
        .and_then(|a| a.get("username"))
        .and_then(|v| v.as_str())
        .map(String::from);
    item.creator_email = task
        .get("creator")
        .and_then(|c| c.get("email"))
        .and_then(|v| v.as_str())
        .map(String::from);

    item.story_points = task.get("points").and_then(|v| v.as_f64());
    item.item_type = item_type_for(task, field_mapping);

    // DMT evidence from configured custom fields.
    item.ai_usage_percent = mapped_f64(task, field_mapping, "ai_usage_id");
    item.coverage_percent = mapped_f64(task, field_mapping, "coverage_id");
    if let Some(link) = mapped_string(task, field_mapping, "pr_link_id") {
        let lower = link.to_ascii_lowercase();
        if !matches!(lower.as_str(), "na" | "n/a" | "none") {
            item.pr_links = vec![link];
        }
    }
    item.ac_quality = mapped_string(task, field_mapping, "ac_quality_id")
        .as_deref()
        .and_then(AcQuality::from_vendor);
    item.unit_testing_status = mapped_string(task, field_mapping, "unit_testing_status_id")
        .as_deref()
        .and_then(UnitTestingStatus::from_vendor);
    item.reviewer_dmt_signoff = mapped_string(task, field_mapping, "reviewer_dmt_signoff_id")
        .map(|v| v.trim().eq_ignore_ascii_case("y") || v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    item.raw_source_data = Some(task.clone());
    item.ensure_resolved_at();
    item
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprint_folder_detection() {
        assert!(is_sprint_folder(&serde_json::json!({
            "name": "Delivery", "is_sprint_folder": true
        })));
        assert!(is_sprint_folder(&serde_json::json!({ "name": "Sprint 2024-W07" })));
        assert!(!is_sprint_folder(&serde_json::json!({ "name": "Backlog" })));
    }

    #[test]
    fn status_normalization_table() {
        assert_eq!(normalize_status("Verified - Dev"), StatusCategory::Done);
        assert_eq!(normalize_status("dev scoping"), StatusCategory::InProgress);
        assert_eq!(normalize_status("REOPENED"), StatusCategory::InProgress);
        assert_eq!(normalize_status("Open"), StatusCategory::Todo);
    }

    #[test]
    fn drop_down_resolved_via_orderindex() {
        let task = serde_json::json!({
            "custom_fields": [{
                "id": "cf_ac",
                "name": "AC Quality",
                "type": "drop_down",
                "value": 1,
                "type_config": { "options": [
                    { "id": "opt-a", "name": "Incomplete", "orderindex": 0 },
                    { "id": "opt-b", "name": "Testable", "orderindex": 1 },
                    { "id": "opt-c", "name": "Final", "orderindex": 2 }
                ]}
            }]
        });
        assert_eq!(
            custom_field_value(&task, "cf_ac").unwrap(),
            serde_json::json!("Testable")
        );
    }

    #[test]
    fn drop_down_resolved_via_option_id() {
        let task = serde_json::json!({
            "custom_fields": [{
                "id": "cf_ut",
                "type": "drop_down",
                "value": "opt-x",
                "type_config": { "options": [
                    { "id": "opt-x", "name": "Exception Approved" }
                ]}
            }]
        });
        assert_eq!(
            custom_field_value(&task, "cf_ut").unwrap(),
            serde_json::json!("Exception Approved")
        );
    }

    #[test]
    fn drop_down_string_index_resolved() {
        let task = serde_json::json!({
            "custom_fields": [{
                "id": "cf_q",
                "type": "drop_down",
                "value": "0",
                "type_config": { "options": [
                    { "id": "a", "name": "Final", "orderindex": 0 }
                ]}
            }]
        });
        assert_eq!(custom_field_value(&task, "cf_q").unwrap(), serde_json::json!("Final"));
    }

    fn task_fixture(id: &str, points: Option<f64>, closed: bool) -> serde_json::Value {
        let mut task = serde_json::json!({
            "id": id,
            "name": format!("Task {id}"),
            "status": { "status": if closed { "closed" } else { "in progress" }, "type": if closed { "closed" } else { "custom" } },
            "date_created": "1707000000000",
            "date_updated": "1708000000000",
            "assignees": [ { "id": 42, "email": "dev@x.io", "username": "Dev X" } ],
            "tags": []
        });
        if closed {
            task["date_closed"] = serde_json::json!("1708300800000");
        }
        if let Some(p) = points {
            task["points"] = serde_json::json!(p);
        }
        task
    }

    #[test]
    fn millisecond_timestamps_parse() {
        let task = task_fixture("t1", Some(3.0), true);
        let item = task_to_work_item(&task, Uuid::new_v4(), &serde_json::json!({}));

        assert_eq!(item.status_category, StatusCategory::Done);
        assert_eq!(
            item.resolved_at.unwrap().timestamp_millis(),
            1_708_300_800_000
        );
        assert_eq!(item.story_points, Some(3.0));
        assert_eq!(item.assignee_email.as_deref(), Some("dev@x.io"));
    }

    #[test]
    fn done_without_date_closed_backfills_resolved_at() {
        let mut task = task_fixture("t2", None, true);
        task.as_object_mut().unwrap().remove("date_closed");
        let item = task_to_work_item(&task, Uuid::new_v4(), &serde_json::json!({}));
        assert_eq!(item.resolved_at, Some(item.updated_at));
    }

    #[test]
    fn item_type_from_custom_item_id() {
        let mut task = task_fixture("t3", None, false);
        task["custom_item_id"] = serde_json::json!(1006);
        let item = task_to_work_item(&task, Uuid::new_v4(), &serde_json::json!({}));
        assert_eq!(item.item_type, ItemType::Bug);

        task["custom_item_id"] = serde_json::json!(1001);
        let item = task_to_work_item(&task, Uuid::new_v4(), &serde_json::json!({}));
        assert_eq!(item.item_type, ItemType::Story);
    }

    #[test]
    fn na_pr_links_are_dropped() {
        let task = serde_json::json!({
            "id": "t4",
            "name": "Task",
            "status": { "status": "open" },
            "custom_fields": [
                { "id": "cf_pr", "value": "N/A" }
            ]
        });
        let mapping = serde_json::json!({ "pr_link_id": "cf_pr" });
        let item = task_to_work_item(&task, Uuid::new_v4(), &mapping);
        assert!(item.pr_links.is_empty());
    }

    #[tokio::test]
    async fn sprint_folder_with_subtasks_aggregates_points() {
        use cadence_core::store::TenantStore;
        use cadence_core::types::Tenant;
        use std::sync::Arc;

        let ctx = TenantContext::new(
            Tenant::new("Acme", "acme"),
            Arc::new(TenantStore::open_in_memory().await.unwrap()),
        );
        let source_id = Uuid::new_v4();
        let connector = ClickupConnector::new(
            ConnectorConfig {
                base_url: "https://api.clickup.com/api/v2".into(),
                api_token: Some("tok".into()),
                username: None,
                workspace_id: None,
                config_json: serde_json::json!({}),
                coverage_threshold: 80.0,
            },
            HttpClient::new().unwrap(),
        );

        // Sprint row from the folder list, as upsert_sprint_lists would make it.
        let folder = serde_json::json!({
            "name": "Sprint 2024-W07",
            "is_sprint_folder": true,
            "lists": [{
                "id": "L1",
                "name": "Sprint 2024-W07",
                "start_date": "1707091200000",
                "due_date": "1708300800000"
            }]
        });
        let sprints = connector.upsert_sprint_lists(&ctx, &folder).await.unwrap();
        let sprint = sprints.get("L1").unwrap().clone();
        assert_eq!(sprint.name, "Sprint 2024-W07");
        assert_eq!(sprint.status, SprintStatus::Completed);

        // Parent with no points, two closed subtasks with 3 and 5.
        let parent = task_fixture("TASK-1", None, true);
        let mut sub_a = task_fixture("TASK-1a", Some(3.0), true);
        sub_a["parent"] = serde_json::json!("TASK-1");
        let mut sub_b = task_fixture("TASK-1b", Some(5.0), true);
        sub_b["parent"] = serde_json::json!("TASK-1");

        let mapping = serde_json::json!({});
        // Subtasks arrive before the parent so the first link attempt misses.
        for task in [&sub_a, &sub_b, &parent] {
            connector
                .sync_task(&ctx, source_id, task, &mapping, Some(&sprint))
                .await
                .unwrap();
        }
        connector.post_sync_linking(&ctx, source_id).await.unwrap();

        let parent_row = ctx
            .store
            .get_work_item_by_external(source_id, "TASK-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parent_row.story_points, Some(8.0));
        assert_eq!(parent_row.sprint_id, Some(sprint.id));

        for ext in ["TASK-1a", "TASK-1b"] {
            let sub = ctx
                .store
                .get_work_item_by_external(source_id, ext)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(sub.parent_id, Some(parent_row.id));
            // Subtasks are unconditionally compliant despite missing PR links.
            assert!(sub.dmt_compliant);
            assert!(sub.compliance_failures.is_empty());
        }
    }

    #[test]
    fn signoff_accepts_y_and_bool() {
        let mapping = serde_json::json!({ "reviewer_dmt_signoff_id": "cf_s" });
        let yes = serde_json::json!({
            "id": "t5", "name": "T", "status": { "status": "open" },
            "custom_fields": [ { "id": "cf_s", "value": "Y" } ]
        });
        assert!(task_to_work_item(&yes, Uuid::new_v4(), &mapping).reviewer_dmt_signoff);

        let boolean = serde_json::json!({
            "id": "t6", "name": "T", "status": { "status": "open" },
            "custom_fields": [ { "id": "cf_s", "value": true } ]
        });
        assert!(task_to_work_item(&boolean, Uuid::new_v4(), &mapping).reviewer_dmt_signoff);
    }
}
