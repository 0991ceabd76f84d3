use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Tenant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Inactive,
    Pending,
}

/// Which LLM backend a tenant's insight generation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProviderKind {
    Gemini,
    Kimi,
}

/// A customer boundary. All of a tenant's delivery data lives in its own
/// storage partition keyed by `schema_name`; `slug` is the public channel key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub schema_name: String,
    pub status: TenantStatus,
    /// Retention caps in months.
    pub retention_work_items: u32,
    pub retention_ai_insights: u32,
    pub retention_pull_requests: u32,
    pub ai_provider: AiProviderKind,
    pub ai_model: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_base_url: Option<String>,
    pub created_on: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        let now = Utc::now();
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            slug: slugify(&name),
            name,
            schema_name: schema_name.into(),
            status: TenantStatus::Active,
            retention_work_items: 12,
            retention_ai_insights: 6,
            retention_pull_requests: 12,
            ai_provider: AiProviderKind::Gemini,
            ai_model: None,
            ai_api_key: None,
            ai_base_url: None,
            created_on: now,
            updated_at: now,
        }
    }

    /// Name of this tenant's telemetry pub/sub channel.
    pub fn telemetry_channel(&self) -> String {
        format!("telemetry_{}", self.slug)
    }

    /// Name of the data-layer change-signal channel.
    pub fn data_channel(&self) -> String {
        format!("tenant_{}", self.schema_name)
    }
}

/// Lowercase, non-alphanumerics collapsed to single dashes.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub key: String,
    pub description: Option<String>,
    pub is_active: bool,
    /// Default DMT coverage threshold for sources in this project.
    pub default_coverage_threshold: f64,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            key: key.into(),
            description: None,
            is_active: true,
            default_coverage_threshold: 80.0,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceConfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Jira,
    Clickup,
    AzureDevops,
    Github,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    InProgress,
    Never,
}

/// An authenticated binding of a project to one external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfiguration {
    pub id: Uuid,
    pub project_id: Uuid,
    pub source_type: SourceType,
    pub name: String,
    pub base_url: String,
    /// Credential as handed to the connector; encrypted at rest by the
    /// surrounding platform, opaque here.
    pub api_token: Option<String>,
    pub username: Option<String>,
    pub workspace_id: Option<String>,
    /// Free-form per-source scoping, including `active_folder_id` and
    /// `field_mapping`.
    pub config_json: serde_json::Value,
    /// Discovered vendor field mappings, admin-overridable.
    pub field_mappings: serde_json::Value,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: SyncStatus,
    pub last_error_message: Option<String>,
    pub consecutive_failures: u32,
    pub failure_alert_threshold: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceConfiguration {
    pub fn new(
        project_id: Uuid,
        source_type: SourceType,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            source_type,
            name: name.into(),
            base_url: base_url.into(),
            api_token: None,
            username: None,
            workspace_id: None,
            config_json: serde_json::json!({}),
            field_mappings: serde_json::json!({}),
            is_active: true,
            last_sync_at: None,
            last_sync_status: SyncStatus::Never,
            last_error_message: None,
            consecutive_failures: 0,
            failure_alert_threshold: 3,
            created_at: now,
            updated_at: now,
        }
    }

    /// The folder this source is scoped to, when the admin narrowed it.
    pub fn active_folder_id(&self) -> Option<String> {
        self.config_json
            .get("active_folder_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

// ---------------------------------------------------------------------------
// User + ExternalIdentity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    /// False for shadow users created by the identity resolver; flips when
    /// an admin invites them and they set a password.
    pub has_usable_password: bool,
    pub is_platform_admin: bool,
    pub is_manager: bool,
    pub profile_picture: Option<String>,
    pub custom_title: Option<String>,
    /// Owned by the metric aggregator; cleared and rewritten every run.
    pub competitive_title: Option<String>,
    pub competitive_title_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A disabled shadow user, as created on first sight by the resolver.
    pub fn shadow(username: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email,
            first_name: String::new(),
            last_name: String::new(),
            is_active: false,
            has_usable_password: false,
            is_platform_admin: false,
            is_manager: false,
            profile_picture: None,
            custom_title: None,
            competitive_title: None,
            competitive_title_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Unique `(provider, external_id) -> user` mapping; makes resolution O(1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Story,
    Bug,
    Task,
    Epic,
}

impl ItemType {
    /// Loose vendor-string mapping; anything unrecognised is a task.
    pub fn from_vendor(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "story" | "user story" | "feature" => ItemType::Story,
            "bug" | "defect" => ItemType::Bug,
            "epic" | "milestone" | "initiative" => ItemType::Epic,
            _ => ItemType::Task,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcQuality {
    Incomplete,
    Testable,
    Final,
}

impl AcQuality {
    pub fn from_vendor(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "final" => Some(AcQuality::Final),
            "testable" => Some(AcQuality::Testable),
            "incomplete" => Some(AcQuality::Incomplete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitTestingStatus {
    NotStarted,
    InProgress,
    Done,
    ExceptionApproved,
}

impl UnitTestingStatus {
    pub fn from_vendor(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "not started" => Some(UnitTestingStatus::NotStarted),
            "in progress" => Some(UnitTestingStatus::InProgress),
            "done" => Some(UnitTestingStatus::Done),
            "exception approved" => Some(UnitTestingStatus::ExceptionApproved),
            _ => None,
        }
    }
}

/// Stable DMT failure tags, serialized snake_case into `compliance_failures`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceFailure {
    MissingAcQuality,
    UnitTestingNotDone,
    LowCoverage,
    MissingPrLink,
    MissingDmtSignoff,
    MissingAssignee,
}

/// The normalized work record, unique per `(source_config_id, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub source_config_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub item_type: ItemType,
    /// Raw vendor status string, e.g. "In Review".
    pub status: String,
    pub status_category: StatusCategory,
    pub priority: Option<String>,
    /// Self-reference forming a forest; a child's parent always belongs to
    /// the same source.
    pub parent_id: Option<Uuid>,
    pub story_points: Option<f64>,
    pub ai_usage_percent: Option<f64>,
    pub coverage_percent: Option<f64>,
    pub creator_email: Option<String>,
    pub assignee_email: Option<String>,
    pub assignee_name: Option<String>,
    pub resolved_assignee_id: Option<Uuid>,
    pub sprint_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// First observed transition into in_progress.
    pub started_at: Option<DateTime<Utc>>,
    /// Transition into done; backfilled from `updated_at` when the vendor
    /// does not supply one.
    pub resolved_at: Option<DateTime<Utc>>,
    pub ac_quality: Option<AcQuality>,
    pub unit_testing_status: Option<UnitTestingStatus>,
    pub pr_links: Vec<String>,
    pub reviewer_dmt_signoff: bool,
    pub dmt_exception_required: bool,
    pub dmt_exception_reason: Option<String>,
    pub dmt_exception_approver: Option<String>,
    pub dmt_compliant: bool,
    pub compliance_failures: Vec<ComplianceFailure>,
    /// The vendor record as fetched; consumed by post-sync linking passes.
    pub raw_source_data: Option<serde_json::Value>,
}

impl WorkItem {
    pub fn new(
        source_config_id: Uuid,
        external_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_config_id,
            external_id: external_id.into(),
            title: title.into(),
            description: None,
            item_type: ItemType::Task,
            status: "Open".to_string(),
            status_category: StatusCategory::Todo,
            priority: None,
            parent_id: None,
            story_points: None,
            ai_usage_percent: None,
            coverage_percent: None,
            creator_email: None,
            assignee_email: None,
            assignee_name: None,
            resolved_assignee_id: None,
            sprint_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            resolved_at: None,
            ac_quality: None,
            unit_testing_status: None,
            pr_links: Vec::new(),
            reviewer_dmt_signoff: false,
            dmt_exception_required: false,
            dmt_exception_reason: None,
            dmt_exception_approver: None,
            dmt_compliant: false,
            compliance_failures: Vec::new(),
            raw_source_data: None,
        }
    }

    /// Enforce `status_category == done => resolved_at != null`, backfilling
    /// from `updated_at`.
    pub fn ensure_resolved_at(&mut self) {
        if self.status_category == StatusCategory::Done && self.resolved_at.is_none() {
            self.resolved_at = Some(self.updated_at);
        }
        if self.status_category != StatusCategory::Done {
            self.resolved_at = None;
        }
    }

    /// Cycle time in fractional days; falls back to lead time
    /// (`resolved_at - created_at`) when `started_at` is missing.
    pub fn cycle_time_days(&self) -> Option<f64> {
        let resolved = self.resolved_at?;
        let start = self.started_at.unwrap_or(self.created_at);
        let secs = (resolved - start).num_seconds();
        if secs < 0 {
            return None;
        }
        Some(secs as f64 / 86_400.0)
    }
}

// ---------------------------------------------------------------------------
// PullRequest + status checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Merged,
    Closed,
    Completed,
    Abandoned,
    Active,
}

impl PullRequestState {
    pub fn is_merged(&self) -> bool {
        matches!(self, PullRequestState::Merged | PullRequestState::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: Uuid,
    pub source_config_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub author_email: Option<String>,
    pub resolved_author_id: Option<Uuid>,
    /// Back-link resolved by scanning PR title and source branch for the
    /// vendor's issue-id pattern.
    pub work_item_id: Option<Uuid>,
    pub status: PullRequestState,
    pub repository_name: String,
    pub source_branch: String,
    pub target_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pending,
    Success,
    Failure,
    Error,
}

/// One status check per `(pull_request, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub id: Uuid,
    pub pull_request_id: Uuid,
    pub name: String,
    pub state: CheckState,
    pub target_url: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sprint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Backlog,
    Planned,
    Active,
    Completed,
}

impl SprintStatus {
    /// Re-derive from dates: unset dates mean backlog (static lists), then
    /// planned / active / completed by comparison with `now`.
    pub fn from_dates(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        match (start, end) {
            (Some(s), Some(e)) => {
                if now > e {
                    SprintStatus::Completed
                } else if now < s {
                    SprintStatus::Planned
                } else {
                    SprintStatus::Active
                }
            }
            _ => SprintStatus::Backlog,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SprintStatus,
}

impl Sprint {
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            name: name.into(),
            start_date: None,
            end_date: None,
            completed_at: None,
            status: SprintStatus::Backlog,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregated metrics
// ---------------------------------------------------------------------------

/// Sprint-grain rollup, unique per `(sprint_name, sprint_end_date, project)`
/// where a null project means the tenant-global view. Rewritten by the
/// aggregator; never edited by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintMetrics {
    pub id: Uuid,
    pub sprint_name: String,
    pub sprint_start_date: Option<NaiveDate>,
    pub sprint_end_date: NaiveDate,
    pub project_id: Option<Uuid>,
    pub velocity: f64,
    pub total_story_points_completed: f64,
    pub items_completed: u32,
    pub stories_completed: u32,
    pub bugs_completed: u32,
    pub total_items: u32,
    pub compliant_items: u32,
    pub compliance_rate_percent: f64,
    pub defect_density_per_100_points: f64,
    pub avg_cycle_time_days: Option<f64>,
    pub pr_health_percent: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Developer-grain rollup, unique per
/// `(developer_email, sprint_name, sprint_end_date, project)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperMetrics {
    pub id: Uuid,
    pub developer_email: String,
    pub developer_name: Option<String>,
    pub sprint_name: String,
    pub sprint_end_date: NaiveDate,
    pub project_id: Option<Uuid>,
    pub story_points_completed: f64,
    pub items_completed: u32,
    pub prs_authored: u32,
    pub prs_merged: u32,
    pub prs_reviewed: u32,
    pub defects_attributed: u32,
    pub coverage_avg_percent: Option<f64>,
    pub ai_usage_avg_percent: Option<f64>,
    pub dmt_compliance_rate: f64,
    pub avg_cycle_time_days: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-tenant operator audit row, one per calendar day. The dashboard's
/// truth is `SprintMetrics`; this is the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetric {
    pub id: Uuid,
    pub date: NaiveDate,
    pub total_work_items: u32,
    pub compliant_work_items: u32,
    pub compliance_rate: f64,
    pub avg_cycle_time_hours: f64,
    pub prs_merged_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AIInsight
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    pub impact: String,
    pub description: String,
    #[serde(default = "default_suggestion_status")]
    pub status: SuggestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_suggestion_status() -> SuggestionStatus {
    SuggestionStatus::Pending
}

/// Append-only insight log per project (tenant-global when project is null).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiInsight {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub summary: String,
    pub suggestions: Vec<Suggestion>,
    pub forecast: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AiInsight {
    /// Mutate exactly one suggestion's status + updated_at. Returns false
    /// when no suggestion carries the given id.
    pub fn set_suggestion_status(
        &mut self,
        suggestion_id: &str,
        status: SuggestionStatus,
        now: DateTime<Utc>,
    ) -> bool {
        for s in &mut self.suggestions {
            if s.id == suggestion_id {
                s.status = status;
                s.updated_at = Some(now);
                return true;
            }
        }
        false
    }

    /// Suggestions still awaiting feedback.
    pub fn pending_suggestions(&self) -> Vec<&Suggestion> {
        self.suggestions
            .iter()
            .filter(|s| s.status == SuggestionStatus::Pending)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TaskLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// Per-execution telemetry for a background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: Uuid,
    pub task_name: String,
    pub target_id: Option<String>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskLog {
    pub fn running(task_name: impl Into<String>, target_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            target_id,
            status: TaskStatus::Running,
            error_message: None,
            execution_time_ms: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("Acme Corp"), "acme-corp");
        assert_eq!(slugify("  Big -- Name!  "), "big-name");
        assert_eq!(slugify("UPPER"), "upper");
    }

    #[test]
    fn sprint_status_from_dates() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 24, 0, 0, 0).unwrap();

        assert_eq!(
            SprintStatus::from_dates(Some(start), Some(end), now),
            SprintStatus::Active
        );
        assert_eq!(
            SprintStatus::from_dates(None, Some(end), now),
            SprintStatus::Backlog
        );
        assert_eq!(
            SprintStatus::from_dates(Some(end), Some(end + chrono::Duration::days(14)), now),
            SprintStatus::Planned
        );
        assert_eq!(
            SprintStatus::from_dates(
                Some(start - chrono::Duration::days(30)),
                Some(start - chrono::Duration::days(16)),
                now
            ),
            SprintStatus::Completed
        );
    }

    #[test]
    fn resolved_at_backfill_on_done() {
        let mut item = WorkItem::new(Uuid::new_v4(), "X-1", "A task");
        item.status_category = StatusCategory::Done;
        item.resolved_at = None;
        item.ensure_resolved_at();
        assert_eq!(item.resolved_at, Some(item.updated_at));

        // Moving back out of done clears the resolution timestamp.
        item.status_category = StatusCategory::InProgress;
        item.ensure_resolved_at();
        assert!(item.resolved_at.is_none());
    }

    #[test]
    fn cycle_time_prefers_started_at() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let started = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let resolved = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap();

        let mut item = WorkItem::new(Uuid::new_v4(), "PROJ-42", "issue");
        item.created_at = created;
        item.started_at = Some(started);
        item.resolved_at = Some(resolved);
        assert_eq!(item.cycle_time_days(), Some(3.0));

        // Lead-time fallback when started_at is missing.
        item.started_at = None;
        let lead = item.cycle_time_days().unwrap();
        assert!((lead - 4.041_666_666).abs() < 1e-6);
    }

    #[test]
    fn suggestion_feedback_mutates_one_entry() {
        let mut insight = AiInsight {
            id: Uuid::new_v4(),
            project_id: None,
            summary: "s".into(),
            suggestions: vec![
                Suggestion {
                    id: "a".into(),
                    title: "t".into(),
                    impact: "High".into(),
                    description: "d".into(),
                    status: SuggestionStatus::Pending,
                    updated_at: None,
                },
                Suggestion {
                    id: "b".into(),
                    title: "t2".into(),
                    impact: "Low".into(),
                    description: "d2".into(),
                    status: SuggestionStatus::Pending,
                    updated_at: None,
                },
            ],
            forecast: None,
            created_at: Utc::now(),
        };

        let now = Utc::now();
        assert!(insight.set_suggestion_status("a", SuggestionStatus::Accepted, now));
        assert!(!insight.set_suggestion_status("missing", SuggestionStatus::Rejected, now));

        assert_eq!(insight.suggestions[0].status, SuggestionStatus::Accepted);
        assert_eq!(insight.suggestions[1].status, SuggestionStatus::Pending);
        let pending = insight.pending_suggestions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
    }

    #[test]
    fn compliance_failure_tags_are_stable() {
        let json = serde_json::to_string(&ComplianceFailure::MissingAcQuality).unwrap();
        assert_eq!(json, "\"missing_ac_quality\"");
        let json = serde_json::to_string(&ComplianceFailure::LowCoverage).unwrap();
        assert_eq!(json, "\"low_coverage\"");
    }

    #[test]
    fn item_type_vendor_mapping() {
        assert_eq!(ItemType::from_vendor("Story"), ItemType::Story);
        assert_eq!(ItemType::from_vendor("BUG"), ItemType::Bug);
        assert_eq!(ItemType::from_vendor("Milestone"), ItemType::Epic);
        assert_eq!(ItemType::from_vendor("whatever"), ItemType::Task);
    }
}
