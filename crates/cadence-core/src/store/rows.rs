//! Row <-> struct mapping helpers shared by the store modules.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::types::*;

pub(crate) fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

pub(crate) fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

pub(crate) fn parse_dt(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid date")
        .with_timezone(&Utc)
}

pub(crate) fn parse_opt_dt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(|s| parse_dt(&s))
}

pub(crate) fn parse_uuid(raw: &str) -> Uuid {
    Uuid::parse_str(raw).expect("valid uuid")
}

pub(crate) fn parse_opt_uuid(raw: Option<String>) -> Option<Uuid> {
    raw.map(|s| parse_uuid(&s))
}

pub(crate) fn parse_date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

pub(crate) fn json_vec<T: serde::de::DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str(raw).expect("valid json list")
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(13)?;
    Ok(User {
        id: parse_uuid(&id),
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        is_active: row.get(5)?,
        has_usable_password: row.get(6)?,
        is_platform_admin: row.get(7)?,
        is_manager: row.get(8)?,
        profile_picture: row.get(9)?,
        custom_title: row.get(10)?,
        competitive_title: row.get(11)?,
        competitive_title_reason: row.get(12)?,
        created_at: parse_dt(&created_at),
    })
}

pub(crate) const USER_COLS: &str = "id, username, email, first_name, last_name, is_active, \
     has_usable_password, is_platform_admin, is_manager, profile_picture, custom_title, \
     competitive_title, competitive_title_reason, created_at";

pub(crate) fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExternalIdentity> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(ExternalIdentity {
        id: parse_uuid(&id),
        user_id: parse_uuid(&user_id),
        provider: row.get(2)?,
        external_id: row.get(3)?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

pub(crate) fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let created_at: String = row.get(7)?;
    Ok(Project {
        id: parse_uuid(&id),
        tenant_id: parse_uuid(&tenant_id),
        name: row.get(2)?,
        key: row.get(3)?,
        description: row.get(4)?,
        is_active: row.get(5)?,
        default_coverage_threshold: row.get(6)?,
        created_at: parse_dt(&created_at),
    })
}

pub(crate) const PROJECT_COLS: &str =
    "id, tenant_id, name, key, description, is_active, default_coverage_threshold, created_at";

pub(crate) fn row_to_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceConfiguration> {
    let id: String = row.get(0)?;
    let project_id: String = row.get(1)?;
    let source_type: String = row.get(2)?;
    let config_json: String = row.get(8)?;
    let field_mappings: String = row.get(9)?;
    let last_sync_at: Option<String> = row.get(11)?;
    let last_sync_status: String = row.get(12)?;
    let consecutive_failures: i64 = row.get(14)?;
    let failure_alert_threshold: i64 = row.get(15)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;
    Ok(SourceConfiguration {
        id: parse_uuid(&id),
        project_id: parse_uuid(&project_id),
        source_type: enum_from_sql(&source_type),
        name: row.get(3)?,
        base_url: row.get(4)?,
        api_token: row.get(5)?,
        username: row.get(6)?,
        workspace_id: row.get(7)?,
        config_json: serde_json::from_str(&config_json).expect("valid json"),
        field_mappings: serde_json::from_str(&field_mappings).expect("valid json"),
        is_active: row.get(10)?,
        last_sync_at: parse_opt_dt(last_sync_at),
        last_sync_status: enum_from_sql(&last_sync_status),
        last_error_message: row.get(13)?,
        consecutive_failures: consecutive_failures as u32,
        failure_alert_threshold: failure_alert_threshold as u32,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

pub(crate) const SOURCE_COLS: &str = "id, project_id, source_type, name, base_url, api_token, \
     username, workspace_id, config_json, field_mappings, is_active, last_sync_at, \
     last_sync_status, last_error_message, consecutive_failures, failure_alert_threshold, \
     created_at, updated_at";

pub(crate) fn row_to_sprint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sprint> {
    let id: String = row.get(0)?;
    let start_date: Option<String> = row.get(3)?;
    let end_date: Option<String> = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(Sprint {
        id: parse_uuid(&id),
        external_id: row.get(1)?,
        name: row.get(2)?,
        start_date: parse_opt_dt(start_date),
        end_date: parse_opt_dt(end_date),
        completed_at: parse_opt_dt(completed_at),
        status: enum_from_sql(&status),
    })
}

pub(crate) const SPRINT_COLS: &str =
    "id, external_id, name, start_date, end_date, completed_at, status";

pub(crate) fn row_to_work_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkItem> {
    let id: String = row.get(0)?;
    let source_config_id: String = row.get(1)?;
    let item_type: String = row.get(5)?;
    let status_category: String = row.get(7)?;
    let parent_id: Option<String> = row.get(9)?;
    let resolved_assignee_id: Option<String> = row.get(16)?;
    let sprint_id: Option<String> = row.get(17)?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;
    let started_at: Option<String> = row.get(20)?;
    let resolved_at: Option<String> = row.get(21)?;
    let ac_quality: Option<String> = row.get(22)?;
    let unit_testing_status: Option<String> = row.get(23)?;
    let pr_links: String = row.get(24)?;
    let compliance_failures: String = row.get(30)?;
    let raw_source_data: Option<String> = row.get(31)?;
    Ok(WorkItem {
        id: parse_uuid(&id),
        source_config_id: parse_uuid(&source_config_id),
        external_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        item_type: enum_from_sql(&item_type),
        status: row.get(6)?,
        status_category: enum_from_sql(&status_category),
        priority: row.get(8)?,
        parent_id: parse_opt_uuid(parent_id),
        story_points: row.get(10)?,
        ai_usage_percent: row.get(11)?,
        coverage_percent: row.get(12)?,
        creator_email: row.get(13)?,
        assignee_email: row.get(14)?,
        assignee_name: row.get(15)?,
        resolved_assignee_id: parse_opt_uuid(resolved_assignee_id),
        sprint_id: parse_opt_uuid(sprint_id),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
        started_at: parse_opt_dt(started_at),
        resolved_at: parse_opt_dt(resolved_at),
        ac_quality: ac_quality.map(|s| enum_from_sql(&s)),
        unit_testing_status: unit_testing_status.map(|s| enum_from_sql(&s)),
        pr_links: json_vec(&pr_links),
        reviewer_dmt_signoff: row.get(25)?,
        dmt_exception_required: row.get(26)?,
        dmt_exception_reason: row.get(27)?,
        dmt_exception_approver: row.get(28)?,
        dmt_compliant: row.get(29)?,
        compliance_failures: json_vec(&compliance_failures),
        raw_source_data: raw_source_data.map(|s| serde_json::from_str(&s).expect("valid json")),
    })
}

pub(crate) const WORK_ITEM_COLS: &str = "id, source_config_id, external_id, title, description, \
     item_type, status, status_category, priority, parent_id, story_points, ai_usage_percent, \
     coverage_percent, creator_email, assignee_email, assignee_name, resolved_assignee_id, \
     sprint_id, created_at, updated_at, started_at, resolved_at, ac_quality, \
     unit_testing_status, pr_links, reviewer_dmt_signoff, dmt_exception_required, \
     dmt_exception_reason, dmt_exception_approver, dmt_compliant, compliance_failures, \
     raw_source_data";

pub(crate) fn row_to_pull_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<PullRequest> {
    let id: String = row.get(0)?;
    let source_config_id: String = row.get(1)?;
    let resolved_author_id: Option<String> = row.get(5)?;
    let work_item_id: Option<String> = row.get(6)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    let merged_at: Option<String> = row.get(13)?;
    Ok(PullRequest {
        id: parse_uuid(&id),
        source_config_id: parse_uuid(&source_config_id),
        external_id: row.get(2)?,
        title: row.get(3)?,
        author_email: row.get(4)?,
        resolved_author_id: parse_opt_uuid(resolved_author_id),
        work_item_id: parse_opt_uuid(work_item_id),
        status: enum_from_sql(&status),
        repository_name: row.get(8)?,
        source_branch: row.get(9)?,
        target_branch: row.get(10)?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
        merged_at: parse_opt_dt(merged_at),
    })
}

pub(crate) const PULL_REQUEST_COLS: &str = "id, source_config_id, external_id, title, \
     author_email, resolved_author_id, work_item_id, status, repository_name, source_branch, \
     target_branch, created_at, updated_at, merged_at";

pub(crate) fn row_to_pr_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<PullRequestStatus> {
    let id: String = row.get(0)?;
    let pull_request_id: String = row.get(1)?;
    let state: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(PullRequestStatus {
        id: parse_uuid(&id),
        pull_request_id: parse_uuid(&pull_request_id),
        name: row.get(2)?,
        state: enum_from_sql(&state),
        target_url: row.get(4)?,
        description: row.get(5)?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

pub(crate) const PR_STATUS_COLS: &str =
    "id, pull_request_id, name, state, target_url, description, created_at, updated_at";

pub(crate) fn row_to_sprint_metrics(row: &rusqlite::Row<'_>) -> rusqlite::Result<SprintMetrics> {
    let id: String = row.get(0)?;
    let sprint_start_date: Option<String> = row.get(2)?;
    let sprint_end_date: String = row.get(3)?;
    let project_id: Option<String> = row.get(4)?;
    let items_completed: i64 = row.get(7)?;
    let stories_completed: i64 = row.get(8)?;
    let bugs_completed: i64 = row.get(9)?;
    let total_items: i64 = row.get(10)?;
    let compliant_items: i64 = row.get(11)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;
    Ok(SprintMetrics {
        id: parse_uuid(&id),
        sprint_name: row.get(1)?,
        sprint_start_date: sprint_start_date.map(|s| parse_date(&s)),
        sprint_end_date: parse_date(&sprint_end_date),
        project_id: parse_opt_uuid(project_id),
        velocity: row.get(5)?,
        total_story_points_completed: row.get(6)?,
        items_completed: items_completed as u32,
        stories_completed: stories_completed as u32,
        bugs_completed: bugs_completed as u32,
        total_items: total_items as u32,
        compliant_items: compliant_items as u32,
        compliance_rate_percent: row.get(12)?,
        defect_density_per_100_points: row.get(13)?,
        avg_cycle_time_days: row.get(14)?,
        pr_health_percent: row.get(15)?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

pub(crate) const SPRINT_METRICS_COLS: &str = "id, sprint_name, sprint_start_date, \
     sprint_end_date, project_id, velocity, total_story_points_completed, items_completed, \
     stories_completed, bugs_completed, total_items, compliant_items, compliance_rate_percent, \
     defect_density_per_100_points, avg_cycle_time_days, pr_health_percent, created_at, \
     updated_at";

pub(crate) fn row_to_developer_metrics(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<DeveloperMetrics> {
    let id: String = row.get(0)?;
    let sprint_end_date: String = row.get(4)?;
    let project_id: Option<String> = row.get(5)?;
    let items_completed: i64 = row.get(7)?;
    let prs_authored: i64 = row.get(8)?;
    let prs_merged: i64 = row.get(9)?;
    let prs_reviewed: i64 = row.get(10)?;
    let defects_attributed: i64 = row.get(11)?;
    let created_at: String = row.get(16)?;
    let updated_at: String = row.get(17)?;
    Ok(DeveloperMetrics {
        id: parse_uuid(&id),
        developer_email: row.get(1)?,
        developer_name: row.get(2)?,
        sprint_name: row.get(3)?,
        sprint_end_date: parse_date(&sprint_end_date),
        project_id: parse_opt_uuid(project_id),
        story_points_completed: row.get(6)?,
        items_completed: items_completed as u32,
        prs_authored: prs_authored as u32,
        prs_merged: prs_merged as u32,
        prs_reviewed: prs_reviewed as u32,
        defects_attributed: defects_attributed as u32,
        coverage_avg_percent: row.get(12)?,
        ai_usage_avg_percent: row.get(13)?,
        dmt_compliance_rate: row.get(14)?,
        avg_cycle_time_days: row.get(15)?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

pub(crate) const DEVELOPER_METRICS_COLS: &str = "id, developer_email, developer_name, \
     sprint_name, sprint_end_date, project_id, story_points_completed, items_completed, \
     prs_authored, prs_merged, prs_reviewed, defects_attributed, coverage_avg_percent, \
     ai_usage_avg_percent, dmt_compliance_rate, avg_cycle_time_days, created_at, updated_at";

pub(crate) fn row_to_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<AiInsight> {
    let id: String = row.get(0)?;
    let project_id: Option<String> = row.get(1)?;
    let suggestions: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(AiInsight {
        id: parse_uuid(&id),
        project_id: parse_opt_uuid(project_id),
        summary: row.get(2)?,
        suggestions: json_vec(&suggestions),
        forecast: row.get(4)?,
        created_at: parse_dt(&created_at),
    })
}

pub(crate) const INSIGHT_COLS: &str =
    "id, project_id, summary, suggestions, forecast, created_at";

pub(crate) fn row_to_task_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskLog> {
    let id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let finished_at: Option<String> = row.get(7)?;
    Ok(TaskLog {
        id: parse_uuid(&id),
        task_name: row.get(1)?,
        target_id: row.get(2)?,
        status: enum_from_sql(&status),
        error_message: row.get(4)?,
        execution_time_ms: row.get(5)?,
        created_at: parse_dt(&created_at),
        finished_at: parse_opt_dt(finished_at),
    })
}

pub(crate) const TASK_LOG_COLS: &str =
    "id, task_name, target_id, status, error_message, execution_time_ms, created_at, finished_at";

pub(crate) fn row_to_daily_metric(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyMetric> {
    let id: String = row.get(0)?;
    let date: String = row.get(1)?;
    let total: i64 = row.get(2)?;
    let compliant: i64 = row.get(3)?;
    let prs_merged: i64 = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(DailyMetric {
        id: parse_uuid(&id),
        date: parse_date(&date),
        total_work_items: total as u32,
        compliant_work_items: compliant as u32,
        compliance_rate: row.get(4)?,
        avg_cycle_time_hours: row.get(5)?,
        prs_merged_count: prs_merged as u32,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

pub(crate) const DAILY_METRIC_COLS: &str = "id, date, total_work_items, compliant_work_items, \
     compliance_rate, avg_cycle_time_hours, prs_merged_count, created_at, updated_at";
