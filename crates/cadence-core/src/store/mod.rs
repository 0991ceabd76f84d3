//! Per-tenant SQLite store.
//!
//! One database file per tenant realises the schema-per-tenant isolation
//! requirement: component code only ever holds a `TenantStore` for a single
//! tenant and cannot address another tenant's rows.

mod insights;
mod metrics;
mod pulls;
mod rows;
mod sources;
mod sprints;
mod users;
mod work_items;

use std::path::Path;

use tokio_rusqlite::Connection;

pub use sources::{FolderChange, SourcePatch};

pub(crate) use rows::*;

/// Async SQLite-backed store for one tenant's delivery data.
pub struct TenantStore {
    conn: Connection,
}

impl TenantStore {
    /// Open (or create) the tenant database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// A purely in-memory store (tests).
    pub async fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> crate::Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA foreign_keys=ON;

                    CREATE TABLE IF NOT EXISTS users (
                        id                        TEXT PRIMARY KEY,
                        username                  TEXT NOT NULL UNIQUE,
                        email                     TEXT,
                        first_name                TEXT NOT NULL DEFAULT '',
                        last_name                 TEXT NOT NULL DEFAULT '',
                        is_active                 INTEGER NOT NULL DEFAULT 0,
                        has_usable_password       INTEGER NOT NULL DEFAULT 0,
                        is_platform_admin         INTEGER NOT NULL DEFAULT 0,
                        is_manager                INTEGER NOT NULL DEFAULT 0,
                        profile_picture           TEXT,
                        custom_title              TEXT,
                        competitive_title         TEXT,
                        competitive_title_reason  TEXT,
                        created_at                TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

                    CREATE TABLE IF NOT EXISTS external_identities (
                        id          TEXT PRIMARY KEY,
                        user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                        provider    TEXT NOT NULL,
                        external_id TEXT NOT NULL,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL,
                        UNIQUE(provider, external_id)
                    );

                    CREATE TABLE IF NOT EXISTS projects (
                        id                          TEXT PRIMARY KEY,
                        tenant_id                   TEXT NOT NULL,
                        name                        TEXT NOT NULL,
                        key                         TEXT NOT NULL,
                        description                 TEXT,
                        is_active                   INTEGER NOT NULL DEFAULT 1,
                        default_coverage_threshold  REAL NOT NULL DEFAULT 80.0,
                        created_at                  TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS source_configurations (
                        id                      TEXT PRIMARY KEY,
                        project_id              TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                        source_type             TEXT NOT NULL,
                        name                    TEXT NOT NULL,
                        base_url                TEXT NOT NULL,
                        api_token               TEXT,
                        username                TEXT,
                        workspace_id            TEXT,
                        config_json             TEXT NOT NULL DEFAULT '{}',
                        field_mappings          TEXT NOT NULL DEFAULT '{}',
                        is_active               INTEGER NOT NULL DEFAULT 1,
                        last_sync_at            TEXT,
                        last_sync_status        TEXT NOT NULL DEFAULT 'never',
                        last_error_message      TEXT,
                        consecutive_failures    INTEGER NOT NULL DEFAULT 0,
                        failure_alert_threshold INTEGER NOT NULL DEFAULT 3,
                        created_at              TEXT NOT NULL,
                        updated_at              TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS sprints (
                        id            TEXT PRIMARY KEY,
                        external_id   TEXT NOT NULL UNIQUE,
                        name          TEXT NOT NULL,
                        start_date    TEXT,
                        end_date      TEXT,
                        completed_at  TEXT,
                        status        TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS work_items (
                        id                      TEXT PRIMARY KEY,
                        source_config_id        TEXT NOT NULL,
                        external_id             TEXT NOT NULL,
                        title                   TEXT NOT NULL,
                        description             TEXT,
                        item_type               TEXT NOT NULL,
                        status                  TEXT NOT NULL,
                        status_category         TEXT NOT NULL,
                        priority                TEXT,
                        parent_id               TEXT,
                        story_points            REAL,
                        ai_usage_percent        REAL,
                        coverage_percent        REAL,
                        creator_email           TEXT,
                        assignee_email          TEXT,
                        assignee_name           TEXT,
                        resolved_assignee_id    TEXT,
                        sprint_id               TEXT,
                        created_at              TEXT NOT NULL,
                        updated_at              TEXT NOT NULL,
                        started_at              TEXT,
                        resolved_at             TEXT,
                        ac_quality              TEXT,
                        unit_testing_status     TEXT,
                        pr_links                TEXT NOT NULL DEFAULT '[]',
                        reviewer_dmt_signoff    INTEGER NOT NULL DEFAULT 0,
                        dmt_exception_required  INTEGER NOT NULL DEFAULT 0,
                        dmt_exception_reason    TEXT,
                        dmt_exception_approver  TEXT,
                        dmt_compliant           INTEGER NOT NULL DEFAULT 0,
                        compliance_failures     TEXT NOT NULL DEFAULT '[]',
                        raw_source_data         TEXT,
                        UNIQUE(source_config_id, external_id)
                    );

                    CREATE INDEX IF NOT EXISTS idx_work_items_sprint ON work_items(sprint_id);
                    CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status_category);
                    CREATE INDEX IF NOT EXISTS idx_work_items_parent ON work_items(parent_id);

                    CREATE TABLE IF NOT EXISTS pull_requests (
                        id                  TEXT PRIMARY KEY,
                        source_config_id    TEXT NOT NULL,
                        external_id         TEXT NOT NULL,
                        title               TEXT NOT NULL,
                        author_email        TEXT,
                        resolved_author_id  TEXT,
                        work_item_id        TEXT,
                        status              TEXT NOT NULL,
                        repository_name     TEXT NOT NULL,
                        source_branch       TEXT NOT NULL,
                        target_branch       TEXT NOT NULL,
                        created_at          TEXT NOT NULL,
                        updated_at          TEXT NOT NULL,
                        merged_at           TEXT,
                        UNIQUE(source_config_id, external_id)
                    );

                    CREATE TABLE IF NOT EXISTS pull_request_statuses (
                        id               TEXT PRIMARY KEY,
                        pull_request_id  TEXT NOT NULL REFERENCES pull_requests(id) ON DELETE CASCADE,
                        name             TEXT NOT NULL,
                        state            TEXT NOT NULL,
                        target_url       TEXT,
                        description      TEXT,
                        created_at       TEXT NOT NULL,
                        updated_at       TEXT NOT NULL,
                        UNIQUE(pull_request_id, name)
                    );

                    CREATE TABLE IF NOT EXISTS sprint_metrics (
                        id                             TEXT PRIMARY KEY,
                        sprint_name                    TEXT NOT NULL,
                        sprint_start_date              TEXT,
                        sprint_end_date                TEXT NOT NULL,
                        project_id                     TEXT,
                        velocity                       REAL NOT NULL DEFAULT 0,
                        total_story_points_completed   REAL NOT NULL DEFAULT 0,
                        items_completed                INTEGER NOT NULL DEFAULT 0,
                        stories_completed              INTEGER NOT NULL DEFAULT 0,
                        bugs_completed                 INTEGER NOT NULL DEFAULT 0,
                        total_items                    INTEGER NOT NULL DEFAULT 0,
                        compliant_items                INTEGER NOT NULL DEFAULT 0,
                        compliance_rate_percent        REAL NOT NULL DEFAULT 0,
                        defect_density_per_100_points  REAL NOT NULL DEFAULT 0,
                        avg_cycle_time_days            REAL,
                        pr_health_percent              REAL NOT NULL DEFAULT 100.0,
                        created_at                     TEXT NOT NULL,
                        updated_at                     TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_sprint_metrics_end
                        ON sprint_metrics(sprint_end_date);

                    CREATE TABLE IF NOT EXISTS developer_metrics (
                        id                      TEXT PRIMARY KEY,
                        developer_email         TEXT NOT NULL,
                        developer_name          TEXT,
                        sprint_name             TEXT NOT NULL,
                        sprint_end_date         TEXT NOT NULL,
                        project_id              TEXT,
                        story_points_completed  REAL NOT NULL DEFAULT 0,
                        items_completed         INTEGER NOT NULL DEFAULT 0,
                        prs_authored            INTEGER NOT NULL DEFAULT 0,
                        prs_merged              INTEGER NOT NULL DEFAULT 0,
                        prs_reviewed            INTEGER NOT NULL DEFAULT 0,
                        defects_attributed      INTEGER NOT NULL DEFAULT 0,
                        coverage_avg_percent    REAL,
                        ai_usage_avg_percent    REAL,
                        dmt_compliance_rate     REAL NOT NULL DEFAULT 0,
                        avg_cycle_time_days     REAL,
                        created_at              TEXT NOT NULL,
                        updated_at              TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_developer_metrics_email
                        ON developer_metrics(developer_email);

                    CREATE TABLE IF NOT EXISTS ai_insights (
                        id          TEXT PRIMARY KEY,
                        project_id  TEXT,
                        summary     TEXT NOT NULL,
                        suggestions TEXT NOT NULL DEFAULT '[]',
                        forecast    TEXT,
                        created_at  TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS task_logs (
                        id                 TEXT PRIMARY KEY,
                        task_name          TEXT NOT NULL,
                        target_id          TEXT,
                        status             TEXT NOT NULL,
                        error_message      TEXT,
                        execution_time_ms  INTEGER,
                        created_at         TEXT NOT NULL,
                        finished_at        TEXT
                    );

                    CREATE TABLE IF NOT EXISTS daily_metrics (
                        id                    TEXT PRIMARY KEY,
                        date                  TEXT NOT NULL UNIQUE,
                        total_work_items      INTEGER NOT NULL DEFAULT 0,
                        compliant_work_items  INTEGER NOT NULL DEFAULT 0,
                        compliance_rate       REAL NOT NULL DEFAULT 0,
                        avg_cycle_time_hours  REAL NOT NULL DEFAULT 0,
                        prs_merged_count      INTEGER NOT NULL DEFAULT 0,
                        created_at            TEXT NOT NULL,
                        updated_at            TEXT NOT NULL
                    );
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
