use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::rows::*;
use super::TenantStore;
use crate::types::{AiInsight, SuggestionStatus, TaskLog, TaskStatus};

impl TenantStore {
    /// Append a new insight row.
    pub async fn insert_ai_insight(&self, insight: &AiInsight) -> crate::Result<()> {
        let id = insight.id.to_string();
        let project_id = insight.project_id.map(|u| u.to_string());
        let summary = insight.summary.clone();
        let suggestions = serde_json::to_string(&insight.suggestions)?;
        let forecast = insight.forecast.clone();
        let created_at = insight.created_at.to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO ai_insights (id, project_id, summary, suggestions, forecast,
                        created_at)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    rusqlite::params![id, project_id, summary, suggestions, forecast, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_ai_insight(&self, id: Uuid) -> crate::Result<Option<AiInsight>> {
        let id_str = id.to_string();
        let insight = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {INSIGHT_COLS} FROM ai_insights WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_insight(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(insight)
    }

    /// Newest insight for a scope (`project IS NULL` = tenant-global).
    pub async fn latest_ai_insight(
        &self,
        project_id: Option<Uuid>,
    ) -> crate::Result<Option<AiInsight>> {
        let project = project_id.map(|u| u.to_string());
        let insight = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {INSIGHT_COLS} FROM ai_insights
                     WHERE project_id IS ?1 ORDER BY created_at DESC LIMIT 1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_insight(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(insight)
    }

    /// Apply PATCH feedback to one suggestion. Returns the updated insight,
    /// or None when either id does not match.
    pub async fn set_suggestion_status(
        &self,
        insight_id: Uuid,
        suggestion_id: &str,
        status: SuggestionStatus,
    ) -> crate::Result<Option<AiInsight>> {
        let mut insight = match self.get_ai_insight(insight_id).await? {
            Some(i) => i,
            None => return Ok(None),
        };
        if !insight.set_suggestion_status(suggestion_id, status, Utc::now()) {
            return Ok(None);
        }

        let id = insight_id.to_string();
        let suggestions = serde_json::to_string(&insight.suggestions)?;
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE ai_insights SET suggestions = ?2 WHERE id = ?1",
                    rusqlite::params![id, suggestions],
                )?;
                Ok(())
            })
            .await?;
        Ok(Some(insight))
    }

    /// Retention: delete insights created before the cutoff.
    pub async fn delete_ai_insights_before(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        let cutoff = cutoff.to_rfc3339();
        let deleted = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM ai_insights WHERE created_at < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(n)
            })
            .await?;
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Task logs
    // -----------------------------------------------------------------------

    pub async fn insert_task_log(&self, log: &TaskLog) -> crate::Result<()> {
        let id = log.id.to_string();
        let task_name = log.task_name.clone();
        let target_id = log.target_id.clone();
        let status = enum_to_sql(&log.status);
        let error_message = log.error_message.clone();
        let execution_time_ms = log.execution_time_ms;
        let created_at = log.created_at.to_rfc3339();
        let finished_at = log.finished_at.map(|d| d.to_rfc3339());

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO task_logs (id, task_name, target_id, status, error_message,
                        execution_time_ms, created_at, finished_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    rusqlite::params![
                        id,
                        task_name,
                        target_id,
                        status,
                        error_message,
                        execution_time_ms,
                        created_at,
                        finished_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn finish_task_log(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
        execution_time_ms: i64,
    ) -> crate::Result<()> {
        let id = id.to_string();
        let status = enum_to_sql(&status);
        let finished_at = Utc::now().to_rfc3339();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE task_logs SET status = ?2, error_message = ?3,
                        execution_time_ms = ?4, finished_at = ?5
                     WHERE id = ?1",
                    rusqlite::params![id, status, error_message, execution_time_ms, finished_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_task_log(&self, id: Uuid) -> crate::Result<Option<TaskLog>> {
        let id_str = id.to_string();
        let log = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_LOG_COLS} FROM task_logs WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_task_log(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(log)
    }
}
