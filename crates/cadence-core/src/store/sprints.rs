use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::rows::*;
use super::TenantStore;
use crate::types::Sprint;

impl TenantStore {
    /// Upsert by `external_id`, returning the canonical row.
    pub async fn upsert_sprint(&self, sprint: &Sprint) -> crate::Result<Sprint> {
        let id = sprint.id.to_string();
        let external_id = sprint.external_id.clone();
        let name = sprint.name.clone();
        let start_date = sprint.start_date.map(|d| d.to_rfc3339());
        let end_date = sprint.end_date.map(|d| d.to_rfc3339());
        let completed_at = sprint.completed_at.map(|d| d.to_rfc3339());
        let status = enum_to_sql(&sprint.status);

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sprints (id, external_id, name, start_date, end_date,
                        completed_at, status)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)
                     ON CONFLICT(external_id) DO UPDATE SET
                        name=excluded.name, start_date=excluded.start_date,
                        end_date=excluded.end_date, completed_at=excluded.completed_at,
                        status=excluded.status",
                    rusqlite::params![
                        id,
                        external_id,
                        name,
                        start_date,
                        end_date,
                        completed_at,
                        status
                    ],
                )?;
                Ok(())
            })
            .await?;

        self.get_sprint_by_external(&sprint.external_id)
            .await?
            .ok_or(crate::CoreError::NotFound {
                entity: "sprint",
                id: sprint.external_id.clone(),
            })
    }

    pub async fn get_sprint(&self, id: Uuid) -> crate::Result<Option<Sprint>> {
        let id_str = id.to_string();
        let sprint = self
            .conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {SPRINT_COLS} FROM sprints WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_sprint(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(sprint)
    }

    pub async fn get_sprint_by_external(&self, external_id: &str) -> crate::Result<Option<Sprint>> {
        let external = external_id.to_string();
        let sprint = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SPRINT_COLS} FROM sprints WHERE external_id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![external])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_sprint(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(sprint)
    }

    pub async fn get_sprint_by_name(&self, name: &str) -> crate::Result<Option<Sprint>> {
        let name = name.to_string();
        let sprint = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SPRINT_COLS} FROM sprints WHERE name = ?1 LIMIT 1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![name])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_sprint(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(sprint)
    }

    pub async fn list_sprints(&self) -> crate::Result<Vec<Sprint>> {
        let sprints = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SPRINT_COLS} FROM sprints ORDER BY end_date DESC"
                ))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_sprint(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(sprints)
    }

    /// Latest active-or-completed sprint by end date; the ADO fallback target
    /// for items whose iteration path matched nothing.
    pub async fn latest_running_sprint(&self) -> crate::Result<Option<Sprint>> {
        let sprint = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SPRINT_COLS} FROM sprints
                     WHERE status IN ('active', 'completed') AND end_date IS NOT NULL
                     ORDER BY end_date DESC LIMIT 1"
                ))?;
                let mut rows = stmt.query([])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_sprint(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(sprint)
    }

    /// Retention: delete sprints that ended before the cutoff.
    pub async fn delete_sprints_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> crate::Result<usize> {
        let cutoff = cutoff.to_rfc3339();
        let deleted = self
            .conn()
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM sprints WHERE end_date IS NOT NULL AND end_date < ?1",
                    rusqlite::params![cutoff],
                )?;
                Ok(n)
            })
            .await?;
        Ok(deleted)
    }
}
