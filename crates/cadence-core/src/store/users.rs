use chrono::Utc;
use uuid::Uuid;

use super::rows::*;
use super::TenantStore;
use crate::types::{ExternalIdentity, User};

impl TenantStore {
    pub async fn insert_user(&self, user: &User) -> crate::Result<()> {
        let id = user.id.to_string();
        let username = user.username.clone();
        let email = user.email.clone();
        let first_name = user.first_name.clone();
        let last_name = user.last_name.clone();
        let is_active = user.is_active;
        let has_usable_password = user.has_usable_password;
        let is_platform_admin = user.is_platform_admin;
        let is_manager = user.is_manager;
        let profile_picture = user.profile_picture.clone();
        let custom_title = user.custom_title.clone();
        let competitive_title = user.competitive_title.clone();
        let competitive_title_reason = user.competitive_title_reason.clone();
        let created_at = user.created_at.to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, username, email, first_name, last_name, is_active,
                        has_usable_password, is_platform_admin, is_manager, profile_picture,
                        custom_title, competitive_title, competitive_title_reason, created_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                    rusqlite::params![
                        id,
                        username,
                        email,
                        first_name,
                        last_name,
                        is_active,
                        has_usable_password,
                        is_platform_admin,
                        is_manager,
                        profile_picture,
                        custom_title,
                        competitive_title,
                        competitive_title_reason,
                        created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: Uuid) -> crate::Result<Option<User>> {
        let id_str = id.to_string();
        let user = self
            .conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {USER_COLS} FROM users WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(user)
    }

    /// Case-insensitive email lookup.
    pub async fn find_user_by_email(&self, email: &str) -> crate::Result<Option<User>> {
        let email = email.to_string();
        let user = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLS} FROM users
                     WHERE email IS NOT NULL AND LOWER(email) = LOWER(?1) LIMIT 1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![email])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(user)
    }

    pub async fn find_user_by_username(&self, username: &str) -> crate::Result<Option<User>> {
        let username = username.to_string();
        let user = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLS} FROM users WHERE username = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![username])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(user)
    }

    /// Case-insensitive first/last name lookup, used when a vendor only
    /// supplies a display name.
    pub async fn find_user_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> crate::Result<Option<User>> {
        let first = first_name.to_string();
        let last = last_name.to_string();
        let user = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLS} FROM users
                     WHERE LOWER(first_name) = LOWER(?1) AND LOWER(last_name) = LOWER(?2)
                     LIMIT 1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![first, last])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> crate::Result<Vec<User>> {
        let users = self
            .conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {USER_COLS} FROM users ORDER BY username"))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_user(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(users)
    }

    pub async fn update_user_names(
        &self,
        id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> crate::Result<()> {
        let id = id.to_string();
        let first = first_name.to_string();
        let last = last_name.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET first_name = ?2, last_name = ?3 WHERE id = ?1",
                    rusqlite::params![id, first, last],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Clear every competitive title in the tenant; the aggregator rewrites
    /// them from scratch each run.
    pub async fn clear_competitive_titles(&self) -> crate::Result<()> {
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET competitive_title = NULL, competitive_title_reason = NULL",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_competitive_title(
        &self,
        user_id: Uuid,
        title: &str,
        reason: &str,
    ) -> crate::Result<()> {
        let id = user_id.to_string();
        let title = title.to_string();
        let reason = reason.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET competitive_title = ?2, competitive_title_reason = ?3
                     WHERE id = ?1",
                    rusqlite::params![id, title, reason],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // External identities
    // -----------------------------------------------------------------------

    pub async fn get_identity(
        &self,
        provider: &str,
        external_id: &str,
    ) -> crate::Result<Option<ExternalIdentity>> {
        let provider = provider.to_string();
        let external = external_id.to_string();
        let identity = self
            .conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, provider, external_id, created_at, updated_at
                     FROM external_identities WHERE provider = ?1 AND external_id = ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![provider, external])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_identity(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(identity)
    }

    /// Upsert `(provider, external_id) -> user`.
    pub async fn upsert_identity(
        &self,
        provider: &str,
        external_id: &str,
        user_id: Uuid,
    ) -> crate::Result<()> {
        let id = Uuid::new_v4().to_string();
        let provider = provider.to_string();
        let external = external_id.to_string();
        let user = user_id.to_string();
        let now = Utc::now().to_rfc3339();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO external_identities (id, user_id, provider, external_id,
                        created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?5)
                     ON CONFLICT(provider, external_id) DO UPDATE SET
                        user_id=excluded.user_id, updated_at=excluded.updated_at",
                    rusqlite::params![id, user, provider, external, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
