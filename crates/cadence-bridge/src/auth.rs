//! Short-lived connect tokens for WebSocket subscribers.
//!
//! Tokens are HMAC-SHA256 signed, carried in the query string, and checked
//! once at connect time. Format:
//! `{user_id}.{tenant_id}.{admin_flag}.{expires_at}.{signature}` with a
//! URL-safe base64 signature. Verification is constant-time.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ring::hmac;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{BridgeError, Result};

const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub is_platform_admin: bool,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenSigner {
    key: hmac::Key,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Issue a token valid for the default 5 minutes.
    pub fn issue(&self, user_id: Uuid, tenant_id: Uuid, is_platform_admin: bool) -> String {
        self.issue_with_ttl(
            user_id,
            tenant_id,
            is_platform_admin,
            Duration::seconds(DEFAULT_TTL_SECS),
        )
    }

    pub fn issue_with_ttl(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        is_platform_admin: bool,
        ttl: Duration,
    ) -> String {
        let expires_at = (Utc::now() + ttl).timestamp();
        let admin = if is_platform_admin { "1" } else { "0" };
        let payload = format!("{user_id}.{tenant_id}.{admin}.{expires_at}");
        let tag = hmac::sign(&self.key, payload.as_bytes());
        let sig = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref());
        format!("{payload}.{sig}")
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let (payload, sig) = token
            .rsplit_once('.')
            .ok_or_else(|| BridgeError::InvalidToken("malformed".into()))?;

        let expected = hmac::sign(&self.key, payload.as_bytes());
        let expected_sig =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(expected.as_ref());
        if !bool::from(expected_sig.as_bytes().ct_eq(sig.as_bytes())) {
            return Err(BridgeError::InvalidToken("bad signature".into()));
        }

        let parts: Vec<&str> = payload.split('.').collect();
        if parts.len() != 4 {
            return Err(BridgeError::InvalidToken("malformed payload".into()));
        }
        let user_id = Uuid::parse_str(parts[0])
            .map_err(|_| BridgeError::InvalidToken("bad user id".into()))?;
        let tenant_id = Uuid::parse_str(parts[1])
            .map_err(|_| BridgeError::InvalidToken("bad tenant id".into()))?;
        let is_platform_admin = parts[2] == "1";
        let expires_ts: i64 = parts[3]
            .parse()
            .map_err(|_| BridgeError::InvalidToken("bad expiry".into()))?;
        let expires_at = DateTime::from_timestamp(expires_ts, 0)
            .ok_or_else(|| BridgeError::InvalidToken("bad expiry".into()))?;

        if Utc::now() >= expires_at {
            return Err(BridgeError::TokenExpired);
        }

        Ok(Claims {
            user_id,
            tenant_id,
            is_platform_admin,
            expires_at,
        })
    }
}
