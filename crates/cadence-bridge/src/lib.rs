//! Tenant-scoped progress bus.
//!
//! Channels are named `telemetry_{tenant_slug}` (sync / metric / insight
//! progress) and `tenant_{schema_name}` (data-layer change signals); channel
//! names are the sole isolation primitive. A separate `admin_health` channel
//! serves platform admins only.

pub mod auth;
pub mod bus;
pub mod protocol;
pub mod ws;

use thiserror::Error;

/// The admin-only channel.
pub const ADMIN_HEALTH_CHANNEL: &str = "admin_health";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    Core(#[from] cadence_core::CoreError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
