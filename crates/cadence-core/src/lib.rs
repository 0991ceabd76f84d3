pub mod compliance;
pub mod config;
pub mod identity;
pub mod registry;
pub mod store;
pub mod tenant;
pub mod types;

use thiserror::Error;

/// Errors produced by the core storage and tenant layers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("tenant not found for schema '{0}'")]
    TenantNotFound(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
