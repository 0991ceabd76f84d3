//! Job scheduling and the sync orchestrator.
//!
//! Parallel workers draw from a durable SQLite-backed queue; an individual
//! job runs strictly sequentially inside an explicit tenant context derived
//! from the job's `schema_name`.

pub mod orchestrator;
pub mod queue;
pub mod retention;
pub mod scheduler;
pub mod worker;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Core(#[from] cadence_core::CoreError),

    #[error(transparent)]
    Connector(#[from] cadence_connectors::ConnectorError),

    #[error("storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("source {0} not found or inactive")]
    SourceUnavailable(uuid::Uuid),

    #[error("sync already in progress for source {0}")]
    SyncInProgress(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
