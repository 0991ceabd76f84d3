//! Durable job queue.
//!
//! Jobs are rows in a SQLite table; workers claim the oldest runnable row
//! of a queue. Claiming is atomic because the connection serialises access,
//! so two workers never run the same job.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::Result;

pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_AI_INSIGHTS: &str = "ai_insights";

/// Everything a worker can be asked to do. Each variant that touches tenant
/// data carries an explicit `schema_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    SourceSync {
        source_id: Uuid,
        schema_name: String,
    },
    MetricsRecalc {
        schema_name: String,
        /// The sync that caused this recalc, for project-scoped AI refresh.
        #[serde(skip_serializing_if = "Option::is_none")]
        sync_source_id: Option<Uuid>,
    },
    AiRefresh {
        schema_name: String,
        project_id: Option<Uuid>,
    },
    RetentionSweep,
    DailyAggregation {
        schema_name: String,
        date: NaiveDate,
    },
}

impl Job {
    pub fn queue(&self) -> &'static str {
        match self {
            Job::AiRefresh { .. } => QUEUE_AI_INSIGHTS,
            _ => QUEUE_DEFAULT,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::SourceSync { .. } => "source_sync",
            Job::MetricsRecalc { .. } => "metrics_recalc",
            Job::AiRefresh { .. } => "ai_refresh",
            Job::RetentionSweep => "retention_sweep",
            Job::DailyAggregation { .. } => "daily_aggregation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: Job,
    /// How many times this job has been claimed, this claim included.
    pub attempts: u32,
}

pub struct JobQueue {
    conn: Connection,
}

impl JobQueue {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        let queue = Self { conn };
        queue.init_schema().await?;
        Ok(queue)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let queue = Self { conn };
        queue.init_schema().await?;
        Ok(queue)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS jobs (
                        id          TEXT PRIMARY KEY,
                        queue       TEXT NOT NULL,
                        payload     TEXT NOT NULL,
                        status      TEXT NOT NULL DEFAULT 'queued',
                        attempts    INTEGER NOT NULL DEFAULT 0,
                        run_at      TEXT NOT NULL,
                        last_error  TEXT,
                        created_at  TEXT NOT NULL,
                        finished_at TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_jobs_claim
                        ON jobs(queue, status, run_at);
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Enqueue for immediate execution.
    pub async fn enqueue(&self, job: &Job) -> Result<Uuid> {
        self.enqueue_at(job, Utc::now()).await
    }

    /// Enqueue with a not-before time (retry backoff).
    pub async fn enqueue_at(&self, job: &Job, run_at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let queue = job.queue().to_string();
        let payload = serde_json::to_string(job)?;
        let run_at = run_at.to_rfc3339();
        let created_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, queue, payload, status, attempts, run_at, created_at)
                     VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5)",
                    rusqlite::params![id_str, queue, payload, run_at, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    /// Claim the oldest runnable job of a queue, marking it running.
    pub async fn claim(&self, queue: &str) -> Result<Option<QueuedJob>> {
        let queue = queue.to_string();
        let now = Utc::now().to_rfc3339();

        let claimed = self
            .conn
            .call(move |conn| {
                let row: Option<(String, String, i64)> = {
                    let mut stmt = conn.prepare(
                        "SELECT id, payload, attempts FROM jobs
                         WHERE queue = ?1 AND status = 'queued' AND run_at <= ?2
                         ORDER BY run_at, created_at LIMIT 1",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![queue, now])?;
                    match rows.next()? {
                        Some(r) => Some((r.get(0)?, r.get(1)?, r.get(2)?)),
                        None => None,
                    }
                };

                match row {
                    Some((id, payload, attempts)) => {
                        conn.execute(
                            "UPDATE jobs SET status = 'running', attempts = attempts + 1
                             WHERE id = ?1",
                            rusqlite::params![id],
                        )?;
                        Ok(Some((id, payload, attempts + 1)))
                    }
                    None => Ok(None),
                }
            })
            .await?;

        match claimed {
            Some((id, payload, attempts)) => {
                let job: Job = serde_json::from_str(&payload)?;
                Ok(Some(QueuedJob {
                    id: Uuid::parse_str(&id).expect("valid uuid"),
                    job,
                    attempts: attempts as u32,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn complete(&self, id: Uuid) -> Result<()> {
        let id = id.to_string();
        let finished = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = 'done', finished_at = ?2 WHERE id = ?1",
                    rusqlite::params![id, finished],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Fail a job. With `retry_at` the job goes back to queued for another
    /// attempt; without, it is terminal.
    pub async fn fail(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let id = id.to_string();
        let error = error.to_string();
        let finished = Utc::now().to_rfc3339();
        let retry_at = retry_at.map(|d| d.to_rfc3339());
        self.conn
            .call(move |conn| {
                match retry_at {
                    Some(run_at) => {
                        conn.execute(
                            "UPDATE jobs SET status = 'queued', last_error = ?2, run_at = ?3
                             WHERE id = ?1",
                            rusqlite::params![id, error, run_at],
                        )?;
                    }
                    None => {
                        conn.execute(
                            "UPDATE jobs SET status = 'failed', last_error = ?2,
                                finished_at = ?3
                             WHERE id = ?1",
                            rusqlite::params![id, error, finished],
                        )?;
                    }
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Queued jobs across all queues (health reporting).
    pub async fn depth(&self) -> Result<u64> {
        let depth = self
            .conn
            .call(|conn| {
                let n: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM jobs WHERE status = 'queued'",
                    [],
                    |r| r.get(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(depth)
    }

    /// Whether a source already has a queued or running sync (enqueue-time
    /// overlap rejection).
    pub async fn has_pending_sync(&self, source_id: Uuid) -> Result<bool> {
        let needle = format!("%\"source_id\":\"{source_id}\"%");
        let pending = self
            .conn
            .call(move |conn| {
                let n: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM jobs
                     WHERE status IN ('queued', 'running')
                       AND payload LIKE ?1 AND payload LIKE '%\"source_sync\"%'",
                    rusqlite::params![needle],
                    |r| r.get(0),
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_claim_within_queue() {
        let queue = JobQueue::open_in_memory().await.unwrap();
        let a = Job::MetricsRecalc {
            schema_name: "t1".into(),
            sync_source_id: None,
        };
        let b = Job::RetentionSweep;
        queue.enqueue(&a).await.unwrap();
        queue.enqueue(&b).await.unwrap();

        let first = queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
        assert_eq!(first.job, a);
        assert_eq!(first.attempts, 1);
        let second = queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
        assert_eq!(second.job, b);
        assert!(queue.claim(QUEUE_DEFAULT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ai_jobs_land_on_their_own_queue() {
        let queue = JobQueue::open_in_memory().await.unwrap();
        let job = Job::AiRefresh {
            schema_name: "t1".into(),
            project_id: None,
        };
        queue.enqueue(&job).await.unwrap();

        assert!(queue.claim(QUEUE_DEFAULT).await.unwrap().is_none());
        let claimed = queue.claim(QUEUE_AI_INSIGHTS).await.unwrap().unwrap();
        assert_eq!(claimed.job, job);
    }

    #[tokio::test]
    async fn retry_requeues_with_backoff_time() {
        let queue = JobQueue::open_in_memory().await.unwrap();
        let job = Job::SourceSync {
            source_id: Uuid::new_v4(),
            schema_name: "t1".into(),
        };
        queue.enqueue(&job).await.unwrap();

        let claimed = queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
        queue
            .fail(claimed.id, "transient", Some(Utc::now() + chrono::Duration::hours(1)))
            .await
            .unwrap();

        // Not runnable yet.
        assert!(queue.claim(QUEUE_DEFAULT).await.unwrap().is_none());
        assert_eq!(queue.depth().await.unwrap(), 1);

        // Terminal failure empties the queue.
        queue
            .fail(claimed.id, "permanent", None)
            .await
            .unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn attempts_accumulate_across_claims() {
        let queue = JobQueue::open_in_memory().await.unwrap();
        let job = Job::SourceSync {
            source_id: Uuid::new_v4(),
            schema_name: "t1".into(),
        };
        queue.enqueue(&job).await.unwrap();

        let first = queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
        queue.fail(first.id, "x", Some(Utc::now())).await.unwrap();
        let second = queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);
    }

    #[tokio::test]
    async fn pending_sync_detection() {
        let queue = JobQueue::open_in_memory().await.unwrap();
        let source = Uuid::new_v4();
        assert!(!queue.has_pending_sync(source).await.unwrap());

        queue
            .enqueue(&Job::SourceSync {
                source_id: source,
                schema_name: "t".into(),
            })
            .await
            .unwrap();
        assert!(queue.has_pending_sync(source).await.unwrap());
        assert!(!queue.has_pending_sync(Uuid::new_v4()).await.unwrap());

        let claimed = queue.claim(QUEUE_DEFAULT).await.unwrap().unwrap();
        assert!(queue.has_pending_sync(source).await.unwrap(), "running counts");
        queue.complete(claimed.id).await.unwrap();
        assert!(!queue.has_pending_sync(source).await.unwrap());
    }

    #[test]
    fn job_payloads_round_trip() {
        let job = Job::DailyAggregation {
            schema_name: "acme".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"kind\":\"daily_aggregation\""));
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
