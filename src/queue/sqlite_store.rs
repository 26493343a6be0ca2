//! `rusqlite`-backed [`QueueStore`] (spec.md §4.10).
//!
//! Grounded in `AmirTlinov-branchmind`'s `bm_storage` crate and
//! `ktiyab-coheara`'s `rusqlite` usage for the "durable queue over a SQL
//! table" pattern. Atomic claim is implemented with a single `UPDATE ...
//! WHERE status = 'queued' ... LIMIT 1` style statement guarded by
//! `BEGIN IMMEDIATE`, so two workers racing `claim()` against the same
//! connection (or separate connections to the same file, which SQLite
//! serializes at the file-lock level) can never both flip the same row.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::{
    async_utils::blocking_iter_streams::spawn_blocking_propagating_panics,
    ids::JobId,
    model::{Job, JobStatus},
    prelude::*,
};

use super::{JobOutcome, QueueStore};

/// A `rusqlite`-backed [`QueueStore`].
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueueStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS jobs (
                    job_id TEXT PRIMARY KEY,
                    payload BLOB NOT NULL,
                    status TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    enqueued_at TEXT NOT NULL,
                    claimed_at TEXT,
                    outcome_json TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);",
            )
            .context("failed to create jobs table")?;
        }
        Ok(Self { conn })
    }

    fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
        let job_id: String = row.get("job_id")?;
        let payload: Vec<u8> = row.get("payload")?;
        let status_text: String = row.get("status")?;
        let attempts: u32 = row.get("attempts")?;
        let enqueued_at: String = row.get("enqueued_at")?;
        Ok(Job {
            job_id: JobId(job_id),
            payload,
            enqueued_at: enqueued_at.parse().unwrap_or_else(|_| Utc::now()),
            attempts,
            status: parse_status(&status_text),
        })
    }
}

fn status_text(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Started => "started",
        JobStatus::Finished => "finished",
        JobStatus::Failed => "failed",
    }
}

fn parse_status(text: &str) -> JobStatus {
    match text {
        "started" => JobStatus::Started,
        "finished" => JobStatus::Finished,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Queued,
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    #[instrument(level = "debug", skip(self, payload))]
    async fn enqueue(&self, payload: Vec<u8>) -> Result<JobId> {
        let conn = self.conn.clone();
        let job_id = JobId::new();
        let job_id_for_closure = job_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<()> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            conn.execute(
                "INSERT INTO jobs (job_id, payload, status, attempts, enqueued_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![job_id_for_closure.as_str(), payload, status_text(JobStatus::Queued), Utc::now().to_rfc3339()],
            )
            .context("failed to enqueue job")?;
            Ok(())
        })
        .await?;
        Ok(job_id)
    }

    #[instrument(level = "debug", skip(self))]
    async fn claim(&self) -> Result<Option<Job>> {
        let conn = self.conn.clone();
        spawn_blocking_propagating_panics(move || -> Result<Option<Job>> {
            let mut conn = conn.lock().expect("sqlite mutex poisoned");
            let tx = conn.transaction().context("failed to start claim transaction")?;
            tx.execute("BEGIN IMMEDIATE", []).ok();

            let job_id: Option<String> = tx
                .query_row(
                    "SELECT job_id FROM jobs WHERE status = 'queued' ORDER BY enqueued_at ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to select a queued job")?;

            let Some(job_id) = job_id else {
                tx.commit().ok();
                return Ok(None);
            };

            tx.execute(
                "UPDATE jobs SET status = 'started', claimed_at = ?1, attempts = attempts + 1
                 WHERE job_id = ?2 AND status = 'queued'",
                params![Utc::now().to_rfc3339(), job_id],
            )
            .context("failed to claim job")?;

            // Someone else won the race between our SELECT and UPDATE.
            if tx.changes() == 0 {
                tx.commit().ok();
                return Ok(None);
            }

            let job = tx
                .query_row("SELECT * FROM jobs WHERE job_id = ?1", params![job_id], Self::row_to_job)
                .context("failed to re-read claimed job")?;
            tx.commit().context("failed to commit claim transaction")?;
            Ok(Some(job))
        })
        .await
    }

    #[instrument(level = "debug", skip(self, outcome))]
    async fn finish(&self, job_id: &JobId, outcome: JobOutcome) -> Result<()> {
        let conn = self.conn.clone();
        let job_id = job_id.clone();
        let status = match &outcome {
            JobOutcome::Failed { .. } => JobStatus::Failed,
            JobOutcome::Success { .. } | JobOutcome::DuplicateSkipped { .. } => JobStatus::Finished,
        };
        spawn_blocking_propagating_panics(move || -> Result<()> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let outcome_json = serde_json::to_string(&outcome).context("failed to serialize job outcome")?;
            conn.execute(
                "UPDATE jobs SET status = ?1, outcome_json = ?2 WHERE job_id = ?3",
                params![status_text(status), outcome_json, job_id.as_str()],
            )
            .context("failed to finish job")?;
            Ok(())
        })
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn reset_stale_claims(&self, timeout: std::time::Duration) -> Result<usize> {
        let conn = self.conn.clone();
        let cutoff = (Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default()).to_rfc3339();
        spawn_blocking_propagating_panics(move || -> Result<usize> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let changed = conn
                .execute(
                    "UPDATE jobs SET status = 'queued', claimed_at = NULL
                     WHERE status = 'started' AND claimed_at < ?1",
                    params![cutoff],
                )
                .context("failed to reset stale claims")?;
            Ok(changed)
        })
        .await
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>> {
        let conn = self.conn.clone();
        let job_id = job_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<Option<Job>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            conn.query_row("SELECT * FROM jobs WHERE job_id = ?1", params![job_id.as_str()], Self::row_to_job)
                .optional()
                .context("failed to query job")
        })
        .await
    }

    async fn outcome_for(&self, job_id: &JobId) -> Result<Option<JobOutcome>> {
        let conn = self.conn.clone();
        let job_id = job_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<Option<JobOutcome>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let outcome_json: Option<String> = conn
                .query_row("SELECT outcome_json FROM jobs WHERE job_id = ?1", params![job_id.as_str()], |row| row.get(0))
                .optional()
                .context("failed to query job outcome")?;
            outcome_json
                .flatten()
                .map(|json| serde_json::from_str(&json).context("failed to deserialize job outcome"))
                .transpose()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> SqliteQueueStore {
        SqliteQueueStore::new(Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))).unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_claim_flips_status() {
        let store = store();
        let job_id = store.enqueue(b"payload".to_vec()).await.unwrap();
        let job = store.claim().await.unwrap().expect("job should be claimable");
        assert_eq!(job.job_id, job_id);
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn claim_returns_none_when_queue_empty() {
        let store = store();
        assert!(store.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_never_returns_the_same_job_twice() {
        let store = Arc::new(store());
        store.enqueue(b"payload".to_vec()).await.unwrap();

        let claimed = AtomicUsize::new(0);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim().await.unwrap() }));
        }
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert_eq!(claimed.load(Ordering::SeqCst), 1, "exactly one claimant should win the single queued job");
    }

    #[tokio::test]
    async fn finish_records_outcome_and_status() {
        let store = store();
        let job_id = store.enqueue(b"payload".to_vec()).await.unwrap();
        store.claim().await.unwrap();
        store
            .finish(&job_id, JobOutcome::Success { child_submission_ids: vec!["abc_p0".to_string()] })
            .await
            .unwrap();

        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        let outcome = store.outcome_for(&job_id).await.unwrap().unwrap();
        match outcome {
            JobOutcome::Success { child_submission_ids } => assert_eq!(child_submission_ids, vec!["abc_p0"]),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reset_stale_claims_requeues_old_started_jobs() {
        let store = store();
        let job_id = store.enqueue(b"payload".to_vec()).await.unwrap();
        store.claim().await.unwrap();

        let reset = store.reset_stale_claims(std::time::Duration::from_secs(0)).await.unwrap();
        assert_eq!(reset, 1);
        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }
}
