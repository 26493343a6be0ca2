//! The worker poll loop (spec.md §4.10): claims one job at a time from a
//! [`QueueStore`], runs the idempotency probe, hands the rest to the
//! [`PipelineRunner`], and records an outcome.
//!
//! Grounded in the teacher's `queues::work::WorkQueue` consumer loop (poll,
//! claim, process, repeat) generalized from an in-process `mpsc` channel to
//! a durable, crash-recoverable [`QueueStore`].

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::json;
use tokio::time::timeout;

use crate::{
    audit::{self, AuditRepository},
    config::WorkerConfig,
    ids::{OwnerId, SubmissionId},
    model::{ActorRole, AuditEvent, AuditTrace, EventType, Job, Status, TraceOutcome, UploadRequest},
    pipeline::{PipelineInput, PipelineRunner},
    prelude::*,
    repository::SubmissionRepository,
};

use super::{JobOutcome, QueueStore};

/// Drains a [`QueueStore`], running each claimed job through the
/// idempotency probe and the [`PipelineRunner`].
pub struct Worker {
    queue: Arc<dyn QueueStore>,
    submissions: Arc<dyn SubmissionRepository>,
    audit: Arc<dyn AuditRepository>,
    runner: Arc<PipelineRunner>,
    config: WorkerConfig,
    /// How many jobs may be in flight at once. Spec.md §5 forbids intra-job
    /// parallelism across *stages* but permits concurrent processing of
    /// independent jobs, so this bounds the number of `process_job` tasks
    /// running at the same time, not anything within one job.
    concurrency: usize,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        submissions: Arc<dyn SubmissionRepository>,
        audit: Arc<dyn AuditRepository>,
        runner: Arc<PipelineRunner>,
        config: WorkerConfig,
        concurrency: usize,
    ) -> Self {
        Self { queue, submissions, audit, runner, config, concurrency: concurrency.max(1) }
    }

    /// Run the poll loop until `shutdown` resolves. Sweeps stale claims once
    /// up front and then again every `job_timeout_s` (spec.md §4.10: "a
    /// stale-claim sweeper"). Up to `concurrency` jobs run concurrently, each
    /// in its own spawned task; a `Semaphore` bounds how many are in flight
    /// at once, and a `JoinSet` tracks them so shutdown can wait for
    /// in-flight jobs to finish instead of abandoning them mid-pipeline.
    pub async fn run_until(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        self.sweep_stale_claims().await;
        let mut last_sweep = tokio::time::Instant::now();
        let sweep_interval = Duration::from_secs(self.config.job_timeout_s.max(1));
        let permits = Arc::new(tokio::sync::Semaphore::new(self.concurrency));
        let mut in_flight = tokio::task::JoinSet::new();

        loop {
            if shutdown.try_recv().is_ok() {
                info!("worker received shutdown signal, waiting for in-flight jobs to finish");
                break;
            }

            if last_sweep.elapsed() >= sweep_interval {
                self.sweep_stale_claims().await;
                last_sweep = tokio::time::Instant::now();
            }

            let Ok(permit) = permits.clone().try_acquire_owned() else {
                // Every permit is held by an in-flight job; wait for one to
                // free up rather than claiming work we can't start yet.
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                continue;
            };

            match self.queue.claim().await {
                Ok(Some(job)) => {
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        worker.process_job(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                Err(err) => {
                    drop(permit);
                    error!(error = %err, "failed to claim a job; backing off");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }

            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        Ok(())
    }

    async fn sweep_stale_claims(&self) {
        let timeout = Duration::from_secs(self.config.job_timeout_s);
        match self.queue.reset_stale_claims(timeout).await {
            Ok(0) => {}
            Ok(n) => warn!(reset = n, "reset stale claimed jobs back to queued"),
            Err(err) => error!(error = %err, "failed to sweep stale claims"),
        }
    }

    /// Process one claimed job: decode its payload, run the idempotency
    /// probe, run the pipeline (bounded by `job_timeout_s`), and record the
    /// outcome (spec.md §4.10).
    #[instrument(level = "info", skip(self, job), fields(job_id = %job.job_id))]
    async fn process_job(&self, job: Job) {
        let outcome = self.run_job(&job).await;
        if let Err(err) = self.queue.finish(&job.job_id, outcome).await {
            error!(error = %err, "failed to record job outcome");
        }
    }

    async fn run_job(&self, job: &Job) -> JobOutcome {
        let request: UploadRequest = match serde_json::from_slice(&job.payload) {
            Ok(request) => request,
            Err(err) => return JobOutcome::Failed { error: format!("malformed job payload: {err}") },
        };

        let submission_id = SubmissionId::from_bytes(&request.file_bytes);

        // Idempotency (spec.md §4.10): reprocessing the same content is a
        // no-op once a prior run already reached a finalized status.
        match self.submissions.get_unscoped(&submission_id).await {
            Ok(Some(existing)) if matches!(existing.status, Status::Processed | Status::Approved) => {
                info!(submission_id = %submission_id, "duplicate submission, skipping pipeline");
                self.emit_duplicate_skipped(&submission_id, existing.owner_id.clone()).await;
                return JobOutcome::DuplicateSkipped { existing_submission_id: submission_id.as_str().to_string() };
            }
            Ok(_) => {}
            Err(err) => return JobOutcome::Failed { error: format!("idempotency probe failed: {err}") },
        }

        let input = PipelineInput {
            file_bytes: request.file_bytes,
            filename: request.filename,
            owner_id: request.owner_id,
            submission_id,
            upload_batch_id: request.upload_batch_id,
            parent_submission_id: None,
            child_index: None,
            multi_entry_source: None,
        };

        let deadline = Duration::from_secs(self.config.job_timeout_s);
        match timeout(deadline, self.runner.run(input)).await {
            Ok(Ok(output)) => JobOutcome::Success { child_submission_ids: output.child_submission_ids },
            Ok(Err(err)) => JobOutcome::Failed { error: err.to_string() },
            Err(_) => JobOutcome::Failed { error: format!("job exceeded {}s timeout", self.config.job_timeout_s) },
        }
    }

    /// Write the trace + event the idempotency probe owes the audit trail
    /// (spec.md §4.10: "the worker emits `DUPLICATE_SKIPPED`"; §8 property
    /// 2: "N-1 `DUPLICATE_SKIPPED` events"). Best-effort, like every other
    /// audit write (spec.md §4.11) — a failure here is logged, not
    /// propagated, since the job still finishes successfully either way.
    async fn emit_duplicate_skipped(&self, submission_id: &SubmissionId, owner_id: OwnerId) {
        let now = Utc::now();
        let trace = AuditTrace {
            submission_id: submission_id.clone(),
            owner_id,
            input_fingerprint: submission_id.as_str().to_string(),
            signals: Vec::new(),
            rules_applied: Vec::new(),
            outcome: TraceOutcome::DuplicateSkipped,
            errors: Vec::new(),
            created_at: now,
        };
        if let Err(err) = audit::write_trace_with_retry(self.audit.as_ref(), &trace).await {
            error!(error = %err, submission_id = %submission_id, "failed to write duplicate-skipped trace");
        }
        let event = AuditEvent {
            submission_id: submission_id.clone(),
            actor_role: ActorRole::Worker,
            event_type: EventType::DuplicateSkipped,
            payload: json!({}),
            created_at: now,
        };
        if let Err(err) = audit::append_event_with_retry(self.audit.as_ref(), &event).await {
            error!(error = %err, submission_id = %submission_id, "failed to append duplicate-skipped event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audit::InMemoryAuditRepository, config::Config, ids::OwnerId, llm::{LlmCapability, stub::StubLlmBackend},
        object_store::InMemoryObjectStore, ocr::{OcrCapability, engines::stub::StubOcrEngine},
        queue::sqlite_store::SqliteQueueStore, repository::InMemorySubmissionRepository,
    };
    use rusqlite::Connection;
    use std::sync::Mutex as StdMutex;

    /// A hermetic pipeline runner: every capability is a deterministic,
    /// no-network stand-in, so these tests never depend on vendor
    /// credentials or reachability.
    fn runner() -> Arc<PipelineRunner> {
        Arc::new(PipelineRunner::new(
            Arc::new(InMemoryObjectStore::default()),
            OcrCapability::new(Arc::new(StubOcrEngine)),
            LlmCapability::with_backend(Arc::new(StubLlmBackend), "gpt-4o-mini".to_string()),
            Arc::new(InMemorySubmissionRepository::default()),
            Arc::new(InMemoryAuditRepository::default()),
            Config::default(),
        ))
    }

    fn upload_request(text: &str) -> Vec<u8> {
        let request = UploadRequest {
            file_bytes: text.as_bytes().to_vec(),
            filename: "essay.txt".to_string(),
            owner_id: OwnerId("owner-1".to_string()),
            access_token: "token".to_string(),
            upload_batch_id: None,
            ocr_provider_hint: None,
        };
        serde_json::to_vec(&request).unwrap()
    }

    #[tokio::test]
    async fn claims_and_completes_a_single_job() {
        let queue: Arc<dyn QueueStore> =
            Arc::new(SqliteQueueStore::new(Arc::new(StdMutex::new(Connection::open_in_memory().unwrap()))).unwrap());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(InMemorySubmissionRepository::default());
        let audit: Arc<dyn AuditRepository> = Arc::new(InMemoryAuditRepository::default());
        let worker = Worker::new(queue.clone(), submissions, audit, runner(), WorkerConfig::default(), 1);

        let job_id = queue
            .enqueue(upload_request(
                "Student's Name: Jordan Altman\nGrade: 8\nAn essay about my father's patience and quiet strength.",
            ))
            .await
            .unwrap();
        let job = queue.claim().await.unwrap().expect("job should be claimable");
        worker.process_job(job).await;

        let outcome = queue.outcome_for(&job_id).await.unwrap().expect("outcome should be recorded");
        assert!(matches!(outcome, JobOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn a_malformed_payload_fails_without_panicking() {
        let queue: Arc<dyn QueueStore> =
            Arc::new(SqliteQueueStore::new(Arc::new(StdMutex::new(Connection::open_in_memory().unwrap()))).unwrap());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(InMemorySubmissionRepository::default());
        let audit: Arc<dyn AuditRepository> = Arc::new(InMemoryAuditRepository::default());
        let worker = Worker::new(queue.clone(), submissions, audit, runner(), WorkerConfig::default(), 1);

        let job_id = queue.enqueue(b"not json".to_vec()).await.unwrap();
        let job = queue.claim().await.unwrap().unwrap();
        worker.process_job(job).await;

        let outcome = queue.outcome_for(&job_id).await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
    }
}
