//! Job Queue & Worker (spec.md §4.10): the persistent FIFO queue a worker
//! drains, and the atomic claim/finish contract that keeps two workers from
//! ever processing the same job.
//!
//! The *durable* queue modeled here is distinct from the teacher's
//! `queues::work::WorkQueue` (`async_utils`-adjacent, in-process only,
//! built from `futures::channel::mpsc`): that in-process primitive is still
//! used internally by [`crate::ocr::OcrCapability::ocr_pdf_pages`] to fan
//! out concurrent page OCR calls (spec.md §9's REDESIGN note: "use
//! lightweight tasks only for concurrent external I/O ... never to
//! interleave pipeline stages"). This module is the *outer*, crash-
//! recoverable queue a worker process polls.

pub mod sqlite_store;
pub mod worker;

use crate::{ids::JobId, model::Job, prelude::*};

/// A small outcome blob recorded when a job finishes (spec.md §3:
/// "Jobs ... store a small outcome blob (e.g., child IDs produced, error
/// message)").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job ran to completion. `child_submission_ids` is empty for a
    /// single-entry submission and non-empty for a split batch/multi-entry
    /// parent (spec.md §4.9 "SPLIT?").
    Success { child_submission_ids: Vec<String> },
    /// The job was a no-op because a finalized record already existed
    /// (spec.md §4.10 "Idempotency").
    DuplicateSkipped { existing_submission_id: String },
    /// The job failed terminally; `error` is a human-readable summary, not
    /// a parseable error code (spec.md §7: "no failure ever exposes
    /// internal state to end users").
    Failed { error: String },
}

/// The durable job queue: persists across process restarts and supports
/// atomic claim so no two workers can process the same job (spec.md §4.10).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Atomically persist a new job in state `queued`. Returns its ID.
    async fn enqueue(&self, payload: Vec<u8>) -> Result<JobId>;

    /// Atomically flip one `queued` job to `started` and return it.
    /// Returns `Ok(None)` if the queue is empty. No two concurrent callers
    /// may ever receive the same job (spec.md §4.10, §5's "only explicit
    /// mutual-exclusion is the queue claim").
    async fn claim(&self) -> Result<Option<Job>>;

    /// Mark `job_id` finished, with the given outcome.
    async fn finish(&self, job_id: &JobId, outcome: JobOutcome) -> Result<()>;

    /// Reset any `started` job whose claim is older than `timeout` back to
    /// `queued` (spec.md §4.10: "a stale-claim sweeper"). Returns how many
    /// jobs were reset.
    async fn reset_stale_claims(&self, timeout: std::time::Duration) -> Result<usize>;

    /// Fetch a job's current status. Used by tests and by spec.md §8
    /// property 6 ("audit completeness").
    async fn get(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// Fetch the outcome blob stored by [`QueueStore::finish`], if the job
    /// has finished.
    async fn outcome_for(&self, job_id: &JobId) -> Result<Option<JobOutcome>>;
}
