//! Audit Writer (spec.md §4.11).
//!
//! Writes one [`AuditTrace`] row per submission run and appends
//! [`AuditEvent`]s as stages complete. Append-only — nothing here ever
//! issues an `UPDATE`. Grounded the same way as `repository.rs`: a
//! `rusqlite` connection behind a `Mutex`, dispatched to a blocking thread
//! via the teacher's `spawn_blocking_propagating_panics`. Writes are
//! retried once through [`retry_stage`], generalized from the teacher's
//! OpenAI-specific retry path (spec.md §4.11: "retried once").

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension as _, params};

use crate::{
    async_utils::blocking_iter_streams::spawn_blocking_propagating_panics,
    ids::SubmissionId,
    model::{AuditEvent, AuditTrace},
    prelude::*,
    retry::retry_stage,
};

/// Append-only audit storage: one trace per run, many events per run
/// (spec.md §3 invariant 4).
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Insert a trace. Traces are never updated after insertion.
    async fn insert_trace(&self, trace: &AuditTrace) -> Result<()>;

    /// Append an event. Events for a given submission are totally ordered
    /// by insertion (spec.md §5: "the writer MUST preserve insertion
    /// order").
    async fn append_event(&self, event: &AuditEvent) -> Result<()>;

    /// Fetch every event recorded for `submission_id`, in insertion order.
    async fn events_for(&self, submission_id: &SubmissionId) -> Result<Vec<AuditEvent>>;

    /// Fetch the trace recorded for `submission_id`, if any.
    async fn trace_for(&self, submission_id: &SubmissionId) -> Result<Option<AuditTrace>>;
}

/// Insert a trace and append an event, retrying each once on a transient
/// failure (spec.md §4.11, §7: "`audit_error` is retried once; persistent
/// failure ... does not roll back the record write").
///
/// This is a thin convenience wrapper, not part of the [`AuditRepository`]
/// trait itself, so that callers (the pipeline runner) get the retry
/// behavior without every backend having to reimplement it.
pub async fn write_trace_with_retry(repo: &dyn AuditRepository, trace: &AuditTrace) -> Result<()> {
    retry_stage(
        || async { repo.insert_trace(trace).await.map_err(AuditWriteError) },
        |_| true,
    )
    .await
}

/// Append an event, retrying once on a transient failure.
pub async fn append_event_with_retry(repo: &dyn AuditRepository, event: &AuditEvent) -> Result<()> {
    retry_stage(
        || async { repo.append_event(event).await.map_err(AuditWriteError) },
        |_| true,
    )
    .await
}

/// Wrapper so `anyhow::Error` (which doesn't implement `std::error::Error`
/// the way [`retry::IsKnownTransient`]'s bound wants) can flow through
/// `retry_stage`'s generic `E: fmt::Debug + Into<anyhow::Error>` bound.
#[derive(Debug)]
struct AuditWriteError(anyhow::Error);

impl From<AuditWriteError> for anyhow::Error {
    fn from(err: AuditWriteError) -> Self {
        err.0
    }
}

/// A `rusqlite`-backed [`AuditRepository`].
pub struct SqliteAuditRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS audit_traces (
                    submission_id TEXT NOT NULL,
                    trace_json TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS audit_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    submission_id TEXT NOT NULL,
                    event_json TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_traces_submission ON audit_traces(submission_id);
                CREATE INDEX IF NOT EXISTS idx_audit_events_submission ON audit_events(submission_id, id);",
            )
            .context("failed to create audit tables")?;
        }
        Ok(Self { conn })
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    #[instrument(level = "debug", skip(self, trace), fields(submission_id = %trace.submission_id))]
    async fn insert_trace(&self, trace: &AuditTrace) -> Result<()> {
        let conn = self.conn.clone();
        let trace = trace.clone();
        spawn_blocking_propagating_panics(move || -> Result<()> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let trace_json = serde_json::to_string(&trace).context("failed to serialize audit trace")?;
            conn.execute(
                "INSERT INTO audit_traces (submission_id, trace_json, created_at) VALUES (?1, ?2, ?3)",
                params![trace.submission_id.as_str(), trace_json, trace.created_at.to_rfc3339()],
            )
            .context("failed to insert audit trace")?;
            Ok(())
        })
        .await
    }

    #[instrument(level = "debug", skip(self, event), fields(submission_id = %event.submission_id, event_type = ?event.event_type))]
    async fn append_event(&self, event: &AuditEvent) -> Result<()> {
        let conn = self.conn.clone();
        let event = event.clone();
        spawn_blocking_propagating_panics(move || -> Result<()> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let event_json = serde_json::to_string(&event).context("failed to serialize audit event")?;
            conn.execute(
                "INSERT INTO audit_events (submission_id, event_json, created_at) VALUES (?1, ?2, ?3)",
                params![event.submission_id.as_str(), event_json, event.created_at.to_rfc3339()],
            )
            .context("failed to append audit event")?;
            Ok(())
        })
        .await
    }

    async fn events_for(&self, submission_id: &SubmissionId) -> Result<Vec<AuditEvent>> {
        let conn = self.conn.clone();
        let submission_id = submission_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<Vec<AuditEvent>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT event_json FROM audit_events WHERE submission_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![submission_id.as_str()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read audit events")?;
            rows.into_iter()
                .map(|json| serde_json::from_str(&json).context("failed to deserialize audit event"))
                .collect()
        })
        .await
    }

    async fn trace_for(&self, submission_id: &SubmissionId) -> Result<Option<AuditTrace>> {
        let conn = self.conn.clone();
        let submission_id = submission_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<Option<AuditTrace>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let trace_json: Option<String> = conn
                .query_row(
                    "SELECT trace_json FROM audit_traces WHERE submission_id = ?1 ORDER BY rowid DESC LIMIT 1",
                    params![submission_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to query audit trace")?;
            trace_json
                .map(|json| serde_json::from_str(&json).context("failed to deserialize audit trace"))
                .transpose()
        })
        .await
    }
}

/// An in-memory [`AuditRepository`], used by tests.
#[derive(Default)]
pub struct InMemoryAuditRepository {
    traces: Mutex<Vec<AuditTrace>>,
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert_trace(&self, trace: &AuditTrace) -> Result<()> {
        self.traces.lock().expect("mutex poisoned").push(trace.clone());
        Ok(())
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().expect("mutex poisoned").push(event.clone());
        Ok(())
    }

    async fn events_for(&self, submission_id: &SubmissionId) -> Result<Vec<AuditEvent>> {
        Ok(self
            .events
            .lock()
            .expect("mutex poisoned")
            .iter()
            .filter(|e| &e.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn trace_for(&self, submission_id: &SubmissionId) -> Result<Option<AuditTrace>> {
        Ok(self
            .traces
            .lock()
            .expect("mutex poisoned")
            .iter()
            .rev()
            .find(|t| &t.submission_id == submission_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::OwnerId,
        model::{ActorRole, EventType, TraceOutcome},
    };
    use chrono::Utc;

    fn sample_trace(id: &str) -> AuditTrace {
        AuditTrace {
            submission_id: SubmissionId(id.to_string()),
            owner_id: OwnerId("owner-1".to_string()),
            input_fingerprint: "fingerprint".to_string(),
            signals: Vec::new(),
            rules_applied: Vec::new(),
            outcome: TraceOutcome::Saved,
            errors: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn sample_event(id: &str, event_type: EventType) -> AuditEvent {
        AuditEvent {
            submission_id: SubmissionId(id.to_string()),
            actor_role: ActorRole::Worker,
            event_type,
            payload: json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn events_preserve_insertion_order() {
        let repo = SqliteAuditRepository::new(Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))).unwrap();
        repo.append_event(&sample_event("abc", EventType::Ingested)).await.unwrap();
        repo.append_event(&sample_event("abc", EventType::OcrComplete)).await.unwrap();
        repo.append_event(&sample_event("abc", EventType::Saved)).await.unwrap();

        let events = repo.events_for(&SubmissionId("abc".to_string())).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Ingested, EventType::OcrComplete, EventType::Saved]);
    }

    #[tokio::test]
    async fn trace_round_trips() {
        let repo = SqliteAuditRepository::new(Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))).unwrap();
        repo.insert_trace(&sample_trace("abc")).await.unwrap();
        let trace = repo.trace_for(&SubmissionId("abc".to_string())).await.unwrap();
        assert!(trace.is_some());
        assert_eq!(trace.unwrap().outcome, TraceOutcome::Saved);
    }

    #[tokio::test]
    async fn in_memory_repository_also_preserves_order() {
        let repo = InMemoryAuditRepository::default();
        repo.append_event(&sample_event("abc", EventType::Ingested)).await.unwrap();
        repo.append_event(&sample_event("abc", EventType::ValidationComplete)).await.unwrap();
        let events = repo.events_for(&SubmissionId("abc".to_string())).await.unwrap();
        assert_eq!(events[0].event_type, EventType::Ingested);
        assert_eq!(events[1].event_type, EventType::ValidationComplete);
    }

    #[tokio::test]
    async fn write_trace_with_retry_succeeds_against_in_memory_repo() {
        let repo = InMemoryAuditRepository::default();
        write_trace_with_retry(&repo, &sample_trace("abc")).await.unwrap();
        assert!(repo.trace_for(&SubmissionId("abc".to_string())).await.unwrap().is_some());
    }
}
