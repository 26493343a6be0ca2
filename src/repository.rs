//! Persistence Repositories (spec.md §4 component table, §5 "Shared
//! resources"): submission record CRUD with ownership enforcement.
//!
//! Grounded in `AmirTlinov-branchmind`'s `bm_storage` crate and
//! `ktiyab-coheara`'s direct `rusqlite` usage for the "own your SQL, wrap a
//! blocking connection behind `spawn_blocking`" pattern — the teacher crate
//! has no persistence layer of its own (it reads/writes files), so this
//! module is new, but it reuses the teacher's
//! `spawn_blocking_propagating_panics` helper (`async_utils::
//! blocking_iter_streams`) to keep `rusqlite`'s synchronous `Connection` off
//! the async executor.
//!
//! spec.md invariant 1: "Every persisted record has an owner; cross-owner
//! reads are impossible." Every read method here takes an `&OwnerId` and
//! filters by it in SQL; there is no method that can return a record without
//! one.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    async_utils::blocking_iter_streams::spawn_blocking_propagating_panics,
    ids::{OwnerId, SubmissionId, UploadBatchId},
    model::{DocClass, DocFormat, Status, SubmissionRecord},
    prelude::*,
};

/// Submission record CRUD, scoped by owner (spec.md §3 invariant 1).
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Insert or update a record. `submission_id` is the natural key:
    /// reprocessing the same content upserts the same row (spec.md §3
    /// invariant 2).
    async fn upsert(&self, record: &SubmissionRecord) -> Result<()>;

    /// Fetch a record by ID, scoped to `owner_id`. Returns `Ok(None)` both
    /// when the ID doesn't exist and when it belongs to a different owner —
    /// the two cases are indistinguishable from outside the owner's view,
    /// by design.
    async fn get(&self, owner_id: &OwnerId, submission_id: &SubmissionId) -> Result<Option<SubmissionRecord>>;

    /// Fetch a record by ID only, bypassing ownership scoping. Used by the
    /// worker's idempotency probe (spec.md §4.10), which runs with
    /// privileged, system-level credentials rather than a caller's
    /// `owner_id`.
    async fn get_unscoped(&self, submission_id: &SubmissionId) -> Result<Option<SubmissionRecord>>;

    /// List every record owned by `owner_id`, most recent first.
    async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<SubmissionRecord>>;

    /// List every record with `status = APPROVED`, for CSV export
    /// (spec.md §6). Unscoped: export is an administrative operation over
    /// the whole contest, not a single owner's view.
    async fn list_approved(&self) -> Result<Vec<SubmissionRecord>>;

    /// List every record currently needing review, for CSV export's
    /// needs-review partition (spec.md §6).
    async fn list_needs_review(&self) -> Result<Vec<SubmissionRecord>>;
}

/// A `rusqlite`-backed [`SubmissionRepository`]. The synchronous `Connection`
/// is held behind a `Mutex` and every call is dispatched to a blocking
/// thread, the same pattern `audit.rs` and `queue/sqlite_store.rs` use for
/// their own tables.
pub struct SqliteSubmissionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSubmissionRepository {
    /// Open (creating if necessary) the submissions table in `conn`.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS submissions (
                    submission_id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    upload_batch_id TEXT,
                    parent_submission_id TEXT,
                    status TEXT NOT NULL,
                    doc_class TEXT NOT NULL,
                    doc_format TEXT NOT NULL,
                    needs_review INTEGER NOT NULL,
                    record_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_submissions_owner ON submissions(owner_id);
                CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status);",
            )
            .context("failed to create submissions table")?;
        }
        Ok(Self { conn })
    }

    fn row_to_record(record_json: String) -> Result<SubmissionRecord> {
        serde_json::from_str(&record_json).context("failed to deserialize stored submission record")
    }
}

#[async_trait]
impl SubmissionRepository for SqliteSubmissionRepository {
    #[instrument(level = "debug", skip(self, record), fields(submission_id = %record.submission_id))]
    async fn upsert(&self, record: &SubmissionRecord) -> Result<()> {
        let conn = self.conn.clone();
        let record = record.clone();
        spawn_blocking_propagating_panics(move || -> Result<()> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let record_json = serde_json::to_string(&record).context("failed to serialize submission record")?;
            conn.execute(
                "INSERT INTO submissions (
                    submission_id, owner_id, upload_batch_id, parent_submission_id,
                    status, doc_class, doc_format, needs_review, record_json,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(submission_id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    upload_batch_id = excluded.upload_batch_id,
                    parent_submission_id = excluded.parent_submission_id,
                    status = excluded.status,
                    doc_class = excluded.doc_class,
                    doc_format = excluded.doc_format,
                    needs_review = excluded.needs_review,
                    record_json = excluded.record_json,
                    updated_at = excluded.updated_at",
                params![
                    record.submission_id.as_str(),
                    record.owner_id.0,
                    record.upload_batch_id.as_ref().map(|b| b.0.clone()),
                    record.parent_submission_id.as_ref().map(|p| p.as_str().to_string()),
                    status_text(record.status),
                    doc_class_text(record.doc_class),
                    doc_format_text(record.doc_format),
                    record.needs_review as i64,
                    record_json,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to upsert submission record")?;
            Ok(())
        })
        .await
    }

    async fn get(&self, owner_id: &OwnerId, submission_id: &SubmissionId) -> Result<Option<SubmissionRecord>> {
        let conn = self.conn.clone();
        let owner_id = owner_id.clone();
        let submission_id = submission_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<Option<SubmissionRecord>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let record_json: Option<String> = conn
                .query_row(
                    "SELECT record_json FROM submissions WHERE submission_id = ?1 AND owner_id = ?2",
                    params![submission_id.as_str(), owner_id.0],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to query submission record")?;
            record_json.map(Self::row_to_record).transpose()
        })
        .await
    }

    async fn get_unscoped(&self, submission_id: &SubmissionId) -> Result<Option<SubmissionRecord>> {
        let conn = self.conn.clone();
        let submission_id = submission_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<Option<SubmissionRecord>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let record_json: Option<String> = conn
                .query_row(
                    "SELECT record_json FROM submissions WHERE submission_id = ?1",
                    params![submission_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to query submission record")?;
            record_json.map(Self::row_to_record).transpose()
        })
        .await
    }

    async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn.clone();
        let owner_id = owner_id.clone();
        spawn_blocking_propagating_panics(move || -> Result<Vec<SubmissionRecord>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT record_json FROM submissions WHERE owner_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![owner_id.0], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read submission rows")?;
            rows.into_iter().map(Self::row_to_record).collect()
        })
        .await
    }

    async fn list_approved(&self) -> Result<Vec<SubmissionRecord>> {
        self.list_by_status("APPROVED").await
    }

    async fn list_needs_review(&self) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn.clone();
        spawn_blocking_propagating_panics(move || -> Result<Vec<SubmissionRecord>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let mut stmt =
                conn.prepare("SELECT record_json FROM submissions WHERE needs_review = 1 ORDER BY created_at DESC")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read submission rows")?;
            rows.into_iter().map(Self::row_to_record).collect()
        })
        .await
    }
}

impl SqliteSubmissionRepository {
    async fn list_by_status(&self, status: &'static str) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn.clone();
        spawn_blocking_propagating_panics(move || -> Result<Vec<SubmissionRecord>> {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            let mut stmt =
                conn.prepare("SELECT record_json FROM submissions WHERE status = ?1 ORDER BY created_at DESC")?;
            let rows = stmt
                .query_map(params![status], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to read submission rows")?;
            rows.into_iter().map(Self::row_to_record).collect()
        })
        .await
    }
}

fn status_text(status: Status) -> &'static str {
    match status {
        Status::PendingReview => "PENDING_REVIEW",
        Status::Processed => "PROCESSED",
        Status::Approved => "APPROVED",
        Status::Failed => "FAILED",
    }
}

fn doc_class_text(doc_class: DocClass) -> &'static str {
    match doc_class {
        DocClass::SingleTyped => "SINGLE_TYPED",
        DocClass::SingleScanned => "SINGLE_SCANNED",
        DocClass::MultiPageSingle => "MULTI_PAGE_SINGLE",
        DocClass::BulkScannedBatch => "BULK_SCANNED_BATCH",
        DocClass::EssayWithHeaderMetadata => "ESSAY_WITH_HEADER_METADATA",
    }
}

fn doc_format_text(doc_format: DocFormat) -> &'static str {
    match doc_format {
        DocFormat::NativeText => "native_text",
        DocFormat::ImageOnly => "image_only",
        DocFormat::Hybrid => "hybrid",
    }
}

/// An in-memory [`SubmissionRepository`], used by tests (spec.md §8
/// properties 2, 3, 6 are exercised against this rather than a real
/// database).
#[derive(Default)]
pub struct InMemorySubmissionRepository {
    records: Mutex<std::collections::HashMap<String, SubmissionRecord>>,
}

#[async_trait]
impl SubmissionRepository for InMemorySubmissionRepository {
    async fn upsert(&self, record: &SubmissionRecord) -> Result<()> {
        self.records
            .lock()
            .expect("mutex poisoned")
            .insert(record.submission_id.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, owner_id: &OwnerId, submission_id: &SubmissionId) -> Result<Option<SubmissionRecord>> {
        Ok(self
            .records
            .lock()
            .expect("mutex poisoned")
            .get(submission_id.as_str())
            .filter(|r| &r.owner_id == owner_id)
            .cloned())
    }

    async fn get_unscoped(&self, submission_id: &SubmissionId) -> Result<Option<SubmissionRecord>> {
        Ok(self.records.lock().expect("mutex poisoned").get(submission_id.as_str()).cloned())
    }

    async fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<SubmissionRecord>> {
        Ok(self
            .records
            .lock()
            .expect("mutex poisoned")
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_approved(&self) -> Result<Vec<SubmissionRecord>> {
        Ok(self
            .records
            .lock()
            .expect("mutex poisoned")
            .values()
            .filter(|r| r.status == Status::Approved)
            .cloned()
            .collect())
    }

    async fn list_needs_review(&self) -> Result<Vec<SubmissionRecord>> {
        Ok(self
            .records
            .lock()
            .expect("mutex poisoned")
            .values()
            .filter(|r| r.needs_review)
            .cloned()
            .collect())
    }
}

/// A minimal upload-batch row: a grouping identifier for bulk uploads
/// (spec.md §4 component table: "upload-batch table").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadBatch {
    pub upload_batch_id: UploadBatchId,
    pub owner_id: OwnerId,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocFormat, ExtractedFields as Fields, ReasonCodeSet, Status};
    use chrono::Utc;

    fn sample_record(owner: &str, id: &str) -> SubmissionRecord {
        SubmissionRecord {
            submission_id: SubmissionId(id.to_string()),
            owner_id: OwnerId(owner.to_string()),
            upload_batch_id: None,
            parent_submission_id: None,
            child_index: None,
            multi_entry_source: None,
            filename: "essay.pdf".to_string(),
            doc_class: DocClass::SingleTyped,
            doc_format: DocFormat::NativeText,
            extracted_fields: Fields::default(),
            word_count: 100,
            ocr_confidence_avg: 1.0,
            ocr_failed: false,
            needs_review: false,
            status: Status::Processed,
            review_reason_codes: ReasonCodeSet::new(),
            storage_path: format!("{owner}/{id}/original.pdf"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sqlite_repository_round_trips_a_record() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let repo = SqliteSubmissionRepository::new(conn).unwrap();
        let record = sample_record("owner-1", "abc123");
        repo.upsert(&record).await.unwrap();

        let fetched = repo
            .get(&OwnerId("owner-1".to_string()), &SubmissionId("abc123".to_string()))
            .await
            .unwrap()
            .expect("record should exist");
        assert_eq!(fetched.submission_id.as_str(), "abc123");
    }

    #[tokio::test]
    async fn sqlite_repository_enforces_ownership() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let repo = SqliteSubmissionRepository::new(conn).unwrap();
        repo.upsert(&sample_record("owner-1", "abc123")).await.unwrap();

        let fetched = repo
            .get(&OwnerId("owner-2".to_string()), &SubmissionId("abc123".to_string()))
            .await
            .unwrap();
        assert!(fetched.is_none(), "a different owner must never see this record");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_submission_id() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let repo = SqliteSubmissionRepository::new(conn).unwrap();
        let mut record = sample_record("owner-1", "abc123");
        repo.upsert(&record).await.unwrap();
        record.status = Status::Approved;
        record.needs_review = false;
        repo.upsert(&record).await.unwrap();

        let all = repo.list_by_owner(&OwnerId("owner-1".to_string())).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, Status::Approved);
    }

    #[tokio::test]
    async fn list_approved_filters_by_status() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let repo = SqliteSubmissionRepository::new(conn).unwrap();
        let mut approved = sample_record("owner-1", "aaa111");
        approved.status = Status::Approved;
        repo.upsert(&approved).await.unwrap();
        repo.upsert(&sample_record("owner-1", "bbb222")).await.unwrap();

        let approved_only = repo.list_approved().await.unwrap();
        assert_eq!(approved_only.len(), 1);
        assert_eq!(approved_only[0].submission_id.as_str(), "aaa111");
    }

    #[tokio::test]
    async fn in_memory_repository_enforces_ownership_too() {
        let repo = InMemorySubmissionRepository::default();
        repo.upsert(&sample_record("owner-1", "abc123")).await.unwrap();
        let fetched = repo
            .get(&OwnerId("owner-2".to_string()), &SubmissionId("abc123".to_string()))
            .await
            .unwrap();
        assert!(fetched.is_none());
    }
}
