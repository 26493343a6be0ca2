//! CSV export (spec.md §6 "CSV export format (downstream contract)").
//!
//! The header is frozen and must never be reordered or renamed — downstream
//! consumers parse it positionally. Built on the `csv` crate the same way
//! the teacher's report-writing code favors a real CSV writer over
//! hand-joined strings (escaping embedded commas/quotes is not worth
//! reinventing).

use csv::Writer;

use crate::{model::SubmissionRecord, prelude::*, repository::SubmissionRepository};

/// The frozen CSV header (spec.md §6). Order matters; this is a downstream
/// contract, not an internal convenience.
const HEADER: &[&str] = &[
    "submission_id",
    "student_name",
    "school_name",
    "grade",
    "teacher_name",
    "city_or_location",
    "father_figure_name",
    "phone",
    "email",
    "word_count",
    "ocr_confidence_avg",
    "needs_review",
    "review_reason_codes",
    "filename",
    "pdf_url",
    "created_at",
];

/// Which partition of records to export (spec.md §6: "Exports MUST include
/// only records with `status=APPROVED` unless the caller explicitly
/// requests the needs-review partition").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportPartition {
    Approved,
    NeedsReview,
}

/// Render `records` as a CSV document with the frozen header, returning it
/// as a UTF-8 string.
pub fn render_csv(records: &[SubmissionRecord]) -> Result<String> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(HEADER).context("failed to write CSV header")?;
    for record in records {
        writer.write_record(row_for(record)).context("failed to write CSV row")?;
    }
    let bytes = writer.into_inner().context("failed to finalize CSV writer")?;
    String::from_utf8(bytes).context("CSV writer produced non-UTF-8 output")
}

/// Fetch the requested partition from `repository` and render it as CSV
/// (spec.md §6).
pub async fn export(repository: &dyn SubmissionRepository, partition: ExportPartition) -> Result<String> {
    let records = match partition {
        ExportPartition::Approved => repository.list_approved().await?,
        ExportPartition::NeedsReview => repository.list_needs_review().await?,
    };
    render_csv(&records)
}

fn row_for(record: &SubmissionRecord) -> Vec<String> {
    let fields = &record.extracted_fields;
    vec![
        record.submission_id.as_str().to_string(),
        fields.student_name.clone().unwrap_or_default(),
        fields.school_name.clone().unwrap_or_default(),
        fields.grade.map(|g| g.to_string()).unwrap_or_default(),
        fields.teacher_name.clone().unwrap_or_default(),
        fields.city_or_location.clone().unwrap_or_default(),
        fields.father_figure_name.clone().unwrap_or_default(),
        fields.phone.clone().unwrap_or_default(),
        fields.email.clone().unwrap_or_default(),
        record.word_count.to_string(),
        format!("{:.3}", record.ocr_confidence_avg),
        record.needs_review.to_string(),
        record.review_reason_codes.to_string(),
        record.filename.clone(),
        pdf_url_for(record),
        record.created_at.to_rfc3339(),
    ]
}

/// The `pdf_url` column (spec.md §6). This crate owns object storage, not
/// public URL issuance — that belongs to the out-of-scope HTTP layer
/// sitting in front of it — so the exported value is the object-store key
/// itself, the one thing this crate can say for certain about where the
/// original file lives.
fn pdf_url_for(record: &SubmissionRecord) -> String {
    record.storage_path.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::{OwnerId, SubmissionId},
        model::{DocClass, DocFormat, ExtractedFields, Grade, ReasonCodeSet, ReviewReasonCode, Status},
        repository::InMemorySubmissionRepository,
    };
    use chrono::Utc;

    fn sample(id: &str, status: Status) -> SubmissionRecord {
        SubmissionRecord {
            submission_id: SubmissionId(id.to_string()),
            owner_id: OwnerId("owner-1".to_string()),
            upload_batch_id: None,
            parent_submission_id: None,
            child_index: None,
            multi_entry_source: None,
            filename: "essay.pdf".to_string(),
            doc_class: DocClass::SingleTyped,
            doc_format: DocFormat::NativeText,
            extracted_fields: ExtractedFields {
                student_name: Some("Jordan Altman".to_string()),
                school_name: Some("Lincoln Middle School".to_string()),
                grade: Some(Grade::Numeric(8)),
                ..Default::default()
            },
            word_count: 250,
            ocr_confidence_avg: 0.91,
            ocr_failed: false,
            needs_review: false,
            status,
            review_reason_codes: ReasonCodeSet::new(),
            storage_path: format!("owner-1/{id}/original.pdf"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn header_row_matches_the_frozen_contract() {
        let csv = render_csv(&[]).unwrap();
        let first_line = csv.lines().next().unwrap();
        assert_eq!(
            first_line,
            "submission_id,student_name,school_name,grade,teacher_name,city_or_location,\
             father_figure_name,phone,email,word_count,ocr_confidence_avg,needs_review,\
             review_reason_codes,filename,pdf_url,created_at"
        );
    }

    #[test]
    fn a_record_round_trips_its_fields_into_a_row() {
        let csv = render_csv(&[sample("abc123", Status::Approved)]).unwrap();
        let mut lines = csv.lines();
        lines.next();
        let row = lines.next().unwrap();
        assert!(row.starts_with("abc123,Jordan Altman,Lincoln Middle School,8,"));
        assert!(row.contains("owner-1/abc123/original.pdf"));
    }

    #[tokio::test]
    async fn export_filters_to_the_requested_partition() {
        let repo = InMemorySubmissionRepository::default();
        repo.upsert(&sample("aaa", Status::Approved)).await.unwrap();
        let mut needs_review = sample("bbb", Status::PendingReview);
        needs_review.needs_review = true;
        needs_review.review_reason_codes.push(ReviewReasonCode::LowConfidence);
        repo.upsert(&needs_review).await.unwrap();

        let approved_csv = export(&repo, ExportPartition::Approved).await.unwrap();
        assert!(approved_csv.contains("aaa"));
        assert!(!approved_csv.contains("bbb"));

        let review_csv = export(&repo, ExportPartition::NeedsReview).await.unwrap();
        assert!(review_csv.contains("bbb"));
        assert!(!review_csv.contains("aaa"));
    }
}
