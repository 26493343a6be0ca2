//! PDF Splitter (spec.md §4.8).
//!
//! For BULK_SCANNED_BATCH, emits one child per page. For multi-entry PDFs
//! (an alternating metadata/essay pattern across ≥4 pages with
//! pattern-consistency ≥0.7), groups pages 2-at-a-time into entries. Pure
//! over bytes and the already-computed [`DocumentAnalysis`]: deterministic
//! child IDs come from [`SubmissionId::child_page`]/[`SubmissionId::
//! child_entry`], never from timestamps or random bytes (spec.md §9
//! "PDF-splitter child IDs"). Page extraction shells out to `pdftk cat`,
//! the same "shell out to a poppler/pdftk leaf tool, check the exit
//! status" pattern `textlayer.rs` uses for AcroForm field dumps.

use std::process::Stdio;

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    cpu_limit::with_cpu_semaphore,
    ids::SubmissionId,
    model::{ChunkRange, DocClass, DocumentAnalysis},
    prelude::*,
};

/// One child produced by the splitter: its bytes, its deterministic ID, and
/// the page range (0-based, inclusive-exclusive) it was extracted from.
#[derive(Debug, Clone)]
pub struct SplitChild {
    pub bytes: Vec<u8>,
    pub child_id: SubmissionId,
    pub page_range: ChunkRange,
}

/// Whether `analysis` calls for splitting at all (spec.md §4.9 "SPLIT?").
/// `MULTI_PAGE_SINGLE` has more than one page but is still one submission,
/// so it is not split.
pub fn should_split(analysis: &DocumentAnalysis) -> bool {
    analysis.doc_class == DocClass::BulkScannedBatch || is_multi_entry(analysis)
}

/// Multi-entry detection (spec.md §4.8): an alternating metadata/essay
/// pattern across ≥4 pages with pattern-consistency ≥0.7. The Document
/// Analyzer already recorded this as `is_scanned_multi_submission`; the
/// splitter's own job is only to decide the grouping, not to re-detect it.
fn is_multi_entry(analysis: &DocumentAnalysis) -> bool {
    analysis.doc_class != DocClass::BulkScannedBatch
        && analysis.is_scanned_multi_submission
        && analysis.page_count >= 4
        && analysis.chunk_ranges.len() >= 2
}

/// Split `pdf_bytes` into children per `analysis`'s `doc_class` and
/// `chunk_ranges` (spec.md §4.8).
///
/// - `BULK_SCANNED_BATCH`: one child per page, IDs `{parent}_p{i}`.
/// - Multi-entry: pages grouped 2-at-a-time, IDs `{parent}_e{i}`.
#[instrument(level = "debug", skip(pdf_bytes), fields(page_count = analysis.page_count))]
pub async fn split(pdf_bytes: &[u8], analysis: &DocumentAnalysis, parent_id: &SubmissionId) -> Result<Vec<SplitChild>> {
    if analysis.doc_class == DocClass::BulkScannedBatch {
        let mut children = Vec::with_capacity(analysis.page_count);
        for page_index in 0..analysis.page_count {
            let bytes = extract_pages(pdf_bytes, page_index, page_index + 1).await?;
            children.push(SplitChild {
                bytes,
                child_id: parent_id.child_page(page_index),
                page_range: (page_index, page_index + 1),
            });
        }
        return Ok(children);
    }

    let mut children = Vec::new();
    let mut entry_index = 0;
    let mut page = 0;
    while page < analysis.page_count {
        let end = (page + 2).min(analysis.page_count);
        let bytes = extract_pages(pdf_bytes, page, end).await?;
        children.push(SplitChild {
            bytes,
            child_id: parent_id.child_entry(entry_index),
            page_range: (page, end),
        });
        entry_index += 1;
        page = end;
    }
    Ok(children)
}

/// Extract the inclusive-exclusive 0-based page range `[start, end)` from
/// `pdf_bytes` as a standalone PDF, via `pdftk cat` (1-based page numbers
/// on the command line).
async fn extract_pages(pdf_bytes: &[u8], start: usize, end: usize) -> Result<Vec<u8>> {
    let tmpdir = tempfile::TempDir::with_prefix("splitter")?;
    let input_path = tmpdir.path().join("input.pdf");
    let output_path = tmpdir.path().join("output.pdf");
    tokio::fs::write(&input_path, pdf_bytes).await.context("failed to write temp PDF")?;

    let page_range = format!("{}-{}", start + 1, end);
    with_cpu_semaphore(|| async {
        let status = Command::new("pdftk")
            .arg(&input_path)
            .arg("cat")
            .arg(&page_range)
            .arg("output")
            .arg(&output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("failed to run pdftk cat")?;
        check_for_command_failure("pdftk cat", status)
    })
    .await?;

    tokio::fs::read(&output_path).await.context("failed to read split PDF output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocFormat, FormLayout, Structure};

    fn bulk_analysis(page_count: usize) -> DocumentAnalysis {
        DocumentAnalysis {
            format: DocFormat::ImageOnly,
            structure: Structure::BulkScannedBatch,
            form_layout: FormLayout::Freeform,
            page_count,
            chunk_ranges: (0..page_count).map(|i| (i, i + 1)).collect(),
            doc_class: DocClass::BulkScannedBatch,
            is_scanned_multi_submission: true,
        }
    }

    fn multi_entry_analysis(page_count: usize) -> DocumentAnalysis {
        DocumentAnalysis {
            format: DocFormat::ImageOnly,
            structure: Structure::Multi,
            form_layout: FormLayout::Freeform,
            page_count,
            chunk_ranges: vec![(0, 2), (2, 4)],
            doc_class: DocClass::MultiPageSingle,
            is_scanned_multi_submission: true,
        }
    }

    #[test]
    fn should_split_is_true_for_bulk_scanned_batch() {
        assert!(should_split(&bulk_analysis(5)));
    }

    #[test]
    fn should_split_is_true_for_multi_entry_pattern() {
        assert!(should_split(&multi_entry_analysis(4)));
    }

    #[test]
    fn should_split_is_false_for_ordinary_multi_page_single() {
        let mut analysis = multi_entry_analysis(3);
        analysis.is_scanned_multi_submission = false;
        assert!(!should_split(&analysis));
    }

    #[test]
    fn child_ids_are_deterministic_given_the_same_parent() {
        let parent = SubmissionId::from_bytes(b"parent bytes");
        assert_eq!(parent.child_page(2), parent.child_page(2));
        assert_eq!(parent.child_entry(1), parent.child_entry(1));
        assert_ne!(parent.child_page(2), parent.child_entry(2));
    }
}
