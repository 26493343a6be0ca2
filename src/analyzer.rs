//! Document Analyzer (spec.md §4.1).
//!
//! Classifies a PDF or image: format (native-text / image-only / hybrid),
//! structure (single / multi / bulk-scanned-batch), form layout, and the
//! chunk ranges a submission should be split into.
//!
//! Grounded in the teacher's `page_iter::PageIter` for rasterizing PDF pages
//! (itself a thin wrapper over `pdftocairo`) and in `queues/ocr/mod.rs`'s
//! `ImageSource`/dark-band-adjacent defect flags for the idea of scoring a
//! page's visual layout deterministically in code rather than via a model
//! call. The label-bag / dark-band heuristics themselves have no teacher
//! precedent (the teacher never classifies document structure), so they are
//! built fresh using the `image` crate for grayscale luminance sampling,
//! which the other example repos (`monokrome-foiacquire`'s scrapers) also
//! reach for when they need pixel-level inspection.
//!
//! Header-strip scoring (spec.md §4.1 step 3) needs *some* text to score.
//! For a native-text page that's the embedded text layer; for an
//! image-only or hybrid page there is no text layer to read, so those pages
//! are rasterized and OCR'd through the same [`crate::ocr::OcrCapability`]
//! the runner uses for the real extraction pass, and the header bag is
//! scored against that OCR output instead.

use std::process::Stdio;

use image::{GenericImageView as _, Pixel as _};
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    config::AnalyzerConfig,
    cpu_limit::with_cpu_semaphore,
    model::{ChunkRange, DocClass, DocFormat, DocumentAnalysis, FormLayout, Structure},
    ocr::OcrCapability,
    page_iter::{PageIter, PageIterOptions},
    prelude::*,
};

/// Image MIME types the analyzer treats as already-rasterized single pages.
const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

/// Bilingual label bag used to score the top strip of a page (spec.md §4.1
/// step 3), including the OCR-tolerant misspellings the spec calls out.
const LABEL_BAG: &[&str] = &[
    "student's name",
    "nombre del estudiante",
    "grade",
    "grado",
    "school",
    "escuela",
    "teacher",
    "maestro",
    "maestra",
    "father figure",
    "padre",
    "phone",
    "telefono",
    "email",
    "correo",
    // OCR-tolerant variants.
    "studnt",
    "garde",
    "schol",
];

/// A dark run of rows is only a boundary signal if it's at least this
/// fraction of the page height.
const DARK_BAND_MIN_HEIGHT_FRACTION: f64 = 0.02;

/// Luminance (0.0-1.0) below which a row counts as "dark".
const DARK_LUMINANCE_THRESHOLD: f64 = 0.35;

/// Per-page signals computed while analyzing a document.
#[derive(Debug, Clone)]
struct PageSignals {
    text_layer_chars: usize,
    header_score: f64,
    has_top_dark_band: bool,
    rasterization_failed: bool,
}

/// Analyze a file's bytes and filename, producing a [`DocumentAnalysis`].
///
/// `warnings` collects non-fatal signals (e.g. rasterization failures on
/// individual pages), mirroring the runner's "record an error signal; do not
/// abort" instruction (spec.md §4.1 Failure).
#[instrument(level = "debug", skip(bytes, ocr), fields(filename))]
pub async fn analyze(
    bytes: &[u8],
    filename: &str,
    config: &AnalyzerConfig,
    warnings: &mut Vec<String>,
    ocr: &OcrCapability,
) -> Result<DocumentAnalysis> {
    let mime_type = infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_default();

    if IMAGE_MIME_TYPES.contains(&mime_type.as_str()) {
        return Ok(DocumentAnalysis {
            format: DocFormat::ImageOnly,
            structure: Structure::Single,
            form_layout: FormLayout::Freeform,
            page_count: 1,
            chunk_ranges: vec![(0, 1)],
            doc_class: DocClass::SingleScanned,
            is_scanned_multi_submission: false,
        });
    }

    analyze_pdf(bytes, filename, config, warnings, ocr).await
}

async fn analyze_pdf(
    bytes: &[u8],
    filename: &str,
    config: &AnalyzerConfig,
    warnings: &mut Vec<String>,
    ocr: &OcrCapability,
) -> Result<DocumentAnalysis> {
    let tmpdir = tempfile::TempDir::with_prefix("analyze")?;
    let pdf_path = tmpdir.path().join("input.pdf");
    tokio::fs::write(&pdf_path, bytes).await.context("failed to write temp PDF")?;

    let page_texts = extract_page_texts(&pdf_path).await.unwrap_or_else(|err| {
        warnings.push(format!("failed to extract text layer: {err:?}"));
        Vec::new()
    });
    let page_count = page_texts.len().max(1);

    let format = classify_format(&page_texts);

    let threshold = match format {
        DocFormat::NativeText => config.header_score_threshold_native_text,
        DocFormat::ImageOnly | DocFormat::Hybrid => config.header_score_threshold_image,
    };

    let mut signals = Vec::with_capacity(page_count);
    for page_idx in 0..page_count {
        let text_layer_chars = page_texts.get(page_idx).map(|t| t.len()).unwrap_or(0);
        signals.push(PageSignals {
            text_layer_chars,
            header_score: 0.0,
            has_top_dark_band: false,
            rasterization_failed: false,
        });
    }

    // Rasterize every page once: used both for dark-band detection and, for
    // pages with no extractable text layer (image-only/hybrid), as the
    // source the header strip is scored against — the text layer is empty
    // there, so scoring it would always yield 0.0 and `structure` could
    // never become `Multi` for a genuine image-only PDF (spec.md §4.1 steps
    // 3-4: "render the top 25% strip of each page" and score it, regardless
    // of format).
    let rasters = match rasterize_pages(&pdf_path, page_count).await {
        Ok(rasters) => Some(rasters),
        Err(err) => {
            warnings.push(format!("failed to rasterize pages: {err:?}"));
            for signal in &mut signals {
                signal.rasterization_failed = true;
            }
            None
        }
    };

    for page_idx in 0..page_count {
        let Some(raster) = rasters.as_ref().and_then(|r| r.get(page_idx)) else {
            continue;
        };
        if let Some(signal) = signals.get_mut(page_idx) {
            signal.has_top_dark_band = page_has_top_dark_band(raster).unwrap_or(false);
        }
    }

    for page_idx in 0..page_count {
        if signals[page_idx].text_layer_chars > 0 {
            signals[page_idx].header_score = score_top_strip(&page_texts[page_idx]);
            continue;
        }
        let Some(raster) = rasters.as_ref().and_then(|r| r.get(page_idx)) else {
            continue;
        };
        let ocr_result = ocr.ocr_image(raster, "image/png").await;
        signals[page_idx].header_score = score_top_strip(&ocr_result.full_text);
    }

    let mut is_start: Vec<bool> = signals.iter().map(|s| s.header_score >= threshold).collect();

    // Over-chunking refinement: if every page looks like a start but
    // dark-band evidence is thinner, demote pages without a top dark band.
    if !is_start.is_empty() && is_start.iter().all(|&s| s) {
        let dark_band_count = signals.iter().filter(|s| s.has_top_dark_band).count();
        if dark_band_count < is_start.len() {
            for (idx, signal) in signals.iter().enumerate() {
                if !signal.has_top_dark_band {
                    is_start[idx] = false;
                }
            }
        }
    }

    // Periodic heuristic: if >= 6 pages and exactly one start detected,
    // probe every second page for header-likeness.
    let start_count = is_start.iter().filter(|&&s| s).count();
    if page_count >= 6 && start_count == 1 {
        for idx in (0..page_count).step_by(2) {
            if signals[idx].header_score >= threshold * 0.75 {
                is_start[idx] = true;
            }
        }
    }

    let start_count = is_start.iter().filter(|&&s| s).count();
    let structure = if start_count > 1 {
        Structure::Multi
    } else {
        Structure::Single
    };

    let chunk_ranges = build_chunk_ranges(&is_start, page_count);

    let form_layout = if signals.iter().any(|s| s.header_score >= threshold) {
        FormLayout::TypedForm
    } else {
        FormLayout::Freeform
    };

    let is_scanned_multi_submission =
        matches!(format, DocFormat::ImageOnly) && structure == Structure::Multi && chunk_ranges.len() > 1;

    let doc_class = decide_doc_class(
        format,
        structure,
        is_scanned_multi_submission,
        page_count,
        form_layout,
    );

    debug!(?format, ?structure, ?doc_class, %filename, "Document analysis complete");

    Ok(DocumentAnalysis {
        format,
        structure,
        form_layout,
        page_count,
        chunk_ranges,
        doc_class,
        is_scanned_multi_submission,
    })
}

/// spec.md §4.1 step 7: the deterministic, code-only `doc_class` decision.
fn decide_doc_class(
    format: DocFormat,
    structure: Structure,
    is_scanned_multi_submission: bool,
    page_count: usize,
    form_layout: FormLayout,
) -> DocClass {
    if is_scanned_multi_submission {
        return DocClass::BulkScannedBatch;
    }
    match (format, structure) {
        (DocFormat::NativeText, Structure::Single) => DocClass::SingleTyped,
        (DocFormat::ImageOnly, Structure::Single) => DocClass::SingleScanned,
        (_, Structure::Multi) => DocClass::MultiPageSingle,
        _ if page_count > 1 => DocClass::MultiPageSingle,
        _ if form_layout == FormLayout::Freeform => DocClass::EssayWithHeaderMetadata,
        _ => DocClass::SingleTyped,
    }
}

/// Turn a per-page "is this a submission start" vector into inclusive-
/// exclusive chunk ranges.
fn build_chunk_ranges(is_start: &[bool], page_count: usize) -> Vec<ChunkRange> {
    if page_count == 0 {
        return vec![(0, 0)];
    }
    let start_count = is_start.iter().filter(|&&s| s).count();
    if start_count <= 1 {
        return vec![(0, page_count)];
    }
    // Degenerate to one page per chunk only when every page is a start
    // (the bulk-scanned-batch case per spec.md §4.1 step 7).
    if start_count == page_count {
        return (0..page_count).map(|i| (i, i + 1)).collect();
    }
    let mut ranges = Vec::new();
    let mut current_start = 0;
    for (idx, &start) in is_start.iter().enumerate().skip(1) {
        if start {
            ranges.push((current_start, idx));
            current_start = idx;
        }
    }
    ranges.push((current_start, page_count));
    ranges
}

/// Score the top 25% (by line count) of a page's text against the bilingual
/// label bag, with substring containment standing in for OCR-tolerant
/// fuzzy matching (spec.md §4.1 step 3).
fn score_top_strip(page_text: &str) -> f64 {
    let lines: Vec<&str> = page_text.lines().collect();
    if lines.is_empty() {
        return 0.0;
    }
    let strip_len = ((lines.len() as f64) * 0.25).ceil().max(1.0) as usize;
    let strip = lines[..strip_len.min(lines.len())].join("\n").to_lowercase();

    let hits = LABEL_BAG.iter().filter(|label| strip.contains(*label)).count();
    hits as f64 / LABEL_BAG.len() as f64
}

/// Extract per-page text using `pdftotext -layout`, splitting on the form-feed
/// character poppler inserts between pages.
async fn extract_page_texts(pdf_path: &Path) -> Result<Vec<String>> {
    let text = with_cpu_semaphore(|| async {
        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg(pdf_path)
            .arg("-")
            .stdout(Stdio::piped())
            .output()
            .await
            .context("failed to run pdftotext")?;
        check_for_command_failure("pdftotext", output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    })
    .await?;
    Ok(text.split('\u{c}').map(str::to_owned).collect())
}

/// Classify `format` from the per-page extractable character counts
/// (spec.md §4.1 step 2).
fn classify_format(page_texts: &[String]) -> DocFormat {
    if page_texts.is_empty() {
        return DocFormat::ImageOnly;
    }
    let counts: Vec<usize> = page_texts.iter().map(|t| t.trim().len()).collect();
    if counts.iter().all(|&c| c > 0) {
        DocFormat::NativeText
    } else if counts.iter().all(|&c| c == 0) {
        DocFormat::ImageOnly
    } else {
        DocFormat::Hybrid
    }
}

/// Rasterize every page of the PDF to PNG bytes, in page order. Used both
/// for dark-band detection (spec.md §4.1 step 4) and, for pages with no
/// extractable text layer, as the OCR input for header-strip scoring
/// (spec.md §4.1 step 3).
async fn rasterize_pages(pdf_path: &Path, page_count: usize) -> Result<Vec<Vec<u8>>> {
    let options = PageIterOptions {
        rasterize: true,
        rasterize_dpi: 100,
    };
    let page_iter = PageIter::from_path(pdf_path, &options, None).await?;
    let mut pages = vec![Vec::new(); page_count];
    for (idx, page) in page_iter.enumerate() {
        let page = page?;
        if idx >= pages.len() {
            break;
        }
        pages[idx] = page.data;
    }
    Ok(pages)
}

/// Decode a rasterized page and check for a dark band in its top 15%.
fn page_has_top_dark_band(png_bytes: &[u8]) -> Result<bool> {
    let image = image::load_from_memory(png_bytes).context("failed to decode rasterized page")?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(false);
    }
    let top_boundary = (height as f64 * 0.15).round() as u32;
    let min_band_height = ((height as f64) * DARK_BAND_MIN_HEIGHT_FRACTION).round().max(1.0) as u32;

    let mut run_length = 0u32;
    for y in 0..height {
        let mean_luminance = row_mean_luminance(&image, y, width);
        if mean_luminance < DARK_LUMINANCE_THRESHOLD {
            run_length += 1;
            if run_length >= min_band_height && y.saturating_sub(run_length) < top_boundary {
                return Ok(true);
            }
        } else {
            run_length = 0;
        }
    }
    Ok(false)
}

fn row_mean_luminance(image: &image::DynamicImage, y: u32, width: u32) -> f64 {
    let mut total = 0.0;
    for x in 0..width {
        let pixel = image.get_pixel(x, y).to_luma();
        total += pixel.0[0] as f64 / 255.0;
    }
    total / width as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_format_detects_native_text() {
        let pages = vec!["hello".to_string(), "world".to_string()];
        assert_eq!(classify_format(&pages), DocFormat::NativeText);
    }

    #[test]
    fn classify_format_detects_image_only() {
        let pages = vec![String::new(), String::new()];
        assert_eq!(classify_format(&pages), DocFormat::ImageOnly);
    }

    #[test]
    fn classify_format_detects_hybrid() {
        let pages = vec!["hello".to_string(), String::new()];
        assert_eq!(classify_format(&pages), DocFormat::Hybrid);
    }

    #[test]
    fn score_top_strip_finds_bilingual_labels() {
        let text = "Student's Name: Jordan\nGrade / Grado: 8\nSchool / Escuela: Lincoln\n\nEssay body...";
        assert!(score_top_strip(text) > 0.15);
    }

    #[test]
    fn score_top_strip_is_zero_for_plain_prose() {
        let text = "Once upon a time there was a narrative with no labels at all.";
        assert_eq!(score_top_strip(text), 0.0);
    }

    #[test]
    fn build_chunk_ranges_handles_single_submission() {
        let is_start = vec![true, false, false];
        assert_eq!(build_chunk_ranges(&is_start, 3), vec![(0, 3)]);
    }

    #[test]
    fn build_chunk_ranges_degenerates_per_page_when_all_start() {
        let is_start = vec![true, true, true];
        assert_eq!(build_chunk_ranges(&is_start, 3), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn build_chunk_ranges_groups_multi_page_submissions() {
        let is_start = vec![true, false, true, false, false];
        assert_eq!(build_chunk_ranges(&is_start, 5), vec![(0, 2), (2, 5)]);
    }

    #[test]
    fn decide_doc_class_picks_bulk_batch_when_scanned_multi() {
        let class = decide_doc_class(
            DocFormat::ImageOnly,
            Structure::Multi,
            true,
            5,
            FormLayout::TypedForm,
        );
        assert_eq!(class, DocClass::BulkScannedBatch);
    }

    #[test]
    fn decide_doc_class_picks_single_typed() {
        let class = decide_doc_class(
            DocFormat::NativeText,
            Structure::Single,
            false,
            1,
            FormLayout::TypedForm,
        );
        assert_eq!(class, DocClass::SingleTyped);
    }
}
