//! Text-Layer Reader (spec.md §4.3).
//!
//! For native-text PDFs, extracts the embedded text in reading order and
//! merges any AcroForm field values into the page-0 text. Grounded in the
//! teacher's `pdftotext`/`pdftk`-shelling style (`page_iter.rs`'s
//! `from_split_pdf`/`from_rasterized_pdf`) — this module follows the same
//! "shell out to poppler/pdftk, check the exit status, read the temp file"
//! pattern for a different leaf command.

use std::process::Stdio;

use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, model::{OcrLine, OcrResult}, prelude::*};

/// Read the embedded text layer of a native-text PDF, merging AcroForm field
/// values into the page-0 text (spec.md §4.3).
///
/// Always returns `confidence_avg=1.0`, `ocr_failed=false`: the runner
/// prefers this over OCR whenever `format=native_text`.
#[instrument(level = "debug", skip(pdf_bytes))]
pub async fn read_text_layer(pdf_bytes: &[u8]) -> Result<OcrResult> {
    let tmpdir = tempfile::TempDir::with_prefix("textlayer")?;
    let pdf_path = tmpdir.path().join("input.pdf");
    tokio::fs::write(&pdf_path, pdf_bytes)
        .await
        .context("failed to write temp PDF")?;

    let mut pages = extract_pages(&pdf_path).await?;
    let form_fields = extract_form_fields(&pdf_path).await.unwrap_or_default();

    if !form_fields.is_empty() {
        let merged = form_fields
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(first_page) = pages.first_mut() {
            first_page.push_str("\n\n");
            first_page.push_str(&merged);
        } else {
            pages.push(merged);
        }
    }

    let full_text = pages.join("\n\n");
    let lines = full_text
        .lines()
        .map(|line| OcrLine {
            text: line.to_owned(),
            confidence: 1.0,
        })
        .collect();

    Ok(OcrResult {
        full_text,
        lines,
        confidence_avg: 1.0,
        ocr_failed: false,
        per_page_confidence: vec![1.0; pages.len().max(1)],
    })
}

/// Extract per-page text in reading order, using `pdftotext -layout`.
async fn extract_pages(pdf_path: &Path) -> Result<Vec<String>> {
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
    Ok(text
        .split('\u{c}')
        .map(str::to_owned)
        .filter(|p| !p.trim().is_empty())
        .collect())
}

/// Extract AcroForm field name/value pairs via `pdftk dump_data_fields`.
async fn extract_form_fields(pdf_path: &Path) -> Result<Vec<(String, String)>> {
    let text = with_cpu_semaphore(|| async {
        let output = Command::new("pdftk")
            .arg(pdf_path)
            .arg("dump_data_fields")
            .stdout(Stdio::piped())
            .output()
            .await
            .context("failed to run pdftk")?;
        check_for_command_failure("pdftk", output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    })
    .await?;

    let mut fields = Vec::new();
    let mut current_name: Option<String> = None;
    for line in text.lines() {
        if let Some(name) = line.strip_prefix("FieldName: ") {
            current_name = Some(name.to_owned());
        } else if let Some(value) = line.strip_prefix("FieldValue: ")
            && let Some(name) = current_name.take()
            && !value.trim().is_empty()
        {
            fields.push((name, value.to_owned()));
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn form_field_parsing_pairs_name_and_value_lines() {
        let dump = "---\n\
             FieldType: Text\n\
             FieldName: student_name\n\
             FieldValue: Jordan Altman\n\
             ---\n\
             FieldType: Text\n\
             FieldName: empty_field\n\
             ---\n";
        let mut current_name: Option<String> = None;
        let mut fields = Vec::new();
        for line in dump.lines() {
            if let Some(name) = line.strip_prefix("FieldName: ") {
                current_name = Some(name.to_owned());
            } else if let Some(value) = line.strip_prefix("FieldValue: ")
                && let Some(name) = current_name.take()
                && !value.trim().is_empty()
            {
                fields.push((name, value.to_owned()));
            }
        }
        assert_eq!(fields, vec![("student_name".to_string(), "Jordan Altman".to_string())]);
    }
}
