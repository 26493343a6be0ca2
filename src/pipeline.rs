//! Pipeline Runner (spec.md §4.9).
//!
//! Runs one submission's file bytes through the full stage sequence —
//! ingest, analyze, an optional split/recurse, OCR, segment, extract,
//! classify, validate — and persists the result. `with_stage` is a plain
//! combinator function, not a macro (spec.md §9's "prefer functions over
//! macros for control flow" redesign note, already the teacher's style in
//! `page_iter.rs`/`llm.rs`): it appends a [`Signal`] and emits the stage's
//! [`AuditEvent`] on success, or an `ERROR` event on failure, then lets the
//! caller decide whether the failure degrades locally or aborts the run
//! (spec.md §7, [`ErrorKind::is_degraded_locally`]/[`ErrorKind::
//! is_terminal_for_submission`]).

use std::{future::Future, path::Path, pin::Pin, sync::Arc};

use chrono::Utc;

use crate::{
    analyzer, classifier,
    config::Config,
    errors::{ErrorKind, StageError},
    extractor::{self, ExtractionOutcome, llm_cache::LlmResponseCache},
    ids::{OwnerId, SubmissionId, UploadBatchId},
    llm::LlmCapability,
    model::{
        ActorRole, AuditEvent, AuditTrace, DocClass, DocFormat, EventType, ExtractedFields, OcrResult, ReasonCodeSet,
        Signal, Status, SubmissionRecord, TraceOutcome,
    },
    object_store::{ObjectStore, original_key},
    ocr::OcrCapability,
    page_iter::PageIterOptions,
    prelude::*,
    segmenter::{self, Segments},
    splitter,
    textlayer,
    validator,
};

/// Everything the runner needs about one file to process (spec.md §4.9
/// input: `{file_bytes, filename, owner_id, access_token, submission_id}`).
/// `access_token` is spent by the (out-of-scope) HTTP layer to authorize
/// `owner_id` before the job is ever enqueued; the runner trusts it as
/// given and never re-checks it.
#[derive(Clone, Debug)]
pub struct PipelineInput {
    pub file_bytes: Vec<u8>,
    pub filename: String,
    pub owner_id: OwnerId,
    pub submission_id: SubmissionId,
    pub upload_batch_id: Option<UploadBatchId>,
    pub parent_submission_id: Option<SubmissionId>,
    pub child_index: Option<u32>,
    pub multi_entry_source: Option<bool>,
}

/// The outcome of one top-level call to [`PipelineRunner::run`]. For a split
/// parent, `record` is `None` — spec.md §4.9 step 3: "the parent record is a
/// container and is NOT saved as a reviewable submission" — and
/// `child_submission_ids` lists every child produced.
#[derive(Debug)]
pub struct PipelineOutput {
    pub record: Option<SubmissionRecord>,
    pub trace: AuditTrace,
    pub child_submission_ids: Vec<String>,
    /// Set when the audit trace or one of its events failed to persist even
    /// after a retry. The submission record itself is unaffected — spec.md
    /// §7: "a persistent audit failure does not roll back the record write"
    /// — but the caller (the worker) should still surface the job as
    /// failed on this alone.
    pub audit_error: Option<String>,
}

/// The shared capabilities one pipeline run is built from. One instance is
/// constructed per worker process and shared across every job it claims.
pub struct PipelineRunner {
    pub object_store: Arc<dyn ObjectStore>,
    pub ocr: OcrCapability,
    pub llm: LlmCapability,
    pub llm_cache: LlmResponseCache,
    pub submissions: Arc<dyn crate::repository::SubmissionRepository>,
    pub audit: Arc<dyn crate::audit::AuditRepository>,
    pub config: Config,
}

impl PipelineRunner {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        ocr: OcrCapability,
        llm: LlmCapability,
        submissions: Arc<dyn crate::repository::SubmissionRepository>,
        audit: Arc<dyn crate::audit::AuditRepository>,
        config: Config,
    ) -> Self {
        Self {
            object_store,
            ocr,
            llm,
            llm_cache: LlmResponseCache::new(),
            submissions,
            audit,
            config,
        }
    }

    /// Run the full pipeline over `input` (spec.md §4.9).
    pub async fn run(&self, input: PipelineInput) -> Result<PipelineOutput> {
        self.run_inner(input).await
    }

    fn run_inner(&self, input: PipelineInput) -> Pin<Box<dyn Future<Output = Result<PipelineOutput>> + Send + '_>> {
        Box::pin(async move { self.run_one(input).await })
    }

    #[instrument(level = "info", skip(self, input), fields(submission_id = %input.submission_id))]
    async fn run_one(&self, input: PipelineInput) -> Result<PipelineOutput> {
        let mut trace = TraceBuilder::new(&input);

        let ext = extension_for(&input.filename);
        let storage_key = original_key(&input.owner_id.0, input.submission_id.as_str(), &ext);

        let object_store = self.object_store.clone();
        let put_bytes = input.file_bytes.clone();
        let put_key = storage_key.clone();
        let ingest = with_stage(
            &mut trace,
            "INGESTED",
            Some(EventType::Ingested),
            || async move {
                object_store
                    .put(&put_key, &put_bytes)
                    .await
                    .map_err(|e| StageError::with_source(ErrorKind::StorageError, "failed to store original bytes", e))
            },
            || (),
        )
        .await;
        if matches!(ingest, StageOutcome::Abort) {
            return self.finalize_failed(&input, trace, storage_key).await;
        }

        let mut warnings = Vec::new();
        let analyzer_config = self.config.analyzer.clone();
        let analysis = {
            let bytes = &input.file_bytes;
            let filename = &input.filename;
            let ocr = &self.ocr;
            let outcome = with_stage(
                &mut trace,
                "ANALYZED",
                None,
                || async {
                    analyzer::analyze(bytes, filename, &analyzer_config, &mut warnings, ocr)
                        .await
                        .map_err(|e| StageError::with_source(ErrorKind::AnalysisError, "document analysis failed", e))
                },
                || unreachable!("AnalysisError is always terminal; there is no degraded analysis"),
            )
            .await;
            match outcome {
                StageOutcome::Ok(analysis) => analysis,
                StageOutcome::Degraded(_) => unreachable!(),
                StageOutcome::Abort => return self.finalize_failed(&input, trace, storage_key).await,
            }
        };
        for warning in &warnings {
            trace.signal("ANALYZED", format!("warning: {warning}"));
        }

        if splitter::should_split(&analysis) {
            return self.run_split(input, trace, storage_key, analysis).await;
        }

        // OCR_COMPLETE
        let ocr_result = match self.run_ocr_stage(&mut trace, &input, &analysis).await {
            StageOutcome::Ok(result) | StageOutcome::Degraded(result) => result,
            StageOutcome::Abort => return self.finalize_failed(&input, trace, storage_key).await,
        };

        // SEGMENTED (pure; cannot fail)
        let segments = segmenter::segment(&ocr_result.full_text, analysis.doc_class);
        trace.signal(
            "SEGMENTED",
            if segments.anchor_found { "anchor_found" } else { "fallback_contact_lines" },
        );

        // EXTRACTION_COMPLETE
        let extraction_outcome = match self.run_extraction_stage(&mut trace, analysis.form_layout, &segments, &ocr_result.full_text).await {
            StageOutcome::Ok(outcome) | StageOutcome::Degraded(outcome) => outcome,
            StageOutcome::Abort => unreachable!("ExtractionError is never terminal"),
        };

        // CLASSIFIED (pure; cannot fail)
        let classification = classifier::classify(&analysis, extraction_outcome.llm_doc_type.as_deref());
        trace.signal("CLASSIFIED", format!("{:?}", classification.doc_class));
        if let Some(divergence) = &classification.llm_divergence {
            trace.signal("classifier_llm_divergence", divergence.clone());
        }

        // VALIDATION_COMPLETE
        let best_essay = validator::select_best_essay_text(
            extraction_outcome.fields.essay_text.as_deref(),
            Some(segments.essay_block.as_str()),
            Some(ocr_result.full_text.as_str()),
        );
        trace.signal(
            "VALIDATION_COMPLETE",
            format!("essay_source={} word_count={}", best_essay.source, best_essay.word_count),
        );
        let required = validator::required_fields(classification.doc_class, &self.config.validation);
        let thresholds = validator::ValidationThresholds {
            low_confidence_threshold: self.config.ocr.low_confidence_threshold,
            escalation_threshold: self.config.ocr.escalation_threshold,
        };
        let validation_inputs = validator::ValidationInputs {
            fields: &extraction_outcome.fields,
            word_count: best_essay.word_count,
            ocr_failed: ocr_result.ocr_failed,
            ocr_confidence_avg: ocr_result.confidence_avg,
            is_template_only: extraction_outcome.is_template_only,
        };
        let validation_outcome = validator::validate(classification.doc_class, validation_inputs, required, thresholds);
        for code in validation_outcome.reason_codes.iter() {
            trace.signal("review_reason_code", code.to_string());
        }
        trace.event(EventType::ValidationComplete, json!({"needs_review": validation_outcome.needs_review}));

        // SAVED
        let mut fields = extraction_outcome.fields;
        fields.essay_text = best_essay.text;
        let now = Utc::now();
        let record = SubmissionRecord {
            submission_id: input.submission_id.clone(),
            owner_id: input.owner_id.clone(),
            upload_batch_id: input.upload_batch_id.clone(),
            parent_submission_id: input.parent_submission_id.clone(),
            child_index: input.child_index,
            multi_entry_source: input.multi_entry_source,
            filename: input.filename.clone(),
            doc_class: classification.doc_class,
            doc_format: analysis.format,
            extracted_fields: fields,
            word_count: best_essay.word_count,
            ocr_confidence_avg: ocr_result.confidence_avg,
            ocr_failed: ocr_result.ocr_failed,
            needs_review: validation_outcome.needs_review,
            status: Status::PendingReview,
            review_reason_codes: validation_outcome.reason_codes,
            storage_path: storage_key.clone(),
            created_at: now,
            updated_at: now,
        };

        let submissions = self.submissions.clone();
        let record_for_save = record.clone();
        let save_outcome = with_stage(
            &mut trace,
            "SAVED",
            Some(EventType::Saved),
            || async move {
                submissions
                    .upsert(&record_for_save)
                    .await
                    .map_err(|e| StageError::with_source(ErrorKind::RecordError, "failed to persist submission record", e))
            },
            || (),
        )
        .await;
        if matches!(save_outcome, StageOutcome::Abort) {
            return self.finalize_failed(&input, trace, storage_key).await;
        }

        let (trace_final, events) = trace.finish(TraceOutcome::Saved);
        let audit_error = self.write_audit(&trace_final, &events).await;
        Ok(PipelineOutput {
            record: Some(record),
            trace: trace_final,
            child_submission_ids: Vec::new(),
            audit_error,
        })
    }

    /// SPLIT? (spec.md §4.9 step 3, §4.8): hand off to the splitter and
    /// recurse once per child as an independent pipeline run. The parent's
    /// own trace records the split decision but its record is never saved.
    async fn run_split(
        &self,
        input: PipelineInput,
        mut trace: TraceBuilder,
        storage_key: String,
        analysis: crate::model::DocumentAnalysis,
    ) -> Result<PipelineOutput> {
        trace.signal("SPLIT", "multi-entry or bulk-scanned batch detected");
        trace.event(EventType::Escalated, json!({"reason": "split_into_children"}));

        let children = match splitter::split(&input.file_bytes, &analysis, &input.submission_id).await {
            Ok(children) => children,
            Err(err) => {
                trace.signal("SPLIT", format!("error: {err}"));
                trace.error(format!("SPLIT: {err}"));
                trace.event(EventType::Error, json!({"stage": "SPLIT", "message": err.to_string()}));
                return self.finalize_failed(&input, trace, storage_key).await;
            }
        };

        // Only a genuine multi-entry PDF split produces children that are
        // each "one entry out of several sharing a file"; a bulk-scanned
        // batch's per-page children are just separately-scanned submissions,
        // not multiple entries sharing one upload.
        let multi_entry_source = analysis.doc_class != DocClass::BulkScannedBatch;

        let mut child_ids = Vec::new();
        for child in children {
            let child_input = PipelineInput {
                file_bytes: child.bytes,
                filename: input.filename.clone(),
                owner_id: input.owner_id.clone(),
                submission_id: child.child_id.clone(),
                upload_batch_id: input.upload_batch_id.clone(),
                parent_submission_id: Some(input.submission_id.clone()),
                child_index: Some(child_ids.len() as u32),
                multi_entry_source: Some(multi_entry_source),
            };
            // Each child persists and audits its own outcome; only the ID
            // is carried back up to the parent's outcome.
            self.run_inner(child_input).await?;
            child_ids.push(child.child_id.as_str().to_string());
        }

        let (trace_final, events) = trace.finish(TraceOutcome::Saved);
        let audit_error = self.write_audit(&trace_final, &events).await;
        Ok(PipelineOutput {
            record: None,
            trace: trace_final,
            child_submission_ids: child_ids,
            audit_error,
        })
    }

    /// OCR_COMPLETE (spec.md §4.9 step 4): native-text documents go through
    /// the Text-Layer Reader; everything else goes through the OCR
    /// Capability, either as a single image or as a page range.
    async fn run_ocr_stage(
        &self,
        trace: &mut TraceBuilder,
        input: &PipelineInput,
        analysis: &crate::model::DocumentAnalysis,
    ) -> StageOutcome<OcrResult> {
        let bytes = input.file_bytes.clone();
        let format = analysis.format;
        let page_count = analysis.page_count;
        let ocr = &self.ocr;
        with_stage(
            trace,
            "OCR_COMPLETE",
            Some(EventType::OcrComplete),
            || async move {
                if format == DocFormat::NativeText {
                    textlayer::read_text_layer(&bytes)
                        .await
                        .map_err(|e| StageError::with_source(ErrorKind::OcrError, "text layer extraction failed", e))
                } else if is_plain_image(&bytes) {
                    let mime = infer::get(&bytes)
                        .map(|t| t.mime_type().to_string())
                        .unwrap_or_else(|| "application/octet-stream".to_string());
                    Ok(ocr.ocr_image(&bytes, &mime).await)
                } else {
                    let opts = PageIterOptions { rasterize: true, rasterize_dpi: 300 };
                    ocr.ocr_pdf_pages(&bytes, (0, page_count), &opts)
                        .await
                        .map_err(|e| StageError::with_source(ErrorKind::OcrError, "OCR failed", e))
                }
            },
            OcrResult::failed,
        )
        .await
    }

    /// EXTRACTION_COMPLETE (spec.md §4.9 step 6). Folds the extractor's own
    /// signals/rules into the trace before returning.
    async fn run_extraction_stage(
        &self,
        trace: &mut TraceBuilder,
        form_layout: crate::model::FormLayout,
        segments: &Segments,
        ocr_text: &str,
    ) -> StageOutcome<ExtractionOutcome> {
        let llm = &self.llm;
        let cache = &self.llm_cache;
        let contact_block = segments.contact_block.clone();
        let essay_block = segments.essay_block.clone();
        let ocr_text = ocr_text.to_string();
        let degrade_contact_block = contact_block.clone();
        let degrade_essay_block = essay_block.clone();
        let outcome = with_stage(
            trace,
            "EXTRACTION_COMPLETE",
            Some(EventType::ExtractionComplete),
            || async move {
                extractor::extract(form_layout, &contact_block, &essay_block, &ocr_text, llm, cache)
                    .await
                    .map_err(|e| StageError::with_source(ErrorKind::ExtractionError, "extraction failed", e))
            },
            move || degraded_extraction_outcome(&degrade_contact_block, &degrade_essay_block),
        )
        .await;

        if let StageOutcome::Ok(ref o) | StageOutcome::Degraded(ref o) = outcome {
            for signal in &o.signals {
                trace.signal(&signal.name, signal.detail.clone());
            }
            for rule in &o.rules_applied {
                trace.rule(rule.clone());
            }
            if o.served_from_cache {
                trace.event(EventType::CachedLlmResult, json!({}));
            }
        }
        outcome
    }

    /// Persist a best-effort `FAILED` record and the trace after an aborted
    /// run (spec.md §7: "the runner ... sets `status=FAILED` on the record
    /// and still persists it"). Called whenever a stage's `ErrorKind` is
    /// terminal for the submission.
    async fn finalize_failed(&self, input: &PipelineInput, mut trace: TraceBuilder, storage_key: String) -> Result<PipelineOutput> {
        let now = Utc::now();
        let record = SubmissionRecord {
            submission_id: input.submission_id.clone(),
            owner_id: input.owner_id.clone(),
            upload_batch_id: input.upload_batch_id.clone(),
            parent_submission_id: input.parent_submission_id.clone(),
            child_index: input.child_index,
            multi_entry_source: input.multi_entry_source,
            filename: input.filename.clone(),
            doc_class: DocClass::SingleScanned,
            doc_format: DocFormat::ImageOnly,
            extracted_fields: ExtractedFields::default(),
            word_count: 0,
            ocr_confidence_avg: 0.0,
            ocr_failed: true,
            needs_review: true,
            status: Status::Failed,
            review_reason_codes: ReasonCodeSet::new(),
            storage_path: storage_key,
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = self.submissions.upsert(&record).await {
            trace.error(format!("failed to persist FAILED record: {err}"));
        }
        let (trace_final, events) = trace.finish(TraceOutcome::Failed);
        let audit_error = self.write_audit(&trace_final, &events).await;
        Ok(PipelineOutput {
            record: Some(record),
            trace: trace_final,
            child_submission_ids: Vec::new(),
            audit_error,
        })
    }

    /// Write a finished trace and its queued events, retrying each once
    /// (spec.md §4.11). Returns a human-readable error summary on persistent
    /// failure rather than propagating, so the record write already
    /// committed is never rolled back by an audit-store hiccup.
    async fn write_audit(&self, trace: &AuditTrace, events: &[AuditEvent]) -> Option<String> {
        if let Err(err) = crate::audit::write_trace_with_retry(self.audit.as_ref(), trace).await {
            return Some(format!("failed to write audit trace: {err}"));
        }
        for event in events {
            if let Err(err) = crate::audit::append_event_with_retry(self.audit.as_ref(), event).await {
                return Some(format!("failed to append audit event: {err}"));
            }
        }
        None
    }
}

/// The outcome of one `with_stage` call: success, a locally-degraded
/// fallback value, or an abort that the caller must finalize as `FAILED`.
enum StageOutcome<T> {
    Ok(T),
    Degraded(T),
    Abort,
}

/// Run one stage, bookkeeping its signal/event, and classify any failure as
/// degrade-locally or abort-the-run per [`ErrorKind`] (spec.md §7).
async fn with_stage<T, Fut>(
    trace: &mut TraceBuilder,
    name: &str,
    event_type: Option<EventType>,
    stage_fn: impl FnOnce() -> Fut,
    degrade_default: impl FnOnce() -> T,
) -> StageOutcome<T>
where
    Fut: Future<Output = Result<T, StageError>>,
{
    match stage_fn().await {
        Ok(value) => {
            trace.signal(name, "ok");
            if let Some(event_type) = event_type {
                trace.event(event_type, json!({}));
            }
            StageOutcome::Ok(value)
        }
        Err(err) => {
            trace.signal(name, format!("error: {}", err.message));
            trace.error(format!("{name}: {}", err.message));
            trace.event(EventType::Error, json!({"stage": name, "kind": err.kind.to_string(), "message": err.message}));
            if err.kind.is_terminal_for_submission() {
                StageOutcome::Abort
            } else {
                StageOutcome::Degraded(degrade_default())
            }
        }
    }
}

/// The degrade-default for `ErrorKind::ExtractionError` (spec.md §7:
/// "`extraction_error` is degraded: LLM failure falls back to rule-based
/// extraction; the trace records the fallback."). Runs the same positional
/// extractor the typed-form path uses, over whatever contact/essay blocks
/// the Segmenter already produced, rather than fabricating a blank
/// `TEMPLATE_ONLY` record — a genuinely blank template and an LLM outage are
/// different failure modes and must not collapse into the same reason code.
fn degraded_extraction_outcome(contact_block: &str, essay_block: &str) -> ExtractionOutcome {
    let mut outcome = extractor::extract_typed(contact_block, essay_block);
    outcome
        .signals
        .push(Signal::new("extraction_degraded", "LLM extraction failed; fell back to rule-based positional extraction"));
    outcome.rules_applied.push("extraction_error_fallback_to_typed".to_string());
    outcome
}

/// Accumulates one run's trace as stages execute, then hands back the
/// finished [`AuditTrace`] plus the [`AuditEvent`]s queued along the way.
struct TraceBuilder {
    submission_id: SubmissionId,
    owner_id: OwnerId,
    input_fingerprint: String,
    signals: Vec<Signal>,
    rules_applied: Vec<String>,
    errors: Vec<String>,
    events: Vec<AuditEvent>,
}

impl TraceBuilder {
    fn new(input: &PipelineInput) -> Self {
        Self {
            submission_id: input.submission_id.clone(),
            owner_id: input.owner_id.clone(),
            input_fingerprint: input.submission_id.as_str().to_string(),
            signals: Vec::new(),
            rules_applied: Vec::new(),
            errors: Vec::new(),
            events: Vec::new(),
        }
    }

    fn signal(&mut self, name: &str, detail: impl Into<String>) {
        self.signals.push(Signal::new(name, detail));
    }

    fn rule(&mut self, rule: impl Into<String>) {
        self.rules_applied.push(rule.into());
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn event(&mut self, event_type: EventType, payload: Value) {
        self.events.push(AuditEvent {
            submission_id: self.submission_id.clone(),
            actor_role: ActorRole::Worker,
            event_type,
            payload,
            created_at: Utc::now(),
        });
    }

    fn finish(self, outcome: TraceOutcome) -> (AuditTrace, Vec<AuditEvent>) {
        let trace = AuditTrace {
            submission_id: self.submission_id,
            owner_id: self.owner_id,
            input_fingerprint: self.input_fingerprint,
            signals: self.signals,
            rules_applied: self.rules_applied,
            outcome,
            errors: self.errors,
            created_at: Utc::now(),
        };
        (trace, self.events)
    }
}

fn extension_for(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("bin")
        .to_string()
}

fn is_plain_image(bytes: &[u8]) -> bool {
    infer::get(bytes).map(|t| t.mime_type().starts_with("image/")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audit::InMemoryAuditRepository, ids::OwnerId, object_store::InMemoryObjectStore, ocr::engines::stub::StubOcrEngine,
        repository::InMemorySubmissionRepository,
    };

    fn runner() -> PipelineRunner {
        PipelineRunner::new(
            Arc::new(InMemoryObjectStore::default()),
            OcrCapability::new(Arc::new(StubOcrEngine)),
            LlmCapability::new("gpt-4o-mini".to_string()),
            Arc::new(InMemorySubmissionRepository::default()),
            Arc::new(InMemoryAuditRepository::default()),
            Config::default(),
        )
    }

    fn sample_typed_form_pdf_text() -> &'static str {
        "Student's Name: Jordan Altman\nSchool: Lincoln Middle School\nGrade: 8\n\
         What my father means to me\nMy father taught me patience and kindness every single day of my life."
    }

    fn input(bytes: Vec<u8>, filename: &str) -> PipelineInput {
        PipelineInput {
            submission_id: SubmissionId::from_bytes(&bytes),
            file_bytes: bytes,
            filename: filename.to_string(),
            owner_id: OwnerId("owner-1".to_string()),
            upload_batch_id: None,
            parent_submission_id: None,
            child_index: None,
            multi_entry_source: None,
        }
    }

    #[tokio::test]
    async fn an_unrecognized_image_still_produces_a_persisted_record() {
        let runner = runner();
        let bytes = sample_typed_form_pdf_text().as_bytes().to_vec();
        let output = runner.run(input(bytes, "essay.txt")).await.unwrap();
        let record = output.record.expect("a non-split run always saves a record");
        assert!(output.audit_error.is_none());
        assert_eq!(record.status, Status::PendingReview);
    }

    #[tokio::test]
    async fn trace_records_every_stage_signal() {
        let runner = runner();
        let bytes = sample_typed_form_pdf_text().as_bytes().to_vec();
        let output = runner.run(input(bytes, "essay.txt")).await.unwrap();
        let names: Vec<_> = output.trace.signals.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"INGESTED"));
        assert!(names.contains(&"SEGMENTED"));
        assert!(names.contains(&"VALIDATION_COMPLETE"));
    }
}
