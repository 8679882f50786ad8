//! Accepts uploads, dispatches extraction and applies service callbacks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{info_span, Instrument};

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::extraction::{DispatchReceipt, ExtractionRequest, ExtractionService, ServiceMessage};
use crate::model::{
    CancelEffect, ErrorDetail, ImportJob, RecordPolicy, SectionReport,
    SourceFileMeta, StageUpdate, UpdateOutcome,
};
use crate::sanitize;
use crate::store::JobStore;

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// A document as received from the uploader.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: String,
    /// Declared media type; guessed from the filename when absent.
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(filename: &str, media_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            media_type: media_type.map(|m| m.to_string()),
            bytes,
        }
    }

    /// Declared media type if present, otherwise a guess from the extension.
    pub fn resolved_media_type(&self) -> String {
        match self.media_type.as_deref().map(str::trim) {
            Some(declared) if !declared.is_empty() => declared.to_ascii_lowercase(),
            _ => mime_guess::from_path(&self.filename)
                .first_raw()
                .unwrap_or(FALLBACK_MEDIA_TYPE)
                .to_string(),
        }
    }
}

/// Owns every processing-side mutation of import jobs.
///
/// Cloning is cheap; clones share the store, the service and the dispatch
/// permits. `submit` and `cancel` spawn onto the current Tokio runtime.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<JobStore>,
    service: Arc<dyn ExtractionService>,
    config: Arc<ImportConfig>,
    dispatch_permits: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(
        store: Arc<JobStore>,
        service: Arc<dyn ExtractionService>,
        config: Arc<ImportConfig>,
    ) -> Self {
        let permits = config.extraction.max_concurrent_dispatches.max(1);
        Self {
            store,
            service,
            config,
            dispatch_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    fn policy(&self) -> RecordPolicy {
        RecordPolicy {
            min_confidence: self.config.classification.min_confidence,
            event_cap: self.config.progress.recent_events,
        }
    }

    fn validate(
        &self,
        document: &UploadedDocument,
        target_document_id: &str,
    ) -> Result<String, ImportError> {
        if target_document_id.trim().is_empty() {
            return Err(ImportError::MissingTargetDocument);
        }
        if document.bytes.is_empty() {
            return Err(ImportError::EmptyDocument);
        }
        let size = document.bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(ImportError::DocumentTooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }
        let media_type = document.resolved_media_type();
        if !self.config.accepts_media_type(&media_type) {
            return Err(ImportError::UnsupportedMediaType { media_type });
        }
        Ok(media_type)
    }

    /// Validates an upload, creates its job and dispatches it in the background.
    ///
    /// Returns the new job id as soon as the job is stored.
    pub fn submit(
        &self,
        document: UploadedDocument,
        target_document_id: &str,
    ) -> Result<String, ImportError> {
        let media_type = self.validate(&document, target_document_id)?;
        let filename = sanitize::redact_filename(&document.filename);

        let job = ImportJob::new(
            target_document_id,
            SourceFileMeta {
                filename: filename.clone(),
                byte_size: document.bytes.len() as u64,
                media_type: media_type.clone(),
            },
        );
        let job_id = job.id.clone();
        let runtime = Self::runtime()?;
        self.store.insert_new(job)?;

        log::info!(
            "Created import job {} for target '{}' ({}, {} bytes)",
            job_id,
            target_document_id.trim(),
            media_type,
            document.bytes.len()
        );

        let request = ExtractionRequest {
            job_id: job_id.clone(),
            filename,
            media_type,
            content: document.bytes,
            callback_url: self.config.extraction.callback_url.clone(),
        };

        let span = info_span!("dispatch",
            job_id = %job_id,
            filename = %request.filename,
        );
        let manager = self.clone();
        runtime.spawn(async move { manager.dispatch(request).await }.instrument(span));

        Ok(job_id)
    }

    fn runtime() -> Result<Handle, ImportError> {
        Handle::try_current().map_err(|_| ImportError::RuntimeUnavailable)
    }

    async fn dispatch(&self, request: ExtractionRequest) {
        let _permit = match Arc::clone(&self.dispatch_permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                log::warn!("Dispatch permits closed, job {} not sent", request.job_id);
                return;
            }
        };

        let job_id = request.job_id.clone();
        match self.store.with_job(&job_id, |job| job.state) {
            Ok(state) if state.accepts_results() => {}
            Ok(state) => {
                log::info!("Job {} is {} before dispatch, not sending", job_id, state);
                return;
            }
            Err(e) => {
                log::warn!("Dispatch of job {} skipped: {}", job_id, e);
                return;
            }
        }

        match self.service.submit(request).await {
            Ok(receipt) => self.record_dispatch(&job_id, receipt),
            Err(e) => {
                let err = ImportError::from(e);
                log::error!("Dispatch of job {} failed: {}", job_id, err);
                if let Err(e) = self.on_failure(
                    &job_id,
                    ErrorDetail::new(ErrorDetail::DISPATCH_FAILED, &err.to_string()),
                ) {
                    log::warn!("Could not record dispatch failure: {}", e);
                }
            }
        }
    }

    fn record_dispatch(&self, job_id: &str, receipt: DispatchReceipt) {
        let result = self.store.with_job(job_id, |job| {
            if job.state.is_terminal() {
                // Cancelled or failed while the request was in flight.
                if job.external_ref.is_none() {
                    job.external_ref = Some(receipt.external_ref.clone());
                    job.touch();
                    self.store.persist(job, []);
                }
                return Some(receipt.external_ref.clone());
            }
            let outcome = job.mark_dispatched(&receipt.external_ref);
            self.settle(job, outcome, "dispatch receipt", []);
            None
        });

        match result {
            Ok(Some(external_ref)) => self.signal_cancel(external_ref),
            Ok(None) => log::info!(
                "Job {} accepted by extraction service as {}",
                job_id,
                receipt.external_ref
            ),
            Err(e) => log::warn!("Dispatch receipt for job {} dropped: {}", job_id, e),
        }
    }

    /// Persists a changed job and frees its target once it is terminal.
    fn settle(
        &self,
        job: &mut ImportJob,
        outcome: UpdateOutcome,
        what: &str,
        sections: impl IntoIterator<Item = u32>,
    ) -> UpdateOutcome {
        match outcome {
            UpdateOutcome::Changed => {
                self.store.persist(job, sections);
                if job.state.is_terminal() {
                    self.store.release_target(job);
                }
            }
            UpdateOutcome::Unchanged => {
                log::trace!("Job {}: duplicate {}", job.id, what);
            }
            UpdateOutcome::Ignored(reason) => {
                log::debug!("Job {}: ignored {} ({})", job.id, what, reason);
            }
        }
        outcome
    }

    /// Applies a progress update from the service.
    pub fn on_progress(&self, job_id: &str, update: StageUpdate) -> Result<UpdateOutcome, ImportError> {
        self.store.with_job(job_id, |job| {
            let before = job.state;
            let outcome = job.apply_stage_update(&update);
            if job.state != before {
                log::info!("Job {} is now {}", job.id, job.state);
            }
            self.settle(job, outcome, "progress update", [])
        })
    }

    /// Records one section result.
    pub fn on_section_result(
        &self,
        job_id: &str,
        report: SectionReport,
    ) -> Result<UpdateOutcome, ImportError> {
        let policy = self.policy();
        self.store.with_job(job_id, |job| {
            let index = report.index;
            let before = job.state;
            let outcome = job.record_section(report, policy);
            if job.state != before {
                log::info!(
                    "Job {} is now {} ({} mapped, {} unmapped, {} failed)",
                    job.id,
                    job.state,
                    job.counts.mapped,
                    job.counts.unmapped,
                    job.counts.failed
                );
            }
            self.settle(job, outcome, "section result", [index])
        })
    }

    /// Applies the service's completion signal.
    pub fn on_completed(&self, job_id: &str, total_sections: u32) -> Result<UpdateOutcome, ImportError> {
        self.store.with_job(job_id, |job| {
            let outcome = job.record_completion(total_sections);
            if job.state.accepts_results() && outcome.is_changed() {
                log::info!(
                    "Job {}: extraction finished with {} sections, waiting for {} more results",
                    job.id,
                    total_sections,
                    total_sections.saturating_sub(job.progress.sections_processed)
                );
            }
            self.settle(job, outcome, "completion signal", [])
        })
    }

    /// Records a fatal failure. Only the first one is kept.
    pub fn on_failure(&self, job_id: &str, detail: ErrorDetail) -> Result<UpdateOutcome, ImportError> {
        self.store.with_job(job_id, |job| {
            let message = detail.message.clone();
            let outcome = job.fail(detail);
            if outcome.is_changed() {
                log::warn!("Job {} failed: {}", job.id, message);
            }
            self.settle(job, outcome, "failure report", [])
        })
    }

    /// Cancels a job. Jobs still at the service get a best-effort cancel signal.
    pub fn cancel(&self, job_id: &str) -> Result<CancelEffect, ImportError> {
        Self::runtime()?;
        let effect = self.store.with_job(job_id, |job| {
            let effect = job.cancel()?;
            if matches!(effect, CancelEffect::Cancelled { .. }) {
                log::info!("Job {} cancelled", job.id);
                self.store.persist(job, []);
                self.store.release_target(job);
            }
            Ok::<_, ImportError>(effect)
        })??;

        if let CancelEffect::Cancelled {
            signal: Some(external_ref),
        } = &effect
        {
            self.signal_cancel(external_ref.clone());
        }
        Ok(effect)
    }

    fn signal_cancel(&self, external_ref: String) {
        let Ok(runtime) = Handle::try_current() else {
            log::warn!("No runtime to send cancel signal for {}", external_ref);
            return;
        };
        let service = Arc::clone(&self.service);
        runtime.spawn(async move {
            match service.cancel(&external_ref).await {
                Ok(()) => log::debug!("Cancel signal sent for {}", external_ref),
                Err(e) => log::warn!("Cancel signal for {} failed: {}", external_ref, e),
            }
        });
    }

    /// Routes a decoded callback message. Messages for unknown jobs are dropped.
    pub fn handle_message(&self, message: ServiceMessage) -> UpdateOutcome {
        let job_id = message.job_id().to_string();
        let kind = message.kind();
        let result = match message {
            ServiceMessage::Progress {
                job_id,
                stage,
                description,
                total_sections,
                sections_processed,
            } => self.on_progress(
                &job_id,
                StageUpdate {
                    stage,
                    description,
                    total_sections,
                    sections_processed,
                },
            ),
            ServiceMessage::Section { job_id, record } => {
                self.on_section_result(&job_id, record.into_report())
            }
            ServiceMessage::Completed {
                job_id,
                total_sections,
            } => self.on_completed(&job_id, total_sections),
            ServiceMessage::Failed {
                job_id,
                code,
                message,
            } => self.on_failure(
                &job_id,
                ErrorDetail::new(
                    code.as_deref().unwrap_or(ErrorDetail::EXTRACTION_FAILED),
                    &message,
                ),
            ),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Dropping {} message for job {}: {}", kind, job_id, e);
                UpdateOutcome::Ignored("unknown job")
            }
        }
    }

    /// Fails in-flight jobs that saw no update for longer than `max_idle`.
    /// Returns the ids of the expired jobs.
    pub fn expire_stale(&self, max_idle: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut expired = Vec::new();

        for handle in self.store.handles() {
            let mut job = crate::store::lock_job(&handle);
            if !job.state.accepts_results() {
                continue;
            }
            let idle = match (now - job.updated_at).to_std() {
                Ok(idle) => idle,
                Err(_) => continue,
            };
            if idle <= max_idle {
                continue;
            }

            let detail = ErrorDetail::new(
                ErrorDetail::TIMEOUT,
                &format!("no update from extraction service for {}s", idle.as_secs()),
            );
            let outcome = job.fail(detail);
            if self.settle(&mut job, outcome, "stale timeout", []).is_changed() {
                log::warn!("Job {} expired after {}s without updates", job.id, idle.as_secs());
                expired.push(job.id.clone());
                if let Some(external_ref) = job.external_ref.clone() {
                    drop(job);
                    self.signal_cancel(external_ref);
                }
            }
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionError;
    use crate::model::{LifecycleState, SectionMapping, SectionOutcome, TaxonomyCode};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingService {
        submitted: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
        fail_submit: bool,
    }

    #[async_trait]
    impl ExtractionService for RecordingService {
        async fn submit(&self, request: ExtractionRequest) -> Result<DispatchReceipt, ExtractionError> {
            if self.fail_submit {
                return Err(ExtractionError::Unavailable("connection refused".to_string()));
            }
            self.submitted.lock().unwrap().push(request.job_id.clone());
            Ok(DispatchReceipt {
                external_ref: format!("ext-{}", request.job_id),
            })
        }

        async fn cancel(&self, external_ref: &str) -> Result<(), ExtractionError> {
            self.cancelled.lock().unwrap().push(external_ref.to_string());
            Ok(())
        }
    }

    fn manager_with(service: Arc<RecordingService>) -> JobManager {
        JobManager::new(
            Arc::new(JobStore::new()),
            service,
            Arc::new(ImportConfig::default()),
        )
    }

    fn pdf() -> UploadedDocument {
        UploadedDocument::new("report.pdf", Some("application/pdf"), b"%PDF-1.7".to_vec())
    }

    async fn settle_tasks() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn mapped(index: u32) -> SectionReport {
        SectionReport {
            index,
            heading: None,
            page_number: None,
            section_type: None,
            content: format!("section {}", index),
            outcome: SectionOutcome::Mapped(SectionMapping::auto(
                vec![TaxonomyCode::new("GRI 2", "2-1")],
                80.0,
                "",
            )),
        }
    }

    #[test]
    fn test_resolved_media_type() {
        let declared = UploadedDocument::new("notes.bin", Some("Text/Plain"), vec![1]);
        assert_eq!(declared.resolved_media_type(), "text/plain");

        let guessed = UploadedDocument::new("report.pdf", None, vec![1]);
        assert_eq!(guessed.resolved_media_type(), "application/pdf");

        let unknown = UploadedDocument::new("blob", Some("  "), vec![1]);
        assert_eq!(unknown.resolved_media_type(), FALLBACK_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let manager = manager_with(Arc::new(RecordingService::default()));

        assert!(matches!(
            manager.submit(pdf(), "  "),
            Err(ImportError::MissingTargetDocument)
        ));
        assert!(matches!(
            manager.submit(UploadedDocument::new("a.pdf", None, vec![]), "doc"),
            Err(ImportError::EmptyDocument)
        ));
        assert!(matches!(
            manager.submit(UploadedDocument::new("a.png", None, vec![1, 2]), "doc"),
            Err(ImportError::UnsupportedMediaType { media_type }) if media_type == "image/png"
        ));
        assert!(manager.store().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_oversized_document() {
        let mut config = ImportConfig::default();
        config.max_upload_bytes = 4;
        let manager = JobManager::new(
            Arc::new(JobStore::new()),
            Arc::new(RecordingService::default()),
            Arc::new(config),
        );
        assert!(matches!(
            manager.submit(pdf(), "doc"),
            Err(ImportError::DocumentTooLarge { size: 8, limit: 4 })
        ));
    }

    #[tokio::test]
    async fn test_submit_dispatches_in_background() {
        let service = Arc::new(RecordingService::default());
        let manager = manager_with(Arc::clone(&service));

        let job_id = manager.submit(pdf(), "doc-1").unwrap();
        settle_tasks().await;

        let job = manager.store().snapshot(&job_id).unwrap();
        assert_eq!(job.state, LifecycleState::Processing);
        assert_eq!(job.external_ref, Some(format!("ext-{}", job_id)));
        assert_eq!(service.submitted.lock().unwrap().as_slice(), &[job_id]);
    }

    #[tokio::test]
    async fn test_dispatch_failure_fails_job_and_frees_target() {
        let service = Arc::new(RecordingService {
            fail_submit: true,
            ..Default::default()
        });
        let manager = manager_with(service);

        let job_id = manager.submit(pdf(), "doc-1").unwrap();
        settle_tasks().await;

        let job = manager.store().snapshot(&job_id).unwrap();
        assert_eq!(job.state, LifecycleState::Failed);
        assert_eq!(job.error.unwrap().code, ErrorDetail::DISPATCH_FAILED);
        assert!(manager.submit(pdf(), "doc-1").is_ok());
    }

    #[tokio::test]
    async fn test_cancel_sends_signal() {
        let service = Arc::new(RecordingService::default());
        let manager = manager_with(Arc::clone(&service));

        let job_id = manager.submit(pdf(), "doc-1").unwrap();
        settle_tasks().await;

        let effect = manager.cancel(&job_id).unwrap();
        assert!(matches!(effect, CancelEffect::Cancelled { signal: Some(_) }));
        settle_tasks().await;
        assert_eq!(service.cancelled.lock().unwrap().len(), 1);

        assert_eq!(manager.cancel(&job_id).unwrap(), CancelEffect::AlreadyCancelled);
        assert!(manager.store().active_job_for("doc-1").is_none());
    }

    #[tokio::test]
    async fn test_handle_message_unknown_job() {
        let manager = manager_with(Arc::new(RecordingService::default()));
        let outcome = manager.handle_message(ServiceMessage::Completed {
            job_id: "missing".to_string(),
            total_sections: 1,
        });
        assert!(matches!(outcome, UpdateOutcome::Ignored(_)));
    }

    #[tokio::test]
    async fn test_section_results_complete_job() {
        let manager = manager_with(Arc::new(RecordingService::default()));
        let job_id = manager.submit(pdf(), "doc-1").unwrap();
        settle_tasks().await;

        manager.on_completed(&job_id, 2).unwrap();
        manager.on_section_result(&job_id, mapped(1)).unwrap();
        manager.on_section_result(&job_id, mapped(0)).unwrap();

        let job = manager.store().snapshot(&job_id).unwrap();
        assert_eq!(job.state, LifecycleState::Completed);
        // Reviewable jobs still hold their target.
        assert_eq!(manager.store().active_job_for("doc-1"), Some(job_id));
    }

    #[tokio::test]
    async fn test_expire_stale() {
        let manager = manager_with(Arc::new(RecordingService::default()));
        let job_id = manager.submit(pdf(), "doc-1").unwrap();
        settle_tasks().await;

        assert!(manager.expire_stale(Duration::from_secs(3600)).is_empty());

        manager
            .store()
            .with_job(&job_id, |job| {
                job.updated_at = Utc::now() - chrono::Duration::seconds(120);
            })
            .unwrap();
        let expired = manager.expire_stale(Duration::from_secs(60));
        assert_eq!(expired, vec![job_id.clone()]);

        let job = manager.store().snapshot(&job_id).unwrap();
        assert_eq!(job.state, LifecycleState::Failed);
        assert_eq!(job.error.unwrap().code, ErrorDetail::TIMEOUT);
    }

    fn pending_job(store: &JobStore, target: &str) -> String {
        let job = ImportJob::new(
            target,
            SourceFileMeta {
                filename: "report.pdf".to_string(),
                byte_size: 8,
                media_type: "application/pdf".to_string(),
            },
        );
        let job_id = job.id.clone();
        store.insert_new(job).unwrap();
        job_id
    }

    #[test]
    fn test_submit_outside_runtime_leaves_no_job() {
        let manager = manager_with(Arc::new(RecordingService::default()));

        let worker = manager.clone();
        let result = std::thread::spawn(move || worker.submit(pdf(), "doc-1"))
            .join()
            .unwrap();

        assert!(matches!(result, Err(ImportError::RuntimeUnavailable)));
        assert!(manager.store().is_empty());
        assert!(manager.store().active_job_for("doc-1").is_none());
    }

    #[test]
    fn test_cancel_outside_runtime_keeps_job() {
        let manager = manager_with(Arc::new(RecordingService::default()));
        let job_id = pending_job(manager.store(), "doc-1");

        let worker = manager.clone();
        let id = job_id.clone();
        let result = std::thread::spawn(move || worker.cancel(&id)).join().unwrap();

        assert!(matches!(result, Err(ImportError::RuntimeUnavailable)));
        let job = manager.store().snapshot(&job_id).unwrap();
        assert_eq!(job.state, LifecycleState::Pending);
        assert_eq!(manager.store().active_job_for("doc-1"), Some(job_id));
    }

    #[tokio::test]
    async fn test_receipt_for_failed_job_signals_cancel() {
        let service = Arc::new(RecordingService::default());
        let manager = manager_with(Arc::clone(&service));
        let job_id = pending_job(manager.store(), "doc-1");

        manager
            .on_failure(&job_id, ErrorDetail::new(ErrorDetail::TIMEOUT, "gave up"))
            .unwrap();
        manager.record_dispatch(
            &job_id,
            DispatchReceipt {
                external_ref: "ext-late".to_string(),
            },
        );
        settle_tasks().await;

        assert_eq!(*service.cancelled.lock().unwrap(), vec!["ext-late".to_string()]);
        let job = manager.store().snapshot(&job_id).unwrap();
        assert_eq!(job.state, LifecycleState::Failed);
        assert_eq!(job.external_ref.as_deref(), Some("ext-late"));
    }
}
