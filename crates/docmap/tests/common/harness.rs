//! Test harness for driving the import pipeline without external services.
//!
//! The `TestHarness` struct owns a pipeline wired to:
//! - `ScriptedService`, an extraction service fake that records submissions
//!   and cancel signals
//! - `MemoryTarget`, a target document fake with write failure injection

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use docmap::config::ImportConfig;
use docmap::extraction::{DispatchReceipt, ExtractionError, ExtractionRequest, ExtractionService};
use docmap::model::TaxonomyCode;
use docmap::{
    ImportPipeline, JobStore, ServiceMessage, TargetDocumentWriter, TargetWriteError,
    UploadedDocument,
};

/// Extraction service fake.
#[derive(Default)]
pub struct ScriptedService {
    submitted: Mutex<Vec<ExtractionRequest>>,
    cancelled: Mutex<Vec<String>>,
    reject_submissions: AtomicBool,
}

impl ScriptedService {
    /// Makes every following submission fail with `Unavailable`.
    pub fn reject_submissions(&self) {
        self.reject_submissions.store(true, Ordering::SeqCst);
    }

    pub fn submitted_job_ids(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.job_id.clone())
            .collect()
    }

    pub fn submitted(&self) -> Vec<ExtractionRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionService for ScriptedService {
    async fn submit(&self, request: ExtractionRequest) -> Result<DispatchReceipt, ExtractionError> {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(ExtractionError::Unavailable(
                "scripted outage".to_string(),
            ));
        }
        let external_ref = format!("ext-{}", request.job_id);
        self.submitted.lock().unwrap().push(request);
        Ok(DispatchReceipt { external_ref })
    }

    async fn cancel(&self, external_ref: &str) -> Result<(), ExtractionError> {
        self.cancelled.lock().unwrap().push(external_ref.to_string());
        Ok(())
    }
}

/// Target document fake keyed by (target id, code).
#[derive(Default)]
pub struct MemoryTarget {
    slots: Mutex<HashMap<(String, TaxonomyCode), Vec<String>>>,
    writes: AtomicUsize,
    fail_at_write: Mutex<Option<usize>>,
}

impl MemoryTarget {
    /// Fails the write with the given zero-based attempt number, once.
    pub fn fail_at_write(&self, attempt: usize) {
        *self.fail_at_write.lock().unwrap() = Some(attempt);
    }

    /// Every piece of content written for a code, in write order.
    pub fn writes_for(&self, target: &str, code: &TaxonomyCode) -> Vec<String> {
        self.slots
            .lock()
            .unwrap()
            .get(&(target.to_string(), code.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn codes_written(&self, target: &str) -> usize {
        self.slots
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| t == target)
            .count()
    }

    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetDocumentWriter for MemoryTarget {
    async fn write_content(
        &self,
        target_document_id: &str,
        code: &TaxonomyCode,
        content: &str,
    ) -> Result<(), TargetWriteError> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst);
        {
            let mut fail = self.fail_at_write.lock().unwrap();
            if *fail == Some(attempt) {
                *fail = None;
                return Err(TargetWriteError::Unavailable(
                    "scripted write failure".to_string(),
                ));
            }
        }
        self.slots
            .lock()
            .unwrap()
            .entry((target_document_id.to_string(), code.clone()))
            .or_default()
            .push(content.to_string());
        Ok(())
    }
}

/// Pipeline plus its fakes.
pub struct TestHarness {
    pub pipeline: ImportPipeline,
    pub service: Arc<ScriptedService>,
    pub target: Arc<MemoryTarget>,
}

impl TestHarness {
    /// Create a harness with the default configuration and an in-memory store.
    pub fn new() -> Self {
        Self::with_config(ImportConfig::default())
    }

    pub fn with_config(config: ImportConfig) -> Self {
        Self::with_store(config, Arc::new(JobStore::new()))
    }

    pub fn with_store(config: ImportConfig, store: Arc<JobStore>) -> Self {
        let service = Arc::new(ScriptedService::default());
        let target = Arc::new(MemoryTarget::default());
        let pipeline = ImportPipeline::with_store(
            config,
            store,
            Arc::clone(&service) as Arc<dyn ExtractionService>,
            Arc::clone(&target) as Arc<dyn TargetDocumentWriter>,
        );
        Self {
            pipeline,
            service,
            target,
        }
    }

    /// Submits a small text document and lets the dispatch task run.
    pub async fn submit_text(&self, target_document_id: &str) -> String {
        let document = UploadedDocument::new(
            "annual-report.txt",
            Some("text/plain"),
            b"Annual report body".to_vec(),
        );
        let job_id = self
            .pipeline
            .submit(document, target_document_id)
            .expect("submit should be accepted");
        settle().await;
        job_id
    }

    /// Feeds messages through the pipeline in order.
    pub fn feed(&self, messages: impl IntoIterator<Item = ServiceMessage>) {
        for message in messages {
            self.pipeline.handle_message(message);
        }
    }
}

/// Lets spawned dispatch and cancel tasks run on the current-thread runtime.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
