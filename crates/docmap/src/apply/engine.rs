//! Merges accepted mappings into the target document.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info_span, Instrument};

use super::plan::ApplyPlan;
use super::target::TargetDocumentWriter;
use crate::error::ImportError;
use crate::model::{LifecycleState, ProcessingStage};
use crate::sanitize;
use crate::store::{lock_job, JobHandle, JobStore};

/// Summary of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub job_id: String,
    pub sections_merged: usize,
    /// Codes written by this attempt.
    pub codes_written: usize,
    /// Codes an earlier, partially failed attempt had already written.
    pub codes_skipped: usize,
}

/// Clears the in-progress flag if an apply attempt ends without finishing,
/// including when its future is dropped mid-write.
struct ApplyGuard {
    handle: JobHandle,
    store: Arc<JobStore>,
    armed: bool,
}

impl ApplyGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ApplyGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut job = lock_job(&self.handle);
        job.applying = false;
        if job.progress.stage == ProcessingStage::Applying {
            job.progress.enter_stage(
                ProcessingStage::AwaitingReview,
                Some("Apply interrupted, ready to retry"),
            );
        }
        job.touch();
        self.store.persist(&job, []);
        log::debug!("Job {}: apply flag released", job.id);
    }
}

#[derive(Clone)]
pub struct ApplyEngine {
    store: Arc<JobStore>,
    writer: Arc<dyn TargetDocumentWriter>,
}

impl ApplyEngine {
    pub fn new(store: Arc<JobStore>, writer: Arc<dyn TargetDocumentWriter>) -> Self {
        Self { store, writer }
    }

    /// Writes every accepted mapping into the target document.
    ///
    /// One write per taxonomy code. A failed write leaves the job reviewable;
    /// a retry skips the codes that already made it.
    pub async fn apply(&self, job_id: &str) -> Result<ApplyOutcome, ImportError> {
        let span = info_span!("apply", job_id = %job_id);
        self.run(job_id).instrument(span).await
    }

    fn begin(&self, handle: &JobHandle) -> Result<ApplyPlan, ImportError> {
        let mut job = lock_job(handle);
        if job.state == LifecycleState::Applied {
            return Err(ImportError::AlreadyApplied(job.id.clone()));
        }
        if !job.state.is_reviewable() {
            return Err(ImportError::InvalidState {
                job_id: job.id.clone(),
                state: job.state,
                reason: "only completed or partially completed jobs can be applied".to_string(),
            });
        }
        if job.is_applying() {
            return Err(ImportError::InvalidState {
                job_id: job.id.clone(),
                state: job.state,
                reason: "apply already in progress".to_string(),
            });
        }

        job.applying = true;
        job.progress.enter_stage(ProcessingStage::Applying, None);
        job.touch();
        Ok(ApplyPlan::build(&job))
    }

    async fn run(&self, job_id: &str) -> Result<ApplyOutcome, ImportError> {
        let handle = self.store.handle(job_id)?;
        let plan = self.begin(&handle)?;
        let guard = ApplyGuard {
            handle: Arc::clone(&handle),
            store: Arc::clone(&self.store),
            armed: true,
        };

        let total = plan.writes.len();
        log::info!(
            "Applying job {} to '{}': {} sections, {} codes to write, {} already written",
            job_id,
            plan.target_document_id,
            plan.sections_merged,
            total,
            plan.already_written.len()
        );

        for (written, write) in plan.writes.iter().enumerate() {
            let result = self
                .writer
                .write_content(&plan.target_document_id, &write.code, &write.content)
                .await;

            if let Err(source) = result {
                log::warn!(
                    "Job {}: write of {} failed after {} of {} codes: {}",
                    job_id,
                    write.code,
                    written,
                    total,
                    source
                );
                return Err(ImportError::PartialApplyFailure {
                    job_id: job_id.to_string(),
                    written,
                    remaining: total - written,
                    source,
                });
            }

            log::debug!(
                "Job {}: wrote {} from sections {:?} (content {})",
                job_id,
                write.code,
                write.section_indices,
                sanitize::fingerprint(&write.content)
            );
            lock_job(&handle).applied_codes.insert(write.code.clone());
            self.store.persist_applied_code(job_id, &write.code);
        }

        {
            let mut job = lock_job(&handle);
            job.state = LifecycleState::Applied;
            job.applying = false;
            job.progress.applied_at = Some(Utc::now());
            job.progress.enter_stage(ProcessingStage::Applied, None);
            job.touch();
            self.store.persist(&job, []);
            self.store.release_target(&job);
        }
        guard.disarm();

        log::info!("Job {} applied", job_id);
        Ok(ApplyOutcome {
            job_id: job_id.to_string(),
            sections_merged: plan.sections_merged,
            codes_written: total,
            codes_skipped: plan.already_written.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::TargetWriteError;
    use crate::model::{
        ImportJob, RecordPolicy, SectionMapping, SectionOutcome, SectionReport, SourceFileMeta,
        TaxonomyCode,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryTarget {
        slots: Mutex<HashMap<TaxonomyCode, String>>,
        writes: Mutex<usize>,
        fail_on_write: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl TargetDocumentWriter for MemoryTarget {
        async fn write_content(
            &self,
            _target_document_id: &str,
            code: &TaxonomyCode,
            content: &str,
        ) -> Result<(), TargetWriteError> {
            let mut writes = self.writes.lock().unwrap();
            if *self.fail_on_write.lock().unwrap() == Some(*writes) {
                return Err(TargetWriteError::Unavailable("timeout".to_string()));
            }
            *writes += 1;
            self.slots
                .lock()
                .unwrap()
                .insert(code.clone(), content.to_string());
            Ok(())
        }
    }

    fn reviewable_job(store: &JobStore, codes: usize) -> String {
        let mut job = ImportJob::new(
            "doc-1",
            SourceFileMeta {
                filename: "r.pdf".to_string(),
                byte_size: 1,
                media_type: "application/pdf".to_string(),
            },
        );
        job.mark_dispatched("ext");
        for i in 0..codes as u32 {
            job.record_section(
                SectionReport {
                    index: i,
                    heading: None,
                    page_number: None,
                    section_type: None,
                    content: format!("s{}", i),
                    outcome: SectionOutcome::Mapped(SectionMapping::auto(
                        vec![TaxonomyCode::new("A", &i.to_string())],
                        90.0,
                        "",
                    )),
                },
                RecordPolicy::default(),
            );
        }
        job.record_completion(codes as u32);
        let id = job.id.clone();
        store.insert_new(job).unwrap();
        id
    }

    #[tokio::test]
    async fn test_apply_writes_and_marks_applied() {
        let store = Arc::new(JobStore::new());
        let id = reviewable_job(&store, 3);
        let target = Arc::new(MemoryTarget::default());
        let engine = ApplyEngine::new(Arc::clone(&store), target.clone());

        let outcome = engine.apply(&id).await.unwrap();
        assert_eq!(outcome.codes_written, 3);
        assert_eq!(outcome.sections_merged, 3);
        assert_eq!(target.slots.lock().unwrap().len(), 3);

        let job = store.snapshot(&id).unwrap();
        assert_eq!(job.state, LifecycleState::Applied);
        assert!(job.progress.applied_at.is_some());
        assert!(!job.is_applying());
        assert!(store.active_job_for("doc-1").is_none());

        assert!(matches!(
            engine.apply(&id).await,
            Err(ImportError::AlreadyApplied(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_failure_then_retry_converges() {
        let store = Arc::new(JobStore::new());
        let id = reviewable_job(&store, 3);
        let target = Arc::new(MemoryTarget::default());
        *target.fail_on_write.lock().unwrap() = Some(1);
        let engine = ApplyEngine::new(Arc::clone(&store), target.clone());

        match engine.apply(&id).await {
            Err(ImportError::PartialApplyFailure {
                written, remaining, ..
            }) => {
                assert_eq!(written, 1);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
        let job = store.snapshot(&id).unwrap();
        assert_eq!(job.state, LifecycleState::Completed);
        assert!(!job.is_applying());
        assert_eq!(job.applied_codes.len(), 1);

        *target.fail_on_write.lock().unwrap() = None;
        let outcome = engine.apply(&id).await.unwrap();
        assert_eq!(outcome.codes_written, 2);
        assert_eq!(outcome.codes_skipped, 1);
        assert_eq!(*target.writes.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_apply_rejects_processing_job() {
        let store = Arc::new(JobStore::new());
        let job = ImportJob::new(
            "doc-1",
            SourceFileMeta {
                filename: "r.pdf".to_string(),
                byte_size: 1,
                media_type: "application/pdf".to_string(),
            },
        );
        let id = job.id.clone();
        store.insert_new(job).unwrap();
        let target = Arc::new(MemoryTarget::default());
        let engine = ApplyEngine::new(Arc::clone(&store), target.clone());

        assert!(matches!(
            engine.apply(&id).await,
            Err(ImportError::InvalidState { .. })
        ));
        assert_eq!(*target.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_apply_rejected() {
        let store = Arc::new(JobStore::new());
        let id = reviewable_job(&store, 1);
        store.with_job(&id, |job| job.applying = true).unwrap();
        let engine = ApplyEngine::new(Arc::clone(&store), Arc::new(MemoryTarget::default()));

        assert!(matches!(
            engine.apply(&id).await,
            Err(ImportError::InvalidState { .. })
        ));
    }
}
