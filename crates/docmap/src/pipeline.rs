//! Wires the store, manager, reporter, reconciler and apply engine together.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::apply::{ApplyEngine, ApplyOutcome, TargetDocumentWriter};
use crate::config::ImportConfig;
use crate::db::Database;
use crate::error::{DocmapError, ImportError};
use crate::extraction::{ExtractionService, HttpExtractionService, ServiceMessage};
use crate::manager::{CallbackInbox, JobManager, UploadedDocument};
use crate::model::{CancelEffect, UpdateOutcome};
use crate::progress::{JobSnapshot, ProgressReporter, SectionListing};
use crate::reconciler::{DiscardOutcome, MappingReconciler, ReviewItem};
use crate::store::JobStore;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The import pipeline.
///
/// Every operation is safe to call concurrently; per-job mutation is
/// serialized by the job store.
#[derive(Clone)]
pub struct ImportPipeline {
    config: Arc<ImportConfig>,
    store: Arc<JobStore>,
    manager: JobManager,
    reporter: ProgressReporter,
    reconciler: MappingReconciler,
    apply: ApplyEngine,
}

impl ImportPipeline {
    /// Production constructor: opens the configured database and reloads
    /// persisted jobs.
    pub fn from_config(
        config: ImportConfig,
        service: Arc<dyn ExtractionService>,
        writer: Arc<dyn TargetDocumentWriter>,
    ) -> Result<Self, DocmapError> {
        let store = match config.database.resolved_path() {
            Some(path) => {
                let store = JobStore::with_database(Database::open(&path)?);
                store.load_from_database()?;
                store
            }
            None => {
                log::info!("No database configured, import jobs are kept in memory");
                JobStore::new()
            }
        };
        Ok(Self::with_store(config, Arc::new(store), service, writer))
    }

    /// Like [`from_config`](Self::from_config) with the HTTP extraction adapter.
    pub fn with_http_service(
        config: ImportConfig,
        writer: Arc<dyn TargetDocumentWriter>,
    ) -> Result<Self, DocmapError> {
        let service = HttpExtractionService::from_config(&config.extraction)?;
        Self::from_config(config, Arc::new(service), writer)
    }

    /// Builds the pipeline around an existing store.
    pub fn with_store(
        config: ImportConfig,
        store: Arc<JobStore>,
        service: Arc<dyn ExtractionService>,
        writer: Arc<dyn TargetDocumentWriter>,
    ) -> Self {
        let config = Arc::new(config);
        let manager = JobManager::new(Arc::clone(&store), service, Arc::clone(&config));
        let reporter = ProgressReporter::new(Arc::clone(&store), config.progress.poll_interval_ms);
        let reconciler = MappingReconciler::new(Arc::clone(&store), config.progress.recent_events);
        let apply = ApplyEngine::new(Arc::clone(&store), writer);

        Self {
            config,
            store,
            manager,
            reporter,
            reconciler,
            apply,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn submit(
        &self,
        document: UploadedDocument,
        target_document_id: &str,
    ) -> Result<String, ImportError> {
        self.manager.submit(document, target_document_id)
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobSnapshot, ImportError> {
        self.reporter.get_status(job_id)
    }

    pub fn get_sections(&self, job_id: &str) -> Result<SectionListing, ImportError> {
        self.reporter.get_sections(job_id)
    }

    pub fn jobs_for_target(&self, target_document_id: &str) -> Vec<JobSnapshot> {
        self.reporter.jobs_for_target(target_document_id)
    }

    pub fn review(&self, job_id: &str) -> Result<Vec<ReviewItem>, ImportError> {
        self.reconciler.review(job_id)
    }

    pub fn discard_mapping(&self, job_id: &str, index: u32) -> Result<DiscardOutcome, ImportError> {
        self.reconciler.discard_mapping(job_id, index)
    }

    pub async fn apply(&self, job_id: &str) -> Result<ApplyOutcome, ImportError> {
        self.apply.apply(job_id).await
    }

    pub fn cancel(&self, job_id: &str) -> Result<CancelEffect, ImportError> {
        self.manager.cancel(job_id)
    }

    pub fn handle_message(&self, message: ServiceMessage) -> UpdateOutcome {
        self.manager.handle_message(message)
    }

    /// Starts a callback inbox feeding this pipeline.
    pub fn spawn_callback_inbox(&self, capacity: usize) -> (CallbackInbox, JoinHandle<usize>) {
        CallbackInbox::spawn(self.manager.clone(), capacity)
    }

    /// Periodically fails in-flight jobs idle longer than
    /// `progress.stale_job_timeout_secs` and evicts finished jobs older than
    /// `database.cache_retention_secs` from the cache. Abort the handle to stop it.
    pub fn spawn_stale_sweeper(&self) -> JoinHandle<()> {
        let timeout = Duration::from_secs(self.config.progress.stale_job_timeout_secs);
        let period = (timeout / 10).clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
        let retention = Duration::from_secs(self.config.database.cache_retention_secs);
        let manager = self.manager.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let expired = manager.expire_stale(timeout);
                if !expired.is_empty() {
                    log::warn!("Stale sweeper expired {} jobs", expired.len());
                }
                manager.store().evict_finished(retention);
            }
        })
    }
}
