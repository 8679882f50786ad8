//! Asynchronous document import and standard-mapping pipeline.
//!
//! An uploaded document is handed to an external extraction/classification
//! service, tracked as a pollable job while results stream back, reviewed,
//! and finally merged into a target document's taxonomy slots.

pub mod apply;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod logging;
pub mod manager;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod reconciler;
pub mod sanitize;
pub mod store;

pub use apply::{ApplyEngine, ApplyOutcome, TargetDocumentWriter, TargetWriteError};
pub use config::{load_config, load_config_from_str, ImportConfig};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, DocmapError, ImportError, Result};
pub use extraction::{
    DispatchReceipt, ExtractionError, ExtractionRequest, ExtractionService,
    HttpExtractionService, ServiceMessage,
};
pub use logging::init_logging;
pub use manager::{CallbackInbox, JobManager, UploadedDocument};
pub use model::{
    ImportJob, LifecycleState, ProcessingStage, Section, SectionStatus, TaxonomyCode,
};
pub use pipeline::ImportPipeline;
pub use progress::{JobSnapshot, ProgressReporter, SectionListing};
pub use reconciler::{DiscardOutcome, MappingReconciler, ReviewItem};
pub use store::JobStore;
