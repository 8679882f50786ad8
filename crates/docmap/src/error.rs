use std::path::PathBuf;
use thiserror::Error;

use crate::apply::TargetWriteError;
use crate::db::DatabaseError;
use crate::extraction::ExtractionError;
use crate::model::LifecycleState;

#[derive(Error, Debug)]
pub enum DocmapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Extraction service error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Errors returned by the import pipeline's operations.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unsupported media type '{media_type}'")]
    UnsupportedMediaType { media_type: String },

    #[error("Uploaded document is empty")]
    EmptyDocument,

    #[error("Uploaded document is {size} bytes, limit is {limit}")]
    DocumentTooLarge { size: u64, limit: u64 },

    #[error("A target document id is required")]
    MissingTargetDocument,

    #[error("Import already in progress for document '{target_document_id}' (job {job_id})")]
    ImportAlreadyInProgress {
        target_document_id: String,
        job_id: String,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Section {index} not found in job {job_id}")]
    SectionNotFound { job_id: String, index: u32 },

    #[error("Job {job_id} is {state}: {reason}")]
    InvalidState {
        job_id: String,
        state: LifecycleState,
        reason: String,
    },

    #[error("Job {0} has already been applied")]
    AlreadyApplied(String),

    /// Recorded on the job as an `ErrorDetail`; `submit` never returns it.
    #[error("Extraction service failure: {0}")]
    ExternalServiceFailure(#[from] ExtractionError),

    #[error("Apply of job {job_id} stopped after {written} writes, {remaining} remaining: {source}")]
    PartialApplyFailure {
        job_id: String,
        written: usize,
        remaining: usize,
        #[source]
        source: TargetWriteError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// Dispatch and cancellation run as background tasks and need a Tokio runtime.
    #[error("No async runtime available to run background work")]
    RuntimeUnavailable,
}

pub type Result<T> = std::result::Result<T, DocmapError>;
