//! Extraction service error types.

use thiserror::Error;

/// Errors talking to the extraction/classification service.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Extraction service rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Extraction service is not configured: {0}")]
    NotConfigured(String),

    #[error("Extraction service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid service message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}
