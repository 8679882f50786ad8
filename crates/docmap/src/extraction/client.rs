//! Contract of the external extraction/classification service.

use async_trait::async_trait;

use super::error::ExtractionError;

/// Document handed to the extraction service.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Our job id; every callback message carries it back.
    pub job_id: String,
    pub filename: String,
    pub media_type: String,
    pub content: Vec<u8>,
    /// Address the service posts result messages to.
    pub callback_url: Option<String>,
}

/// Acknowledgement that the service accepted a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Correlation id assigned by the service.
    pub external_ref: String,
}

/// Extraction and classification service.
///
/// Results arrive later as [`ServiceMessage`](super::ServiceMessage)s, possibly
/// out of order, duplicated or partial.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Submits a document for extraction and classification.
    async fn submit(&self, request: ExtractionRequest) -> Result<DispatchReceipt, ExtractionError>;

    /// Asks the service to stop work on a job. Best effort.
    async fn cancel(&self, external_ref: &str) -> Result<(), ExtractionError>;
}
