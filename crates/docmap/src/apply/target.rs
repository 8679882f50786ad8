//! Contract of the target-document collaborator.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::TaxonomyCode;

/// Errors from writing into a target document.
#[derive(Error, Debug)]
pub enum TargetWriteError {
    #[error("Target document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Target document '{target_document_id}' rejected the write: {reason}")]
    Rejected {
        target_document_id: String,
        reason: String,
    },

    #[error("Target document unavailable: {0}")]
    Unavailable(String),
}

/// Writes merged content into a target document's taxonomy slots.
///
/// Implementations must be idempotent for identical arguments: writing the
/// same content to the same code twice leaves the document unchanged.
#[async_trait]
pub trait TargetDocumentWriter: Send + Sync {
    /// Stores `content` under `code`.
    ///
    /// Called once per code per apply. `content` is the full merged text of
    /// every mapped section carrying `code`, in ascending section index
    /// order and joined with a blank line, not the text of one section. A
    /// write replaces whatever an earlier call stored for the same code.
    async fn write_content(
        &self,
        target_document_id: &str,
        code: &TaxonomyCode,
        content: &str,
    ) -> Result<(), TargetWriteError>;
}
