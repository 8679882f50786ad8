//! Callback messages posted by the extraction service.

use serde::{Deserialize, Serialize};

use super::error::ExtractionError;
use crate::model::{
    ProcessingStage, SectionMapping, SectionOutcome, SectionReport, TaxonomyCode,
};

/// Classifier decision as it appears on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Mapped,
    Unmapped,
    Failed,
}

/// One section as reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionRecord {
    pub section_index: u32,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub section_type: Option<String>,
    #[serde(default)]
    pub content: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<TaxonomyCode>,
    /// Raw classifier score; clamped into [0, 100] when recorded.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SectionRecord {
    pub fn into_report(self) -> SectionReport {
        let outcome = match self.status {
            RecordStatus::Pending => SectionOutcome::Pending,
            RecordStatus::Mapped => SectionOutcome::Mapped(SectionMapping::auto(
                self.codes,
                self.confidence.unwrap_or(0.0),
                self.rationale.as_deref().unwrap_or_default(),
            )),
            RecordStatus::Unmapped => SectionOutcome::Unmapped {
                reason: self
                    .reason
                    .unwrap_or_else(|| "no matching taxonomy code".to_string()),
            },
            RecordStatus::Failed => SectionOutcome::Failed {
                reason: self
                    .reason
                    .unwrap_or_else(|| "classification failed".to_string()),
            },
        };

        SectionReport {
            index: self.section_index,
            heading: self.heading,
            page_number: self.page_number,
            section_type: self.section_type,
            content: self.content,
            outcome,
        }
    }
}

/// A message from the extraction service, keyed by our job id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceMessage {
    Progress {
        job_id: String,
        stage: ProcessingStage,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        total_sections: Option<u32>,
        #[serde(default)]
        sections_processed: Option<u32>,
    },
    Section {
        job_id: String,
        #[serde(flatten)]
        record: SectionRecord,
    },
    Completed {
        job_id: String,
        total_sections: u32,
    },
    Failed {
        job_id: String,
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
}

impl ServiceMessage {
    /// Decodes one JSON message.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ExtractionError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn job_id(&self) -> &str {
        match self {
            ServiceMessage::Progress { job_id, .. }
            | ServiceMessage::Section { job_id, .. }
            | ServiceMessage::Completed { job_id, .. }
            | ServiceMessage::Failed { job_id, .. } => job_id,
        }
    }

    /// Short message kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceMessage::Progress { .. } => "progress",
            ServiceMessage::Section { .. } => "section",
            ServiceMessage::Completed { .. } => "completed",
            ServiceMessage::Failed { .. } => "failed",
        }
    }
}
