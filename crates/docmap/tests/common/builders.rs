//! Builders for service messages and configurations.
//!
//! These keep the scenario tests focused on the sequence of events rather
//! than on message boilerplate.

#![allow(dead_code)]

use docmap::config::{ImportConfig, ProgressConfig};
use docmap::extraction::{RecordStatus, SectionRecord};
use docmap::model::{ProcessingStage, TaxonomyCode};
use docmap::ServiceMessage;

/// Builder for one `section` callback message.
pub struct SectionBuilder {
    job_id: String,
    record: SectionRecord,
}

impl SectionBuilder {
    /// A pending section with placeholder content.
    pub fn new(job_id: &str, index: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            record: SectionRecord {
                section_index: index,
                heading: Some(format!("Heading {}", index)),
                page_number: Some(index / 3 + 1),
                section_type: Some("paragraph".to_string()),
                content: format!("Content of section {}", index),
                status: RecordStatus::Pending,
                codes: vec![],
                confidence: None,
                rationale: None,
                reason: None,
            },
        }
    }

    /// Marks the section mapped to one code.
    pub fn mapped(self, category: &str, item: &str, confidence: f64) -> Self {
        self.mapped_to(&[(category, item)], confidence)
    }

    /// Marks the section mapped to several codes.
    pub fn mapped_to(mut self, codes: &[(&str, &str)], confidence: f64) -> Self {
        self.record.status = RecordStatus::Mapped;
        self.record.codes = codes
            .iter()
            .map(|(category, item)| TaxonomyCode::new(category, item))
            .collect();
        self.record.confidence = Some(confidence);
        self.record.rationale = Some("matched disclosure wording".to_string());
        self
    }

    pub fn unmapped(mut self, reason: &str) -> Self {
        self.record.status = RecordStatus::Unmapped;
        self.record.reason = Some(reason.to_string());
        self
    }

    pub fn failed(mut self, reason: &str) -> Self {
        self.record.status = RecordStatus::Failed;
        self.record.reason = Some(reason.to_string());
        self
    }

    pub fn content(mut self, content: &str) -> Self {
        self.record.content = content.to_string();
        self
    }

    pub fn build(self) -> ServiceMessage {
        ServiceMessage::Section {
            job_id: self.job_id,
            record: self.record,
        }
    }
}

/// A `progress` message entering the given stage.
pub fn progress(job_id: &str, stage: ProcessingStage, total: Option<u32>) -> ServiceMessage {
    ServiceMessage::Progress {
        job_id: job_id.to_string(),
        stage,
        description: None,
        total_sections: total,
        sections_processed: None,
    }
}

pub fn completed(job_id: &str, total_sections: u32) -> ServiceMessage {
    ServiceMessage::Completed {
        job_id: job_id.to_string(),
        total_sections,
    }
}

pub fn failed(job_id: &str, message: &str) -> ServiceMessage {
    ServiceMessage::Failed {
        job_id: job_id.to_string(),
        code: None,
        message: message.to_string(),
    }
}

/// Builder for creating `ImportConfig` instances.
pub struct ConfigBuilder {
    config: ImportConfig,
}

impl ConfigBuilder {
    /// Defaults with a single dispatch slot and in-memory storage.
    pub fn new() -> Self {
        let mut config = ImportConfig::default();
        config.extraction.max_concurrent_dispatches = 1;
        Self { config }
    }

    pub fn min_confidence(mut self, min_confidence: u8) -> Self {
        self.config.classification.min_confidence = min_confidence;
        self
    }

    pub fn max_upload_bytes(mut self, limit: u64) -> Self {
        self.config.max_upload_bytes = limit;
        self
    }

    pub fn accepted_media_types(mut self, types: &[&str]) -> Self {
        self.config.accepted_media_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn progress(mut self, progress: ProgressConfig) -> Self {
        self.config.progress = progress;
        self
    }

    pub fn database(mut self, path: &std::path::Path) -> Self {
        self.config.database.enabled = true;
        self.config.database.path = Some(path.to_string_lossy().to_string());
        self
    }

    pub fn cache_retention(mut self, secs: u64) -> Self {
        self.config.database.cache_retention_secs = secs;
        self
    }

    pub fn build(self) -> ImportConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
