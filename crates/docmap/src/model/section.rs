//! Extracted sections and their mapping decisions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::taxonomy::TaxonomyCode;

/// Classification status of a section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Extracted but not yet classified.
    Pending,
    /// Carries a suggested or accepted mapping.
    Mapped,
    /// The classifier found no adequate match.
    Unmapped,
    /// The reviewer rejected the suggested mapping.
    Discarded,
    /// The classifier errored on this section.
    Failed,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Pending => "pending",
            SectionStatus::Mapped => "mapped",
            SectionStatus::Unmapped => "unmapped",
            SectionStatus::Discarded => "discarded",
            SectionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SectionStatus::Pending),
            "mapped" => Some(SectionStatus::Mapped),
            "unmapped" => Some(SectionStatus::Unmapped),
            "discarded" => Some(SectionStatus::Discarded),
            "failed" => Some(SectionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true once the classifier has decided on the section.
    pub fn is_classified(&self) -> bool {
        !matches!(self, SectionStatus::Pending)
    }
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a mapping came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingOrigin {
    Auto,
    Manual,
}

/// A section's assignment to one or more taxonomy codes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionMapping {
    pub codes: Vec<TaxonomyCode>,
    /// Confidence in [0, 100].
    pub confidence: u8,
    pub rationale: String,
    pub origin: MappingOrigin,
}

impl SectionMapping {
    /// Builds an automatic mapping, clamping the raw classifier score into [0, 100].
    pub fn auto(codes: Vec<TaxonomyCode>, confidence: f64, rationale: &str) -> Self {
        Self {
            codes,
            confidence: clamp_confidence(confidence),
            rationale: rationale.to_string(),
            origin: MappingOrigin::Auto,
        }
    }
}

/// Rounds a raw score and clamps it into [0, 100]. NaN maps to 0.
pub fn clamp_confidence(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

/// Decision reported by the classifier for one section.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionOutcome {
    /// Extracted, classification still running.
    Pending,
    Mapped(SectionMapping),
    Unmapped { reason: String },
    Failed { reason: String },
}

/// One section record as delivered by the extraction service.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionReport {
    pub index: u32,
    pub heading: Option<String>,
    pub page_number: Option<u32>,
    pub section_type: Option<String>,
    pub content: String,
    pub outcome: SectionOutcome,
}

/// One content unit extracted from the source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Zero-based position in the source document.
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_type: Option<String>,
    pub content: String,
    pub status: SectionStatus,
    /// Present iff `status == Mapped`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<SectionMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmapped_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Section {
    /// Builds a section from a service report, applying the confidence threshold.
    pub fn from_report(report: SectionReport, min_confidence: u8) -> Self {
        let (status, mapping, unmapped_reason) = match report.outcome {
            SectionOutcome::Pending => (SectionStatus::Pending, None, None),
            SectionOutcome::Mapped(mapping) => {
                let mut seen = HashSet::new();
                let codes: Vec<TaxonomyCode> = mapping
                    .codes
                    .iter()
                    .map(TaxonomyCode::normalized)
                    .filter(|c| !c.is_blank() && seen.insert(c.clone()))
                    .collect();
                if codes.is_empty() {
                    (
                        SectionStatus::Unmapped,
                        None,
                        Some("classifier supplied no taxonomy code".to_string()),
                    )
                } else if mapping.confidence < min_confidence {
                    (
                        SectionStatus::Unmapped,
                        None,
                        Some(format!(
                            "confidence {} below threshold {}",
                            mapping.confidence, min_confidence
                        )),
                    )
                } else {
                    (
                        SectionStatus::Mapped,
                        Some(SectionMapping { codes, ..mapping }),
                        None,
                    )
                }
            }
            SectionOutcome::Unmapped { reason } => (SectionStatus::Unmapped, None, Some(reason)),
            SectionOutcome::Failed { reason } => (SectionStatus::Failed, None, Some(reason)),
        };

        Self {
            index: report.index,
            heading: report.heading,
            page_number: report.page_number,
            section_type: report.section_type,
            content: report.content,
            status,
            mapping,
            unmapped_reason,
            updated_at: Utc::now(),
        }
    }

    /// True when both sections carry the same content and decision.
    pub fn same_decision(&self, other: &Section) -> bool {
        self.index == other.index
            && self.content == other.content
            && self.status == other.status
            && self.mapping == other.mapping
            && self.unmapped_reason == other.unmapped_reason
    }

    /// Rejects the suggested mapping.
    pub(crate) fn discard(&mut self) {
        self.status = SectionStatus::Discarded;
        self.mapping = None;
        self.unmapped_reason = Some("mapping discarded by reviewer".to_string());
        self.updated_at = Utc::now();
    }

    /// Checks that `mapping` is present exactly when the section is mapped.
    pub fn mapping_consistent(&self) -> bool {
        self.mapping.is_some() == (self.status == SectionStatus::Mapped)
    }
}
