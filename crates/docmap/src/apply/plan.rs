//! Groups accepted mappings into per-code writes.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ImportJob, SectionStatus, TaxonomyCode};

/// Separator between merged section contents.
pub const CONTENT_SEPARATOR: &str = "\n\n";

/// One write into the target document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    pub code: TaxonomyCode,
    pub content: String,
    /// Contributing sections, ascending.
    pub section_indices: Vec<u32>,
}

/// Everything an apply attempt has to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPlan {
    pub target_document_id: String,
    /// Codes not yet written, in code order.
    pub writes: Vec<PlannedWrite>,
    pub sections_merged: usize,
    /// Codes an earlier attempt already wrote.
    pub already_written: Vec<TaxonomyCode>,
}

impl ApplyPlan {
    /// Builds the plan from the job's mapped sections in index order.
    pub fn build(job: &ImportJob) -> Self {
        let mut grouped: BTreeMap<TaxonomyCode, (Vec<&str>, Vec<u32>)> = BTreeMap::new();
        let mut sections_merged = 0;

        for section in job.sections.values() {
            if section.status != SectionStatus::Mapped {
                continue;
            }
            let Some(mapping) = &section.mapping else {
                continue;
            };
            sections_merged += 1;
            let codes: BTreeSet<&TaxonomyCode> = mapping.codes.iter().collect();
            for code in codes {
                let entry = grouped.entry(code.clone()).or_default();
                entry.0.push(section.content.as_str());
                entry.1.push(section.index);
            }
        }

        let mut writes = Vec::new();
        let mut already_written = Vec::new();
        for (code, (contents, section_indices)) in grouped {
            if job.applied_codes.contains(&code) {
                already_written.push(code);
                continue;
            }
            writes.push(PlannedWrite {
                code,
                content: contents.join(CONTENT_SEPARATOR),
                section_indices,
            });
        }

        Self {
            target_document_id: job.target_document_id.clone(),
            writes,
            sections_merged,
            already_written,
        }
    }
}
