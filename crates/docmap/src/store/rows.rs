//! Conversions between in-memory jobs and database rows.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::db::job_repo::JobRow;
use crate::db::section_repo::SectionRow;
use crate::db::DatabaseError;
use crate::model::{
    ErrorDetail, ImportJob, JobProgress, LifecycleState, ProcessingStage, Section, SectionCounts,
    SectionMapping, SectionStatus, SourceFileMeta, TaxonomyCode,
};

fn parse_state(s: &str, job_id: &str) -> LifecycleState {
    LifecycleState::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown job state '{}' for job {}, defaulting to failed",
            s,
            job_id
        );
        LifecycleState::Failed
    })
}

fn parse_stage(s: &str, job_id: &str) -> ProcessingStage {
    ProcessingStage::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown processing stage '{}' for job {}, defaulting to queued",
            s,
            job_id
        );
        ProcessingStage::Queued
    })
}

fn parse_section_status(s: &str, job_id: &str, index: u32) -> SectionStatus {
    SectionStatus::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown section status '{}' for job {} section {}, defaulting to pending",
            s,
            job_id,
            index
        );
        SectionStatus::Pending
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn parse_optional_timestamp(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.map(parse_timestamp)
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn job_to_row(job: &ImportJob) -> JobRow {
    JobRow {
        id: job.id.clone(),
        target_document_id: job.target_document_id.clone(),
        filename: job.source.filename.clone(),
        byte_size: i64::try_from(job.source.byte_size).unwrap_or(i64::MAX),
        media_type: job.source.media_type.clone(),
        state: job.state.as_str().to_string(),
        stage: job.progress.stage.as_str().to_string(),
        description: job.progress.description.clone(),
        total_sections: job.progress.total_sections,
        sections_processed: job.progress.sections_processed,
        mapped_count: job.counts.mapped,
        unmapped_count: job.counts.unmapped,
        failed_count: job.counts.failed,
        error_code: job.error.as_ref().map(|e| e.code.clone()),
        error_message: job.error.as_ref().map(|e| e.message.clone()),
        external_ref: job.external_ref.clone(),
        created_at: format_timestamp(job.progress.created_at),
        stage_entered_at: format_timestamp(job.progress.stage_entered_at),
        completed_at: job.progress.completed_at.map(format_timestamp),
        review_ready_at: job.progress.review_ready_at.map(format_timestamp),
        applied_at: job.progress.applied_at.map(format_timestamp),
        updated_at: format_timestamp(job.updated_at),
    }
}

pub(crate) fn section_to_row(job_id: &str, section: &Section) -> Result<SectionRow, DatabaseError> {
    let mapping = section
        .mapping
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::MappingJson {
            job_id: job_id.to_string(),
            index: section.index,
            source: e,
        })?;

    Ok(SectionRow {
        job_id: job_id.to_string(),
        section_index: section.index,
        heading: section.heading.clone(),
        page_number: section.page_number,
        section_type: section.section_type.clone(),
        content: section.content.clone(),
        status: section.status.as_str().to_string(),
        mapping,
        unmapped_reason: section.unmapped_reason.clone(),
        updated_at: format_timestamp(section.updated_at),
    })
}

fn section_from_row(row: SectionRow) -> Section {
    let mut status = parse_section_status(&row.status, &row.job_id, row.section_index);
    let mut unmapped_reason = row.unmapped_reason;
    let mapping = match row.mapping.as_deref().map(serde_json::from_str::<SectionMapping>) {
        Some(Ok(mapping)) => Some(mapping),
        Some(Err(e)) => {
            log::warn!(
                "Unreadable mapping for job {} section {}: {}",
                row.job_id,
                row.section_index,
                e
            );
            None
        }
        None => None,
    };

    if status == SectionStatus::Mapped && mapping.is_none() {
        status = SectionStatus::Unmapped;
        unmapped_reason = Some("stored mapping could not be read".to_string());
    }

    Section {
        index: row.section_index,
        heading: row.heading,
        page_number: row.page_number,
        section_type: row.section_type,
        content: row.content,
        status,
        mapping: if status == SectionStatus::Mapped {
            mapping
        } else {
            None
        },
        unmapped_reason,
        updated_at: parse_timestamp(&row.updated_at),
    }
}

/// Rebuilds a job from its stored rows.
pub(crate) fn job_from_rows(
    row: JobRow,
    sections: Vec<SectionRow>,
    applied: Vec<(String, String)>,
) -> ImportJob {
    let state = parse_state(&row.state, &row.id);
    let stage = parse_stage(&row.stage, &row.id);
    let error = match (row.error_code, row.error_message) {
        (Some(code), Some(message)) => Some(ErrorDetail { code, message }),
        (Some(code), None) => Some(ErrorDetail {
            message: code.clone(),
            code,
        }),
        (None, Some(message)) => Some(ErrorDetail::new(ErrorDetail::EXTRACTION_FAILED, &message)),
        (None, None) => None,
    };

    let sections: BTreeMap<u32, Section> = sections
        .into_iter()
        .map(section_from_row)
        .map(|s| (s.index, s))
        .collect();

    let applied_codes: BTreeSet<TaxonomyCode> = applied
        .into_iter()
        .map(|(category, item)| TaxonomyCode { category, item })
        .collect();

    let mut job = ImportJob {
        id: row.id,
        target_document_id: row.target_document_id,
        source: SourceFileMeta {
            filename: row.filename,
            byte_size: u64::try_from(row.byte_size).unwrap_or_default(),
            media_type: row.media_type,
        },
        state,
        progress: JobProgress {
            stage,
            description: row.description,
            total_sections: row.total_sections,
            sections_processed: row.sections_processed,
            created_at: parse_timestamp(&row.created_at),
            stage_entered_at: parse_timestamp(&row.stage_entered_at),
            completed_at: parse_optional_timestamp(row.completed_at.as_deref()),
            review_ready_at: parse_optional_timestamp(row.review_ready_at.as_deref()),
            applied_at: parse_optional_timestamp(row.applied_at.as_deref()),
        },
        counts: SectionCounts {
            mapped: row.mapped_count,
            unmapped: row.unmapped_count,
            failed: row.failed_count,
        },
        error,
        external_ref: row.external_ref,
        sections,
        applied_codes,
        recent_events: VecDeque::new(),
        updated_at: parse_timestamp(&row.updated_at),
        applying: false,
    };

    let stored = job.counts;
    job.recount();
    if stored != job.counts {
        log::warn!(
            "Job {}: stored counts {:?} disagree with sections, using {:?}",
            job.id,
            stored,
            job.counts
        );
    }
    job
}
