//! Read-only polling surface over import jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ImportError;
use crate::model::{
    ErrorDetail, ImportJob, LifecycleState, MappingEvent, ProcessingStage, Section, SectionCounts,
};
use crate::store::JobStore;

/// Section progress numbers.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections_total: Option<u32>,
    pub sections_processed: u32,
    pub percent_complete: u8,
}

/// Point-in-time status of one job, as returned to pollers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub target_document_id: String,
    pub filename: String,
    pub media_type: String,
    pub byte_size: u64,
    pub state: LifecycleState,
    pub stage: ProcessingStage,
    pub description: String,
    pub progress: ProgressSummary,
    pub counts: SectionCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub applying: bool,
    pub created_at: DateTime<Utc>,
    pub stage_entered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_ready_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_events: Vec<MappingEvent>,
    /// Suggested delay before the next poll; absent once nothing will change
    /// without reviewer action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_after_ms: Option<u64>,
}

impl JobSnapshot {
    pub fn from_job(job: &ImportJob, poll_interval_ms: u64) -> Self {
        let still_moving = job.state.accepts_results() || job.is_applying();
        Self {
            job_id: job.id.clone(),
            target_document_id: job.target_document_id.clone(),
            filename: job.source.filename.clone(),
            media_type: job.source.media_type.clone(),
            byte_size: job.source.byte_size,
            state: job.state,
            stage: job.progress.stage,
            description: job.progress.description.clone(),
            progress: ProgressSummary {
                sections_total: job.progress.total_sections,
                sections_processed: job.progress.sections_processed,
                percent_complete: job.percent_complete(),
            },
            counts: job.counts,
            error: job.error.clone(),
            applying: job.is_applying(),
            created_at: job.progress.created_at,
            stage_entered_at: job.progress.stage_entered_at,
            completed_at: job.progress.completed_at,
            review_ready_at: job.progress.review_ready_at,
            applied_at: job.progress.applied_at,
            updated_at: job.updated_at,
            recent_events: job.recent_events.iter().cloned().collect(),
            poll_after_ms: still_moving.then_some(poll_interval_ms),
        }
    }
}

/// Answer to a section listing request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SectionListing {
    /// The job has not become reviewable yet.
    NotReady { state: LifecycleState },
    /// Sections in ascending index order.
    Ready { sections: Vec<Section> },
}

/// Polling has no side effects on jobs.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<JobStore>,
    poll_interval_ms: u64,
}

impl ProgressReporter {
    pub fn new(store: Arc<JobStore>, poll_interval_ms: u64) -> Self {
        Self {
            store,
            poll_interval_ms,
        }
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobSnapshot, ImportError> {
        self.store
            .with_job(job_id, |job| JobSnapshot::from_job(job, self.poll_interval_ms))
    }

    /// Lists sections once the job has been reviewable, or has failed.
    pub fn get_sections(&self, job_id: &str) -> Result<SectionListing, ImportError> {
        self.store.with_job(job_id, |job| {
            let ready = job.progress.review_ready_at.is_some() || job.state == LifecycleState::Failed;
            if ready {
                SectionListing::Ready {
                    sections: job.sections_ordered(),
                }
            } else {
                SectionListing::NotReady { state: job.state }
            }
        })
    }

    /// Import history of one target document, newest first.
    pub fn jobs_for_target(&self, target_document_id: &str) -> Vec<JobSnapshot> {
        self.store
            .jobs_for_target(target_document_id)
            .iter()
            .map(|job| JobSnapshot::from_job(job, self.poll_interval_ms))
            .collect()
    }
}
