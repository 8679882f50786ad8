//! Reviewer decisions on machine-suggested mappings.

use std::sync::Arc;

use serde::Serialize;

use crate::error::ImportError;
use crate::model::{LifecycleState, MappingEvent, SectionMapping, SectionStatus};
use crate::sanitize;
use crate::store::JobStore;

const PREVIEW_CHARS: usize = 160;

/// Result of a discard request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardOutcome {
    Discarded,
    AlreadyDiscarded,
}

/// One line of the reviewer's decision list.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub status: SectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<SectionMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub preview: String,
    /// The classifier could not place this section.
    pub needs_attention: bool,
}

#[derive(Clone)]
pub struct MappingReconciler {
    store: Arc<JobStore>,
    event_cap: usize,
}

impl MappingReconciler {
    pub fn new(store: Arc<JobStore>, event_cap: usize) -> Self {
        Self { store, event_cap }
    }

    /// Rejects the suggested mapping of one section.
    ///
    /// Only mapped sections of a reviewable job can be discarded. Discarding
    /// an already-discarded section is a no-op.
    pub fn discard_mapping(&self, job_id: &str, index: u32) -> Result<DiscardOutcome, ImportError> {
        self.store.with_job(job_id, |job| {
            let invalid = |job_state: LifecycleState, reason: String| ImportError::InvalidState {
                job_id: job_id.to_string(),
                state: job_state,
                reason,
            };

            if !job.state.is_reviewable() {
                return Err(invalid(
                    job.state,
                    "mappings can only be discarded during review".to_string(),
                ));
            }
            if job.is_applying() {
                return Err(invalid(job.state, "apply in progress".to_string()));
            }

            let status = job
                .sections
                .get(&index)
                .map(|s| s.status)
                .ok_or_else(|| ImportError::SectionNotFound {
                    job_id: job_id.to_string(),
                    index,
                })?;
            match status {
                SectionStatus::Discarded => return Ok(DiscardOutcome::AlreadyDiscarded),
                SectionStatus::Mapped => {}
                other => {
                    return Err(invalid(
                        job.state,
                        format!("section {} is {}, only mapped sections can be discarded", index, other),
                    ))
                }
            }
            if !job.applied_codes.is_empty() {
                return Err(invalid(
                    job.state,
                    "an earlier apply already wrote to the target; retry apply or cancel".to_string(),
                ));
            }

            let event = match job.sections.get_mut(&index) {
                Some(section) => {
                    section.discard();
                    MappingEvent::from_section(section)
                }
                None => {
                    return Err(ImportError::SectionNotFound {
                        job_id: job_id.to_string(),
                        index,
                    })
                }
            };
            job.push_event(event, self.event_cap);
            job.recount();
            job.touch();
            self.store.persist(job, [index]);

            log::info!(
                "Job {}: mapping of section {} discarded ({} mapped, {} unmapped)",
                job.id,
                index,
                job.counts.mapped,
                job.counts.unmapped
            );
            Ok(DiscardOutcome::Discarded)
        })?
    }

    /// Decision list for the reviewer, in section order.
    pub fn review(&self, job_id: &str) -> Result<Vec<ReviewItem>, ImportError> {
        self.store.with_job(job_id, |job| {
            if job.progress.review_ready_at.is_none() && job.state != LifecycleState::Failed {
                return Err(ImportError::InvalidState {
                    job_id: job.id.clone(),
                    state: job.state,
                    reason: "job is not ready for review".to_string(),
                });
            }

            Ok(job
                .sections
                .values()
                .map(|section| ReviewItem {
                    index: section.index,
                    heading: section.heading.clone(),
                    page_number: section.page_number,
                    status: section.status,
                    mapping: section.mapping.clone(),
                    reason: section.unmapped_reason.clone(),
                    preview: sanitize::preview(&section.content, PREVIEW_CHARS),
                    needs_attention: matches!(
                        section.status,
                        SectionStatus::Unmapped | SectionStatus::Failed
                    ),
                })
                .collect())
        })?
    }
}
