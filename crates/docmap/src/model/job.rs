//! Import job record and its lifecycle state machine.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::section::{Section, SectionReport, SectionStatus};
use super::taxonomy::TaxonomyCode;
use crate::error::ImportError;

// ─── Lifecycle ──────────────────────────────────────────────────────────────

/// Lifecycle state of an import job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Processing,
    Completed,
    PartiallyCompleted,
    Failed,
    Cancelled,
    Applied,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Processing => "processing",
            LifecycleState::Completed => "completed",
            LifecycleState::PartiallyCompleted => "partially_completed",
            LifecycleState::Failed => "failed",
            LifecycleState::Cancelled => "cancelled",
            LifecycleState::Applied => "applied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LifecycleState::Pending),
            "processing" => Some(LifecycleState::Processing),
            "completed" => Some(LifecycleState::Completed),
            "partially_completed" => Some(LifecycleState::PartiallyCompleted),
            "failed" => Some(LifecycleState::Failed),
            "cancelled" => Some(LifecycleState::Cancelled),
            "applied" => Some(LifecycleState::Applied),
            _ => None,
        }
    }

    /// No further automatic transition leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Failed | LifecycleState::Cancelled | LifecycleState::Applied
        )
    }

    /// Processing finished and the reviewer may discard or apply.
    pub fn is_reviewable(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::PartiallyCompleted
        )
    }

    /// The extraction service may still move the job forward.
    pub fn accepts_results(&self) -> bool {
        matches!(self, LifecycleState::Pending | LifecycleState::Processing)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained processing stage shown while polling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Queued,
    Extracting,
    Classifying,
    AwaitingReview,
    Applying,
    Applied,
    Failed,
    Cancelled,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Queued => "queued",
            ProcessingStage::Extracting => "extracting",
            ProcessingStage::Classifying => "classifying",
            ProcessingStage::AwaitingReview => "awaiting_review",
            ProcessingStage::Applying => "applying",
            ProcessingStage::Applied => "applied",
            ProcessingStage::Failed => "failed",
            ProcessingStage::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ProcessingStage::Queued),
            "extracting" => Some(ProcessingStage::Extracting),
            "classifying" => Some(ProcessingStage::Classifying),
            "awaiting_review" => Some(ProcessingStage::AwaitingReview),
            "applying" => Some(ProcessingStage::Applying),
            "applied" => Some(ProcessingStage::Applied),
            "failed" => Some(ProcessingStage::Failed),
            "cancelled" => Some(ProcessingStage::Cancelled),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ProcessingStage::Queued => 0,
            ProcessingStage::Extracting => 1,
            ProcessingStage::Classifying => 2,
            ProcessingStage::AwaitingReview => 3,
            ProcessingStage::Applying => 4,
            ProcessingStage::Applied => 5,
            ProcessingStage::Failed | ProcessingStage::Cancelled => 6,
        }
    }

    /// Stages the extraction service is allowed to report.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            ProcessingStage::Extracting | ProcessingStage::Classifying
        )
    }

    pub fn default_description(&self) -> &'static str {
        match self {
            ProcessingStage::Queued => "Waiting to send document to the extraction service",
            ProcessingStage::Extracting => "Extracting sections from document",
            ProcessingStage::Classifying => "Classifying sections against the taxonomy",
            ProcessingStage::AwaitingReview => "Ready for review",
            ProcessingStage::Applying => "Merging accepted mappings into target document",
            ProcessingStage::Applied => "Mappings applied to target document",
            ProcessingStage::Failed => "Processing failed",
            ProcessingStage::Cancelled => "Import cancelled",
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Queued => write!(f, "Queued"),
            ProcessingStage::Extracting => write!(f, "Extracting"),
            ProcessingStage::Classifying => write!(f, "Classifying"),
            ProcessingStage::AwaitingReview => write!(f, "Awaiting review"),
            ProcessingStage::Applying => write!(f, "Applying"),
            ProcessingStage::Applied => write!(f, "Applied"),
            ProcessingStage::Failed => write!(f, "Failed"),
            ProcessingStage::Cancelled => write!(f, "Cancelled"),
        }
    }
}

// ─── Job parts ──────────────────────────────────────────────────────────────

/// Metadata of the uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceFileMeta {
    pub filename: String,
    pub byte_size: u64,
    pub media_type: String,
}

/// Progress fields of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub stage: ProcessingStage,
    pub description: String,
    /// Known once extraction finishes.
    pub total_sections: Option<u32>,
    pub sections_processed: u32,
    pub created_at: DateTime<Utc>,
    pub stage_entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub review_ready_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            stage: ProcessingStage::Queued,
            description: ProcessingStage::Queued.default_description().to_string(),
            total_sections: None,
            sections_processed: 0,
            created_at: now,
            stage_entered_at: now,
            completed_at: None,
            review_ready_at: None,
            applied_at: None,
        }
    }

    pub(crate) fn enter_stage(&mut self, stage: ProcessingStage, description: Option<&str>) {
        self.stage = stage;
        self.description = description
            .unwrap_or_else(|| stage.default_description())
            .to_string();
        self.stage_entered_at = Utc::now();
    }
}

/// Denormalized section counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SectionCounts {
    pub mapped: u32,
    /// Includes sections discarded by the reviewer.
    pub unmapped: u32,
    pub failed: u32,
}

impl SectionCounts {
    pub fn total(&self) -> u32 {
        self.mapped + self.unmapped + self.failed
    }
}

/// Error recorded on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    /// Fatal error reported by the extraction service.
    pub const EXTRACTION_FAILED: &'static str = "extraction_failed";
    /// The service never accepted the document.
    pub const DISPATCH_FAILED: &'static str = "dispatch_failed";
    /// No update arrived within the stale-job timeout.
    pub const TIMEOUT: &'static str = "timeout";

    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Progress message from the extraction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageUpdate {
    pub stage: ProcessingStage,
    pub description: Option<String>,
    pub total_sections: Option<u32>,
    pub sections_processed: Option<u32>,
}

/// A recent change to a section's mapping decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingEvent {
    pub section_index: u32,
    pub status: SectionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<TaxonomyCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    pub at: DateTime<Utc>,
}

impl MappingEvent {
    pub fn from_section(section: &Section) -> Self {
        Self {
            section_index: section.index,
            status: section.status,
            codes: section
                .mapping
                .as_ref()
                .map(|m| m.codes.clone())
                .unwrap_or_default(),
            confidence: section.mapping.as_ref().map(|m| m.confidence),
            at: Utc::now(),
        }
    }
}

/// How incoming section results are recorded.
#[derive(Debug, Clone, Copy)]
pub struct RecordPolicy {
    pub min_confidence: u8,
    pub event_cap: usize,
}

impl Default for RecordPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0,
            event_cap: 10,
        }
    }
}

/// Result of applying one message to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Changed,
    Unchanged,
    Ignored(&'static str),
}

impl UpdateOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, UpdateOutcome::Changed)
    }
}

/// Effect of a successful cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelEffect {
    /// The job is now cancelled; `signal` holds the external reference to notify, if any.
    Cancelled { signal: Option<String> },
    AlreadyCancelled,
}

// ─── ImportJob ──────────────────────────────────────────────────────────────

/// One tracked attempt to import a document into a target document.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub id: String,
    pub target_document_id: String,
    pub source: SourceFileMeta,
    pub state: LifecycleState,
    pub progress: JobProgress,
    pub counts: SectionCounts,
    pub error: Option<ErrorDetail>,
    /// Correlation id assigned by the extraction service.
    pub external_ref: Option<String>,
    /// Sections keyed (and therefore ordered) by index.
    pub sections: BTreeMap<u32, Section>,
    /// Codes already written to the target by earlier apply attempts.
    pub applied_codes: BTreeSet<TaxonomyCode>,
    pub recent_events: VecDeque<MappingEvent>,
    pub updated_at: DateTime<Utc>,
    pub(crate) applying: bool,
}

impl ImportJob {
    /// Creates a new job in `pending`.
    pub fn new(target_document_id: &str, source: SourceFileMeta) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_document_id: target_document_id.trim().to_string(),
            source,
            state: LifecycleState::Pending,
            progress: JobProgress::new(now),
            counts: SectionCounts::default(),
            error: None,
            external_ref: None,
            sections: BTreeMap::new(),
            applied_codes: BTreeSet::new(),
            recent_events: VecDeque::new(),
            updated_at: now,
            applying: false,
        }
    }

    /// Returns true while an apply attempt holds the job.
    pub fn is_applying(&self) -> bool {
        self.applying
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn push_event(&mut self, event: MappingEvent, cap: usize) {
        if cap == 0 {
            return;
        }
        while self.recent_events.len() >= cap {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event);
    }

    /// Sections in ascending index order.
    pub fn sections_ordered(&self) -> Vec<Section> {
        self.sections.values().cloned().collect()
    }

    /// Moves a pending job into processing. Returns true if it changed.
    fn begin_processing(&mut self) -> bool {
        if self.state != LifecycleState::Pending {
            return false;
        }
        self.state = LifecycleState::Processing;
        if self.progress.stage.rank() < ProcessingStage::Extracting.rank() {
            self.progress.enter_stage(ProcessingStage::Extracting, None);
        }
        true
    }

    /// Records that the extraction service accepted the document.
    pub(crate) fn mark_dispatched(&mut self, external_ref: &str) -> UpdateOutcome {
        match self.state {
            LifecycleState::Pending => {
                self.external_ref = Some(external_ref.to_string());
                self.begin_processing();
                self.touch();
                UpdateOutcome::Changed
            }
            // A callback overtook the dispatch receipt.
            LifecycleState::Processing if self.external_ref.is_none() => {
                self.external_ref = Some(external_ref.to_string());
                self.touch();
                UpdateOutcome::Changed
            }
            LifecycleState::Processing => UpdateOutcome::Unchanged,
            _ => UpdateOutcome::Ignored("job no longer awaiting dispatch"),
        }
    }

    /// Applies a progress update from the extraction service.
    pub(crate) fn apply_stage_update(&mut self, update: &StageUpdate) -> UpdateOutcome {
        if !self.state.accepts_results() {
            return UpdateOutcome::Ignored("job no longer processing");
        }
        let mut changed = self.begin_processing();

        if update.stage.is_external() {
            let current = self.progress.stage.rank();
            let incoming = update.stage.rank();
            if incoming > current {
                self.progress
                    .enter_stage(update.stage, update.description.as_deref());
                changed = true;
            } else if incoming == current {
                if let Some(description) = &update.description {
                    if *description != self.progress.description {
                        self.progress.description = description.clone();
                        changed = true;
                    }
                }
            }
        } else {
            log::debug!(
                "Job {}: ignoring non-service stage '{}' in progress update",
                self.id,
                update.stage.as_str()
            );
        }

        if let Some(total) = update.total_sections {
            changed |= self.set_total(total);
        }

        if let Some(processed) = update.sections_processed {
            let processed = match self.progress.total_sections {
                Some(total) => processed.min(total),
                None => processed,
            };
            if processed > self.progress.sections_processed {
                self.progress.sections_processed = processed;
                changed = true;
            }
        }

        if !changed {
            return UpdateOutcome::Unchanged;
        }

        self.touch();
        self.recount();
        self.evaluate_completion();
        UpdateOutcome::Changed
    }

    /// Records one section result. Late results for a failed job are kept for
    /// inspection but never revive it.
    pub(crate) fn record_section(
        &mut self,
        report: SectionReport,
        policy: RecordPolicy,
    ) -> UpdateOutcome {
        match self.state {
            LifecycleState::Pending => {
                self.begin_processing();
            }
            LifecycleState::Processing | LifecycleState::Failed => {}
            _ => return UpdateOutcome::Ignored("job no longer accepts section results"),
        }

        if let Some(total) = self.progress.total_sections {
            if report.index >= total {
                return UpdateOutcome::Ignored("section index outside known total");
            }
        }

        let incoming = Section::from_report(report, policy.min_confidence);
        if let Some(existing) = self.sections.get(&incoming.index) {
            if existing.same_decision(&incoming) {
                return UpdateOutcome::Unchanged;
            }
            if existing.status.is_classified() && !incoming.status.is_classified() {
                return UpdateOutcome::Ignored("classified section not regressed to pending");
            }
        }

        if incoming.status.is_classified() {
            self.push_event(MappingEvent::from_section(&incoming), policy.event_cap);
        }
        self.sections.insert(incoming.index, incoming);

        let classified = self
            .sections
            .values()
            .filter(|s| s.status.is_classified())
            .count() as u32;
        if classified > self.progress.sections_processed {
            self.progress.sections_processed = classified;
        }

        self.touch();
        self.recount();
        self.evaluate_completion();
        UpdateOutcome::Changed
    }

    /// Applies the service's completion signal.
    pub(crate) fn record_completion(&mut self, total_sections: u32) -> UpdateOutcome {
        if !self.state.accepts_results() {
            return UpdateOutcome::Ignored("job no longer processing");
        }
        let mut changed = self.begin_processing();
        changed |= self.set_total(total_sections);
        self.recount();
        changed |= self.evaluate_completion();

        if changed {
            self.touch();
            UpdateOutcome::Changed
        } else {
            UpdateOutcome::Unchanged
        }
    }

    /// Records the first fatal failure of a job still in flight.
    pub(crate) fn fail(&mut self, detail: ErrorDetail) -> UpdateOutcome {
        if !self.state.accepts_results() {
            return UpdateOutcome::Ignored("job already finished processing");
        }
        let description = format!("Processing failed: {}", detail.message);
        self.state = LifecycleState::Failed;
        self.error = Some(detail);
        self.progress.completed_at = Some(Utc::now());
        self.progress
            .enter_stage(ProcessingStage::Failed, Some(&description));
        self.touch();
        self.recount();
        UpdateOutcome::Changed
    }

    /// Cancels a non-terminal job.
    pub(crate) fn cancel(&mut self) -> Result<CancelEffect, ImportError> {
        match self.state {
            LifecycleState::Cancelled => Ok(CancelEffect::AlreadyCancelled),
            LifecycleState::Failed | LifecycleState::Applied => Err(ImportError::InvalidState {
                job_id: self.id.clone(),
                state: self.state,
                reason: "job already finished".to_string(),
            }),
            _ if self.applying => Err(ImportError::InvalidState {
                job_id: self.id.clone(),
                state: self.state,
                reason: "apply in progress".to_string(),
            }),
            LifecycleState::Pending | LifecycleState::Processing => {
                let signal = self.external_ref.clone();
                self.finish_cancel();
                Ok(CancelEffect::Cancelled { signal })
            }
            LifecycleState::Completed | LifecycleState::PartiallyCompleted => {
                if !self.applied_codes.is_empty() {
                    log::warn!(
                        "Job {}: cancelled after {} codes were already written to '{}'",
                        self.id,
                        self.applied_codes.len(),
                        self.target_document_id
                    );
                }
                self.finish_cancel();
                Ok(CancelEffect::Cancelled { signal: None })
            }
        }
    }

    fn finish_cancel(&mut self) {
        self.state = LifecycleState::Cancelled;
        if self.progress.completed_at.is_none() {
            self.progress.completed_at = Some(Utc::now());
        }
        self.progress.enter_stage(ProcessingStage::Cancelled, None);
        self.touch();
        self.recount();
    }

    /// Sets the total once. Returns true if it changed.
    fn set_total(&mut self, total: u32) -> bool {
        match self.progress.total_sections {
            Some(known) if known == total => false,
            Some(known) => {
                log::warn!(
                    "Job {}: ignoring conflicting section total {} (already {})",
                    self.id,
                    total,
                    known
                );
                false
            }
            None => {
                let highest = self
                    .sections
                    .keys()
                    .next_back()
                    .map(|i| i + 1)
                    .unwrap_or(0);
                let effective = if highest > total {
                    log::warn!(
                        "Job {}: section total {} is below recorded index {}, using {}",
                        self.id,
                        total,
                        highest - 1,
                        highest
                    );
                    highest
                } else {
                    total
                };
                self.progress.total_sections = Some(effective);
                true
            }
        }
    }

    /// Moves a processing job to `completed`/`partially_completed` once every
    /// expected section is classified.
    fn evaluate_completion(&mut self) -> bool {
        if self.state != LifecycleState::Processing {
            return false;
        }
        let Some(total) = self.progress.total_sections else {
            return false;
        };
        let classified = self
            .sections
            .values()
            .filter(|s| s.status.is_classified())
            .count() as u32;
        if classified < total {
            return false;
        }

        self.recount();
        self.state = if self.counts.unmapped == 0 && self.counts.failed == 0 {
            LifecycleState::Completed
        } else {
            LifecycleState::PartiallyCompleted
        };
        let now = Utc::now();
        self.progress.sections_processed = total;
        self.progress.completed_at = Some(now);
        self.progress.review_ready_at = Some(now);
        self.progress
            .enter_stage(ProcessingStage::AwaitingReview, None);
        true
    }

    /// Recomputes the denormalized counts from the section list.
    ///
    /// Counts stay zero until the total is known. Once a job is failed or
    /// cancelled, sections never accounted for count as failed.
    pub fn recount(&mut self) {
        let Some(total) = self.progress.total_sections else {
            self.counts = SectionCounts::default();
            return;
        };

        let mut counts = SectionCounts::default();
        for section in self.sections.values() {
            match section.status {
                SectionStatus::Mapped => counts.mapped += 1,
                SectionStatus::Unmapped | SectionStatus::Discarded => counts.unmapped += 1,
                SectionStatus::Failed => counts.failed += 1,
                SectionStatus::Pending => {}
            }
        }

        if matches!(
            self.state,
            LifecycleState::Failed | LifecycleState::Cancelled
        ) {
            counts.failed = total.saturating_sub(counts.mapped + counts.unmapped);
        }

        self.counts = counts;
    }

    /// Checks `mapped + unmapped + failed == total` for jobs that left processing.
    pub fn counts_consistent(&self) -> bool {
        match self.progress.total_sections {
            None => self.counts == SectionCounts::default(),
            Some(total) if !self.state.accepts_results() => self.counts.total() == total,
            Some(total) => self.counts.total() <= total,
        }
    }

    pub fn percent_complete(&self) -> u8 {
        if self.state.is_reviewable() || self.state == LifecycleState::Applied {
            return 100;
        }
        match self.progress.total_sections {
            Some(total) if total > 0 => {
                let pct = u64::from(self.progress.sections_processed) * 100 / u64::from(total);
                pct.min(100) as u8
            }
            _ => 0,
        }
    }
}
