//! Domain model: jobs, sections and taxonomy codes.

pub mod job;
pub mod section;
pub mod taxonomy;

pub use job::{
    CancelEffect, ErrorDetail, ImportJob, JobProgress, LifecycleState, MappingEvent,
    ProcessingStage, RecordPolicy, SectionCounts, SourceFileMeta, StageUpdate, UpdateOutcome,
};
pub use section::{
    clamp_confidence, MappingOrigin, Section, SectionMapping, SectionOutcome, SectionReport,
    SectionStatus,
};
pub use taxonomy::TaxonomyCode;
