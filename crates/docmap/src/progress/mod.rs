//! Progress reporting for pollers.

pub mod reporter;

pub use reporter::{JobSnapshot, ProgressReporter, ProgressSummary, SectionListing};
