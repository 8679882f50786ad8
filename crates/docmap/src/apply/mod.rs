//! Apply engine: merges reviewed mappings into the target document.

pub mod engine;
pub mod plan;
pub mod target;

pub use engine::{ApplyEngine, ApplyOutcome};
pub use plan::{ApplyPlan, PlannedWrite};
pub use target::{TargetDocumentWriter, TargetWriteError};
