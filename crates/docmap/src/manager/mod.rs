//! Job manager: upload intake, dispatch and callback handling.

pub mod inbox;
pub mod job_manager;

pub use inbox::CallbackInbox;
pub use job_manager::{JobManager, UploadedDocument};
