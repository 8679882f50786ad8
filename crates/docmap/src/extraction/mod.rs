//! Boundary to the external extraction/classification service.

pub mod client;
pub mod error;
pub mod http;
pub mod message;

pub use client::{DispatchReceipt, ExtractionRequest, ExtractionService};
pub use error::ExtractionError;
pub use http::HttpExtractionService;
pub use message::{RecordStatus, SectionRecord, ServiceMessage};
