//! Job store: the durable record of every import job.

pub mod job_store;
mod rows;

pub use job_store::{lock_job, JobHandle, JobStore};
