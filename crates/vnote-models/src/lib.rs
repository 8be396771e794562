//! Shared data models for the VNote worker.
//!
//! This crate provides Serde-serializable types for:
//! - Circle jobs as stored in the remote record store
//! - The job status state machine and its string encoding
//! - User records referenced by jobs

pub mod job;
pub mod job_status;
pub mod user;
pub mod utils;

// Re-export common types
pub use job::{Job, JobId};
pub use job_status::{JobStatus, UnknownStatus, MAX_ERROR_DETAIL_LEN, MAX_STATUS_LEN};
pub use user::User;
pub use utils::{format_bytes, truncate_chars};
