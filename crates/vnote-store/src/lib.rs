//! PocketBase REST API client.
//!
//! This crate provides:
//! - A [`RecordStore`] trait describing the record operations the worker needs
//! - [`PocketBaseClient`], the HTTP implementation with password auth,
//!   re-authentication on 401, retry with backoff and jitter, and metrics
//! - [`InMemoryStore`], a process-local implementation for tests and dry runs
//! - Filter helpers that quote values the way the PocketBase filter grammar expects

pub mod auth;
pub mod client;
pub mod error;
pub mod filter;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod types;

#[cfg(test)]
mod client_tests;

pub use client::{PocketBaseClient, PocketBaseConfig};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use retry::RetryConfig;
pub use store::RecordStore;
pub use types::{FileUpload, Fields, ListQuery, ListResponse, Precondition, Record};
