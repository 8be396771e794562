//! The record store contract consumed by the worker.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{FileUpload, Fields, ListQuery, ListResponse, Precondition, Record};

/// Document store with filtered list, get, create and partial update.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List records matching `query`.
    async fn list(&self, collection: &str, query: &ListQuery) -> StoreResult<ListResponse<Record>>;

    /// Get a record by id. `Ok(None)` when it does not exist.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>>;

    /// Create a record. The store assigns the id unless `fields` carries one.
    ///
    /// Fails with `StoreError::AlreadyExists` when the id or a unique field
    /// is taken. Never retried.
    async fn create(&self, collection: &str, fields: Fields) -> StoreResult<Record>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Partial update of the given fields only.
    async fn patch(&self, collection: &str, id: &str, fields: Fields) -> StoreResult<Record>;

    /// Partial update that also stores a file in `file.field`.
    async fn patch_with_file(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        file: &FileUpload,
    ) -> StoreResult<Record>;

    /// Partial update applied only if `precondition` holds for the stored
    /// record. Fails with `StoreError::PreconditionFailed` otherwise.
    ///
    /// Not every backend can make the check and the write one step; use a
    /// unique `create` where two writers must never both succeed.
    async fn patch_if(
        &self,
        collection: &str,
        id: &str,
        precondition: &Precondition,
        fields: Fields,
    ) -> StoreResult<Record>;

    /// Add `by` to a numeric field and return the new value.
    ///
    /// Sent at most once: a lost response is reported as an error rather
    /// than risk counting twice.
    async fn increment(&self, collection: &str, id: &str, field: &str, by: i64) -> StoreResult<i64>;

    /// Download a file attached to a record into `dest`.
    ///
    /// Fails with `StoreError::PayloadTooLarge` once more than `max_bytes`
    /// would be written; no partial file is left behind. Returns the number
    /// of bytes written.
    async fn download_file(
        &self,
        collection: &str,
        id: &str,
        file_name: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> StoreResult<u64>;
}
