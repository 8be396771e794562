//! Queue polling against the record store.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};
use vnote_models::{truncate_chars, Job, JobStatus, MAX_ERROR_DETAIL_LEN};
use vnote_store::{filter, Fields, ListQuery, Precondition, Record, RecordStore, StoreError};

use crate::error::FetchError;

/// Undecodable records set aside in one fetch before reporting an empty queue.
const MAX_SET_ASIDE_PER_FETCH: usize = 10;

/// Finds the oldest queued job in a collection.
#[derive(Clone)]
pub struct JobFetcher {
    store: Arc<dyn RecordStore>,
    collection: String,
}

impl JobFetcher {
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fetch the next queued job, oldest first.
    ///
    /// `Ok(None)` means the queue is empty. A record that decodes with any
    /// status other than `queued` is dropped so finished work is never re-run.
    /// A queued record that does not decode is moved to the error state so
    /// the jobs behind it still run.
    pub async fn fetch_next_queued(&self) -> Result<Option<Job>, FetchError> {
        let query = ListQuery::new()
            .filter(filter::eq("status", JobStatus::Queued.as_str()))
            .sort("created,id")
            .per_page(1)
            .skip_total();

        for _ in 0..=MAX_SET_ASIDE_PER_FETCH {
            let response = self.store.list(&self.collection, &query).await?;

            let Some(record) = response.items.into_iter().next() else {
                return Ok(None);
            };

            match record.decode::<Job>() {
                Ok(job) => return Ok(Self::accept(job)),
                Err(e) => self.set_aside(&record, &e).await?,
            }
        }

        warn!(
            collection = %self.collection,
            limit = MAX_SET_ASIDE_PER_FETCH,
            "Too many undecodable queued records in one fetch, trying again next cycle"
        );
        Ok(None)
    }

    fn accept(job: Job) -> Option<Job> {
        if job.status != JobStatus::Queued {
            warn!(
                job_id = %job.id,
                status = %job.status,
                "Queue query returned a job that is not queued, ignoring"
            );
            return None;
        }

        debug!(job_id = %job.id, "Fetched queued job");
        Some(job)
    }

    /// Mark an undecodable queued record as failed.
    async fn set_aside(&self, record: &Record, cause: &StoreError) -> Result<(), FetchError> {
        let id = record
            .id()
            .ok_or_else(|| StoreError::invalid_response(format!("queued record without id: {}", cause)))?;
        error!(job_id = %id, error = %cause, "Queued record does not decode, marking it failed");

        let status = JobStatus::error(format!("undecodable record: {}", cause));
        let detail = truncate_chars(&cause.to_string(), MAX_ERROR_DETAIL_LEN).to_string();
        let mut fields = Fields::new();
        fields.insert("status".into(), Value::String(status.encode()));
        fields.insert("last_error".into(), Value::String(detail));

        let precondition = Precondition::field_equals("status", JobStatus::Queued.encode());
        match self.store.patch_if(&self.collection, id, &precondition, fields).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_precondition_failed() || e.is_not_found() => {
                debug!(job_id = %id, "Undecodable record changed before it was set aside");
                Ok(())
            }
            Err(e) => Err(FetchError::StoreUnavailable(e)),
        }
    }
}
