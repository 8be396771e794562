//! Poll loop.
//!
//! One job in flight at a time: fetch, claim, execute, repeat. An empty
//! queue sleeps for the idle delay; store failures back off with jitter.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::fetcher::JobFetcher;
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::retry::{Backoff, FailureTracker};
use crate::transitions::ClaimOutcome;

/// Consecutive store failures logged before suppression kicks in.
const MAX_LOGGED_FAILURES: u32 = 5;

/// Result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing queued
    Idle,
    /// A job ran to `completed`
    Processed,
    /// A job ended in the error state
    Failed,
    /// Another worker claimed the job first
    ClaimLost,
    /// The claim write failed
    ClaimFailed,
    /// The queue could not be read
    FetchFailed,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Idle => "idle",
            TickOutcome::Processed => "processed",
            TickOutcome::Failed => "failed",
            TickOutcome::ClaimLost => "claim_lost",
            TickOutcome::ClaimFailed => "claim_failed",
            TickOutcome::FetchFailed => "fetch_failed",
        }
    }

    /// Whether the store misbehaved this cycle.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, TickOutcome::ClaimFailed | TickOutcome::FetchFailed)
    }
}

/// Job executor that polls the record store for queued jobs.
pub struct JobExecutor {
    fetcher: JobFetcher,
    pipeline: Pipeline,
    idle_delay: Duration,
    backoff: Backoff,
    failures: FailureTracker,
}

impl JobExecutor {
    pub fn new(fetcher: JobFetcher, pipeline: Pipeline, config: &WorkerConfig) -> Self {
        Self {
            fetcher,
            pipeline,
            idle_delay: config.idle_delay,
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            failures: FailureTracker::new("record store", MAX_LOGGED_FAILURES),
        }
    }

    /// Run one poll cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.poll_once().await;
        metrics::record_tick(outcome.as_str());
        outcome
    }

    async fn poll_once(&mut self) -> TickOutcome {
        let mut job = match self.fetcher.fetch_next_queued().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.failures.record_success();
                return TickOutcome::Idle;
            }
            Err(e) => {
                if self.failures.record_failure() {
                    warn!(error = %e, failures = self.failures.failure_count(), "Failed to fetch queued job");
                }
                return TickOutcome::FetchFailed;
            }
        };
        self.failures.record_success();

        match self.pipeline.status_manager().claim(&mut job).await {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::Lost) => {
                debug!(job_id = %job.id, "Job claimed by another worker, skipping");
                return TickOutcome::ClaimLost;
            }
            Err(e) => {
                if self.failures.record_failure() {
                    warn!(job_id = %job.id, error = %e, "Failed to claim job");
                }
                return TickOutcome::ClaimFailed;
            }
        }

        let report = self.pipeline.execute(&mut job).await;
        if report.is_success() {
            TickOutcome::Processed
        } else {
            TickOutcome::Failed
        }
    }

    /// Delay before the next cycle.
    pub fn delay_after(&mut self, outcome: TickOutcome) -> Duration {
        if outcome.is_store_failure() {
            return self.backoff.next_delay();
        }
        self.backoff.reset();
        match outcome {
            TickOutcome::Idle => self.idle_delay,
            _ => Duration::ZERO,
        }
    }

    /// Poll until `shutdown` flips to `true`.
    ///
    /// A job in flight always runs to the end; shutdown is observed between
    /// cycles and during sleeps.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.pipeline.status_manager().worker_id(),
            collection = %self.fetcher.collection(),
            "Starting poll loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.tick().await;
            let delay = self.delay_after(outcome);
            if outcome.is_store_failure() {
                debug!(delay_ms = delay.as_millis() as u64, attempt = self.backoff.attempts(), "Backing off");
            }

            if delay.is_zero() {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        error!("Shutdown channel closed, stopping poll loop");
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Poll loop stopped");
    }
}
