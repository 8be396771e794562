//! Worker metrics.
//!
//! Job outcomes, poll cycle outcomes and stage durations. The Prometheus
//! exporter is installed only when `METRICS_ADDR` is set.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{Stage, WorkerError, WorkerResult};

/// Metric name constants for consistency.
pub mod names {
    /// Finished jobs by outcome (`completed`, `failed`).
    pub const JOBS_TOTAL: &str = "vnote_worker_jobs_total";

    /// Poll cycles by outcome.
    pub const TICKS_TOTAL: &str = "vnote_worker_ticks_total";

    /// Stage duration in seconds by stage and result.
    pub const STAGE_SECONDS: &str = "vnote_worker_stage_seconds";

    /// Non-fatal delivery and counter failures by stage.
    pub const SOFT_FAILURES_TOTAL: &str = "vnote_worker_soft_failures_total";
}

pub fn record_job(outcome: &'static str) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_tick(outcome: &'static str) {
    counter!(names::TICKS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_stage(stage: Stage, ok: bool, elapsed: Duration) {
    histogram!(
        names::STAGE_SECONDS,
        "stage" => stage.as_str(),
        "result" => if ok { "ok" } else { "error" }
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_soft_failure(stage: Stage) {
    counter!(names::SOFT_FAILURES_TOTAL, "stage" => stage.as_str()).increment(1);
}

/// Serve `/metrics` on `addr`.
pub fn install_prometheus(addr: &str) -> WorkerResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| WorkerError::config_error(format!("invalid METRICS_ADDR {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("failed to start metrics exporter: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_metrics_addr() {
        assert!(matches!(
            install_prometheus("not-an-address"),
            Err(WorkerError::ConfigError(_))
        ));
    }
}
