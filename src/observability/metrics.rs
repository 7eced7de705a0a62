//! Metrics for the address resolver
//!
//! Recording goes through the `metrics` facade. Until `init()` installs the
//! Prometheus recorder every call is a no-op, which keeps library code and
//! tests free of setup.

use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Pipeline metrics
    PipelineResolutions,
    PipelineDuration,
    PipelineStepFailures,
    PipelineTimeouts,

    // Registry metrics
    RegistryStrategyHits,
    RegistryNoMatch,
    RegistryQueryErrors,

    // Worker pool metrics
    PoolJobsDispatched,
    PoolWorkerCrashes,
    PoolRunDuration,

    // Batch queue metrics
    QueueChunksEnqueued,
    QueueChunksCompleted,
    QueueChunksRedelivered,
    QueueBatchesCompleted,
    QueueResultsPurged,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PipelineResolutions => "resolver_pipeline_resolutions_total",
            MetricName::PipelineDuration => "resolver_pipeline_duration_seconds",
            MetricName::PipelineStepFailures => "resolver_pipeline_step_failures_total",
            MetricName::PipelineTimeouts => "resolver_pipeline_timeouts_total",

            MetricName::RegistryStrategyHits => "resolver_registry_strategy_hits_total",
            MetricName::RegistryNoMatch => "resolver_registry_no_match_total",
            MetricName::RegistryQueryErrors => "resolver_registry_query_errors_total",

            MetricName::PoolJobsDispatched => "resolver_pool_jobs_dispatched_total",
            MetricName::PoolWorkerCrashes => "resolver_pool_worker_crashes_total",
            MetricName::PoolRunDuration => "resolver_pool_run_duration_seconds",

            MetricName::QueueChunksEnqueued => "resolver_queue_chunks_enqueued_total",
            MetricName::QueueChunksCompleted => "resolver_queue_chunks_completed_total",
            MetricName::QueueChunksRedelivered => "resolver_queue_chunks_redelivered_total",
            MetricName::QueueBatchesCompleted => "resolver_queue_batches_completed_total",
            MetricName::QueueResultsPurged => "resolver_queue_results_purged_total",
        }
    }
}

static PROMETHEUS: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is harmless.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if PROMETHEUS.get().is_some() {
        return Ok(());
    }
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    PROMETHEUS.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Prometheus text exposition, if the recorder is installed
pub fn render() -> Option<String> {
    PROMETHEUS.get().map(|h| h.render())
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

pub mod pipeline {
    use super::MetricName;

    pub fn resolution_finished(source: &str, elapsed_ms: u64) {
        ::metrics::counter!(MetricName::PipelineResolutions.as_str(), "source" => source.to_string())
            .increment(1);
        ::metrics::histogram!(MetricName::PipelineDuration.as_str()).record(elapsed_ms as f64 / 1000.0);
    }

    pub fn step_failed(step: &str) {
        ::metrics::counter!(MetricName::PipelineStepFailures.as_str(), "step" => step.to_string())
            .increment(1);
    }

    pub fn timeout() {
        ::metrics::counter!(MetricName::PipelineTimeouts.as_str()).increment(1);
    }
}

// ============================================================================
// Registry Metrics
// ============================================================================

pub mod registry {
    use super::MetricName;

    pub fn strategy_hit(strategy: &str) {
        ::metrics::counter!(MetricName::RegistryStrategyHits.as_str(), "strategy" => strategy.to_string())
            .increment(1);
    }

    pub fn no_match() {
        ::metrics::counter!(MetricName::RegistryNoMatch.as_str()).increment(1);
    }

    pub fn query_error() {
        ::metrics::counter!(MetricName::RegistryQueryErrors.as_str()).increment(1);
    }
}

// ============================================================================
// Worker Pool Metrics
// ============================================================================

pub mod pool {
    use super::MetricName;

    pub fn job_dispatched() {
        ::metrics::counter!(MetricName::PoolJobsDispatched.as_str()).increment(1);
    }

    pub fn worker_crashed() {
        ::metrics::counter!(MetricName::PoolWorkerCrashes.as_str()).increment(1);
    }

    pub fn run_finished(secs: f64) {
        ::metrics::histogram!(MetricName::PoolRunDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Batch Queue Metrics
// ============================================================================

pub mod queue {
    use super::MetricName;

    pub fn chunks_enqueued(count: usize) {
        ::metrics::counter!(MetricName::QueueChunksEnqueued.as_str()).increment(count as u64);
    }

    pub fn chunk_completed() {
        ::metrics::counter!(MetricName::QueueChunksCompleted.as_str()).increment(1);
    }

    pub fn chunk_redelivered() {
        ::metrics::counter!(MetricName::QueueChunksRedelivered.as_str()).increment(1);
    }

    pub fn batch_completed() {
        ::metrics::counter!(MetricName::QueueBatchesCompleted.as_str()).increment(1);
    }

    pub fn results_purged(count: usize) {
        ::metrics::counter!(MetricName::QueueResultsPurged.as_str()).increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_use_resolver_prefix() {
        for name in [
            MetricName::PipelineResolutions,
            MetricName::RegistryStrategyHits,
            MetricName::PoolWorkerCrashes,
            MetricName::QueueBatchesCompleted,
        ] {
            assert!(name.as_str().starts_with("resolver_"));
            assert_eq!(name.to_string(), name.as_str());
        }
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        pipeline::resolution_finished("partner", 120);
        queue::chunks_enqueued(5);
    }
}
