use crate::common::constants::DEFAULT_PIPELINE_TIMEOUT_SECS;
use crate::common::error::ResolveError;
use crate::common::types::{Job, ResolutionResult};
use crate::observability::metrics;
use crate::pipeline::steps::ResolutionStep;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// Runs ranked resolution steps in order until one produces an address.
///
/// The whole run is bounded by `timeout`. When it fires, the step future is
/// dropped, which also drops any in-flight HTTP request it was awaiting.
#[derive(Clone)]
pub struct ResolutionPipeline {
    steps: Vec<Arc<dyn ResolutionStep>>,
    timeout: Duration,
}

impl Default for ResolutionPipeline {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_PIPELINE_TIMEOUT_SECS))
    }
}

impl ResolutionPipeline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            timeout,
        }
    }

    pub fn with_step(mut self, step: Arc<dyn ResolutionStep>) -> Self {
        self.append(step);
        self
    }

    pub fn append(&mut self, step: Arc<dyn ResolutionStep>) {
        self.steps.push(step);
    }

    /// Insert at `rank`, clamped to the end of the list.
    pub fn insert(&mut self, rank: usize, step: Arc<dyn ResolutionStep>) {
        let at = rank.min(self.steps.len());
        self.steps.insert(at, step);
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn resolve(&self, job: &Job) -> ResolutionResult {
        let span = info_span!("resolve", identifier = %job.identifier);
        let started = Instant::now();
        let mut errors = Vec::new();

        let outcome = tokio::time::timeout(self.timeout, self.run_steps(job, &mut errors))
            .instrument(span)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let identifier = job.identifier.as_str();

        let result = match outcome {
            Ok(Some(mut result)) => {
                result.response_time_ms = elapsed_ms;
                result.errors = errors;
                info!(identifier, source = result.source_tag.as_str(), elapsed_ms, "resolved");
                result
            }
            Ok(None) => {
                warn!(identifier, steps = errors.len(), elapsed_ms, "all resolution steps failed");
                ResolutionResult::failure(errors, elapsed_ms)
            }
            Err(_) => {
                let e = ResolveError::timeout("resolution pipeline", elapsed_ms);
                warn!(identifier, elapsed_ms, "resolution timed out");
                metrics::pipeline::timeout();
                errors.push(e.to_string());
                ResolutionResult::failure(errors, elapsed_ms)
            }
        };
        metrics::pipeline::resolution_finished(result.source_tag.as_str(), elapsed_ms);
        result
    }

    /// Earlier step errors are pushed into `errors` as they happen, so they
    /// survive a timeout that drops this future.
    async fn run_steps(&self, job: &Job, errors: &mut Vec<String>) -> Option<ResolutionResult> {
        for step in &self.steps {
            match step.attempt(job).await {
                Ok(found) if !found.address.trim().is_empty() => {
                    let mut metadata = found.metadata;
                    metadata.insert("step".to_string(), json!(step.name()));
                    return Some(ResolutionResult {
                        success: true,
                        address: Some(found.address),
                        confidence: step.confidence(),
                        source_tag: step.source_tag(),
                        strategy: found.strategy,
                        response_time_ms: 0,
                        errors: Vec::new(),
                        metadata,
                    });
                }
                Ok(_) => {
                    warn!(step = step.name(), "step reported success without an address");
                    errors.push(format!("{}: returned an empty address", step.name()));
                }
                Err(e) => {
                    if e.is_recoverable() {
                        warn!(step = step.name(), error = %e, "step failed");
                    } else {
                        // local faults (config, storage, io) still fall through to the next step
                        error!(step = step.name(), error = %e, "step failed on an internal error");
                    }
                    metrics::pipeline::step_failed(step.name());
                    errors.push(format!("{}: {}", step.name(), e));
                }
            }
        }
        None
    }
}
