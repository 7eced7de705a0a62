use crate::app::ports::PropertyStorePort;
use crate::batch::progress::{BatchProgress, ChunkTally};
use crate::batch::store::{BatchStore, ChunkCompletion, ChunkEntry};
use crate::common::error::Result;
use crate::common::types::{ResolutionResult, ResultRecord};
use crate::config::QueueConfig;
use crate::observability::metrics;
use crate::pipeline::ResolutionPipeline;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What one processed chunk contributed
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub job_id: String,
    pub chunk_index: u32,
    pub tally: ChunkTally,
    /// None when the chunk had already been completed by an earlier delivery
    pub progress: Option<BatchProgress>,
}

/// Pulls chunks off the durable queue and resolves them with bounded
/// concurrency. Any number of consumers may share one store.
pub struct ChunkConsumer {
    name: String,
    store: Arc<dyn BatchStore>,
    pipeline: Arc<ResolutionPipeline>,
    properties: Option<Arc<dyn PropertyStorePort>>,
    config: QueueConfig,
}

impl ChunkConsumer {
    pub fn new(store: Arc<dyn BatchStore>, pipeline: Arc<ResolutionPipeline>, config: QueueConfig) -> Self {
        Self {
            name: format!("consumer-{}", Uuid::new_v4()),
            store,
            pipeline,
            properties: None,
            config,
        }
    }

    /// Also write every result back to the source of record.
    pub fn with_property_store(mut self, properties: Arc<dyn PropertyStorePort>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim and process one visible chunk, if there is one.
    pub async fn process_next(&self) -> Result<Option<ChunkOutcome>> {
        let Some(entry) = self
            .store
            .claim_next(&self.name, Utc::now(), self.config.lease())
            .await?
        else {
            return Ok(None);
        };
        if entry.attempts > 1 {
            warn!(job_id = %entry.job_id, chunk_index = entry.chunk_index, attempts = entry.attempts, "chunk redelivered");
            metrics::queue::chunk_redelivered();
        }
        let span = info_span!("chunk", job_id = %entry.job_id, chunk_index = entry.chunk_index);
        self.process_chunk(entry).instrument(span).await.map(Some)
    }

    pub async fn process_chunk(&self, entry: ChunkEntry) -> Result<ChunkOutcome> {
        let ChunkEntry {
            job_id,
            chunk_index,
            jobs,
            ..
        } = entry;
        debug!(%job_id, chunk_index, jobs = jobs.len(), "processing chunk");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut set = JoinSet::new();
        for (position, job) in jobs.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (position, pipeline.resolve(&job).await)
            });
        }

        let mut resolved: Vec<Option<ResolutionResult>> = vec![None; jobs.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, result)) => resolved[position] = Some(result),
                Err(e) => error!(%job_id, chunk_index, error = %e, "resolution task failed"),
            }
        }

        let results: Vec<ResultRecord> = jobs
            .into_iter()
            .zip(resolved)
            .map(|(job, result)| ResultRecord {
                identifier: job.identifier,
                result: result
                    .unwrap_or_else(|| ResolutionResult::failure(vec!["resolution task panicked".to_string()], 0)),
            })
            .collect();

        if let Some(properties) = &self.properties {
            for record in &results {
                if let Err(e) = properties.save_resolution(&record.identifier, &record.result).await {
                    warn!(identifier = %record.identifier, error = %e, "failed to save resolution");
                }
            }
        }

        let tally = ChunkTally {
            processed: results.len() as u64,
            succeeded: results.iter().filter(|r| r.result.success).count() as u64,
        };
        let completion = ChunkCompletion {
            job_id: job_id.clone(),
            chunk_index,
            tally,
            results,
            completed_at: Utc::now(),
            retention: self.config.retention(),
        };
        let progress = self.store.complete_chunk(&completion).await?;

        match &progress {
            Some(p) => {
                metrics::queue::chunk_completed();
                info!(
                    %job_id,
                    chunk_index,
                    processed = p.processed,
                    total = p.total,
                    status = %p.status,
                    "chunk completed"
                );
                if p.is_completed() {
                    metrics::queue::batch_completed();
                    info!(%job_id, succeeded = p.succeeded, failed = p.failed, "batch completed");
                }
            }
            None => debug!(%job_id, chunk_index, "chunk already completed, progress untouched"),
        }

        Ok(ChunkOutcome {
            job_id,
            chunk_index,
            tally,
            progress,
        })
    }

    /// Drain the queue, waiting out staggered or leased entries, and return
    /// the number of chunks processed.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut processed = 0;
        loop {
            if self.process_next().await?.is_some() {
                processed += 1;
                continue;
            }
            let now = Utc::now();
            match self.store.next_visible_at(now).await? {
                Some(at) => {
                    let wait = (at - now).to_std().unwrap_or_default();
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
                None => return Ok(processed),
            }
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(consumer = %self.name, "chunk consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(consumer = %self.name, error = %e, "failed to process chunk"),
            }

            match self.store.purge_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => {
                    metrics::queue::results_purged(n);
                    debug!(removed = n, "purged expired batch rows");
                }
                Err(e) => warn!(error = %e, "failed to purge expired batch rows"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        info!(consumer = %self.name, "chunk consumer stopped");
        Ok(())
    }
}
