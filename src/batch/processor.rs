use crate::batch::progress::BatchProgress;
use crate::batch::store::{BatchStore, ChunkEntry};
use crate::common::error::{ResolveError, Result};
use crate::common::types::{Job, ResultRecord};
use crate::config::QueueConfig;
use crate::observability::metrics;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Returned to the submitter of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReceipt {
    pub job_id: String,
    pub chunks: u32,
    pub total: u64,
}

/// Split jobs into ordered chunks of at most `chunk_size`.
pub fn chunk(jobs: Vec<Job>, chunk_size: usize) -> Vec<Vec<Job>> {
    let size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(jobs.len().div_ceil(size));
    let mut iter = jobs.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

/// Front door of the durable batch queue. Owns batch creation; chunk
/// completion goes through the store so consumers in other processes can
/// report progress.
#[derive(Clone)]
pub struct BatchQueueProcessor {
    store: Arc<dyn BatchStore>,
    config: QueueConfig,
}

impl BatchQueueProcessor {
    pub fn new(store: Arc<dyn BatchStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> Arc<dyn BatchStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create the progress record and one queue entry per chunk in a single
    /// store write. Entry `i` becomes visible `i * stagger` after submission.
    pub async fn enqueue(&self, jobs: Vec<Job>, chunk_size: Option<usize>) -> Result<EnqueueReceipt> {
        if jobs.is_empty() {
            return Err(ResolveError::Validation("batch has no identifiers".to_string()));
        }
        let chunk_size = chunk_size.unwrap_or(self.config.chunk_size);
        if chunk_size == 0 {
            return Err(ResolveError::Validation("chunk size must be at least 1".to_string()));
        }

        let total = jobs.len() as u64;
        let chunks = chunk(jobs, chunk_size);
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let count = chunks.len() as u32;
        let progress = BatchProgress::new(job_id.clone(), total, count, now);

        let stagger = self.config.stagger();
        let entries: Vec<ChunkEntry> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, jobs)| ChunkEntry {
                job_id: job_id.clone(),
                chunk_index: index as u32,
                jobs,
                available_at: now + stagger * index as i32,
                attempts: 0,
            })
            .collect();
        self.store
            .create_batch_with_chunks(&progress, &entries, self.config.retention())
            .await?;
        metrics::queue::chunks_enqueued(count as usize);
        info!(%job_id, total, chunks = count, chunk_size, "batch enqueued");

        Ok(EnqueueReceipt {
            job_id,
            chunks: count,
            total,
        })
    }

    /// Validate raw identifiers (no postal hints) and enqueue them.
    pub async fn submit_identifiers(&self, identifiers: &[String]) -> Result<EnqueueReceipt> {
        let jobs = identifiers
            .iter()
            .map(|id| Job::parse(id, None, None))
            .collect::<Result<Vec<_>>>()?;
        self.enqueue(jobs, None).await
    }

    pub async fn progress(&self, job_id: &str) -> Result<Option<BatchProgress>> {
        self.store.progress(job_id, Utc::now()).await
    }

    pub async fn results(&self, job_id: &str) -> Result<Vec<ResultRecord>> {
        self.store.results(job_id, Utc::now()).await
    }
}
