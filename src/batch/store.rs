use crate::batch::progress::{BatchProgress, ChunkTally};
use crate::common::error::{ResolveError, Result};
use crate::common::types::{Job, ResultRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

/// One durable queue unit: a slice of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub job_id: String,
    pub chunk_index: u32,
    pub jobs: Vec<Job>,
    /// Not claimable before this instant
    pub available_at: DateTime<Utc>,
    /// Deliveries so far, including the current one once claimed
    pub attempts: u32,
}

/// Everything a consumer reports when it finishes a chunk
#[derive(Debug, Clone)]
pub struct ChunkCompletion {
    pub job_id: String,
    pub chunk_index: u32,
    pub tally: ChunkTally,
    pub results: Vec<ResultRecord>,
    pub completed_at: DateTime<Utc>,
    /// Retention for the appended results and the progress record
    pub retention: Duration,
}

/// Durable queue and progress record for batches.
///
/// `complete_chunk` is the single writer of `BatchProgress`: implementations
/// must run its read-modify-write atomically per job id, and must treat a
/// second completion of the same chunk as a no-op.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Write the progress record and every chunk entry, or nothing at all.
    async fn create_batch_with_chunks(
        &self,
        progress: &BatchProgress,
        entries: &[ChunkEntry],
        retention: Duration,
    ) -> Result<()>;
    /// Lease the oldest visible entry. Expired leases are visible again.
    async fn claim_next(&self, consumer: &str, now: DateTime<Utc>, lease: Duration) -> Result<Option<ChunkEntry>>;
    /// Earliest instant a pending entry becomes claimable, if any remain.
    async fn next_visible_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>>;
    /// Returns the updated progress, or None when the chunk was already completed.
    async fn complete_chunk(&self, completion: &ChunkCompletion) -> Result<Option<BatchProgress>>;
    /// None once the record has expired, even before it is purged.
    async fn progress(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<BatchProgress>>;
    async fn results(&self, job_id: &str, now: DateTime<Utc>) -> Result<Vec<ResultRecord>>;
    /// Drop expired progress and results, and every queue entry of a batch
    /// whose progress is gone. Returns rows removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Entries must belong to the batch and match its chunk count.
pub(crate) fn check_entries(progress: &BatchProgress, entries: &[ChunkEntry]) -> Result<()> {
    if entries.len() != progress.chunks as usize {
        return Err(ResolveError::Validation(format!(
            "batch {} declares {} chunks but {} were given",
            progress.job_id,
            progress.chunks,
            entries.len()
        )));
    }
    if let Some(stray) = entries.iter().find(|e| e.job_id != progress.job_id) {
        return Err(ResolveError::Validation(format!(
            "chunk {} belongs to batch {}, not {}",
            stray.chunk_index, stray.job_id, progress.job_id
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct EntryState {
    entry: ChunkEntry,
    lease_until: Option<DateTime<Utc>>,
    completed: bool,
}

#[derive(Default)]
struct MemoryState {
    progress: HashMap<String, (BatchProgress, DateTime<Utc>)>,
    entries: BTreeMap<(String, u32), EntryState>,
    results: HashMap<String, Vec<(ResultRecord, DateTime<Utc>)>>,
}

/// In-memory store for tests and single-process runs
#[derive(Default)]
pub struct MemoryBatchStore {
    state: Mutex<MemoryState>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    async fn create_batch_with_chunks(
        &self,
        progress: &BatchProgress,
        entries: &[ChunkEntry],
        retention: Duration,
    ) -> Result<()> {
        check_entries(progress, entries)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.progress.contains_key(&progress.job_id) {
            return Err(ResolveError::Validation(format!("batch {} already exists", progress.job_id)));
        }
        let mut staged = BTreeMap::new();
        for entry in entries {
            let key = (entry.job_id.clone(), entry.chunk_index);
            if staged.contains_key(&key) || state.entries.contains_key(&key) {
                return Err(ResolveError::Validation(format!(
                    "chunk {} of batch {} written twice",
                    entry.chunk_index, entry.job_id
                )));
            }
            staged.insert(
                key,
                EntryState {
                    entry: entry.clone(),
                    lease_until: None,
                    completed: false,
                },
            );
        }

        let expires = progress.started_at + retention;
        state
            .progress
            .insert(progress.job_id.clone(), (progress.clone(), expires));
        state.entries.extend(staged);
        Ok(())
    }

    async fn claim_next(&self, _consumer: &str, now: DateTime<Utc>, lease: Duration) -> Result<Option<ChunkEntry>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = state
            .entries
            .values_mut()
            .filter(|e| !e.completed && e.entry.available_at <= now)
            .filter(|e| e.lease_until.map_or(true, |until| until <= now))
            .min_by_key(|e| (e.entry.available_at, e.entry.job_id.clone(), e.entry.chunk_index));
        Ok(next.map(|e| {
            e.lease_until = Some(now + lease);
            e.entry.attempts += 1;
            e.entry.clone()
        }))
    }

    async fn next_visible_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .entries
            .values()
            .filter(|e| !e.completed)
            .map(|e| match e.lease_until {
                Some(until) if until > now => until.max(e.entry.available_at),
                _ => e.entry.available_at,
            })
            .min())
    }

    async fn complete_chunk(&self, completion: &ChunkCompletion) -> Result<Option<BatchProgress>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (completion.job_id.clone(), completion.chunk_index);
        match state.entries.get(&key) {
            Some(e) if e.completed => return Ok(None),
            Some(_) => {}
            None => {
                return Err(ResolveError::Validation(format!(
                    "unknown chunk {} of batch {}",
                    completion.chunk_index, completion.job_id
                )))
            }
        }

        // nothing is written unless the progress record is still there
        let expires = completion.completed_at + completion.retention;
        let updated = {
            let (progress, progress_expires) = state
                .progress
                .get_mut(&completion.job_id)
                .ok_or_else(|| ResolveError::Validation(format!("unknown batch {}", completion.job_id)))?;
            progress.apply_chunk(completion.tally, completion.completed_at);
            *progress_expires = expires;
            progress.clone()
        };
        if let Some(e) = state.entries.get_mut(&key) {
            e.completed = true;
            e.lease_until = None;
        }
        state
            .results
            .entry(completion.job_id.clone())
            .or_default()
            .extend(completion.results.iter().cloned().map(|r| (r, expires)));
        Ok(Some(updated))
    }

    async fn progress(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<BatchProgress>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .progress
            .get(job_id)
            .filter(|(_, expires)| *expires > now)
            .map(|(p, _)| p.clone()))
    }

    async fn results(&self, job_id: &str, now: DateTime<Utc>) -> Result<Vec<ResultRecord>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .results
            .get(job_id)
            .map(|rows| {
                rows.iter()
                    .filter(|(_, expires)| *expires > now)
                    .map(|(r, _)| r.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for rows in state.results.values_mut() {
            let before = rows.len();
            rows.retain(|(_, expires)| *expires > now);
            removed += before - rows.len();
        }
        state.results.retain(|_, rows| !rows.is_empty());

        let expired: Vec<String> = state
            .progress
            .iter()
            .filter(|(_, (_, expires))| *expires <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.progress.remove(id);
            removed += 1;
        }
        // pending entries of a purged batch could never complete
        let MemoryState { progress, entries, .. } = &mut *state;
        let before = entries.len();
        entries.retain(|(job_id, _), _| progress.contains_key(job_id));
        removed += before - entries.len();
        Ok(removed)
    }
}
