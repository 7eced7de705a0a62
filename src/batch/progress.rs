use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            other => Err(format!("unknown batch status '{}'", other)),
        }
    }
}

/// Counts for one finished chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTally {
    pub processed: u64,
    pub succeeded: u64,
}

impl ChunkTally {
    pub fn failed(&self) -> u64 {
        self.processed.saturating_sub(self.succeeded)
    }
}

/// Progress of one queued batch.
///
/// Invariant: `processed == succeeded + failed`. Only `apply_chunk` mutates
/// the counters, and stores call it inside their per-batch critical section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub job_id: String,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub status: BatchStatus,
    pub chunks: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_remaining_ms: Option<u64>,
}

impl BatchProgress {
    pub fn new(job_id: impl Into<String>, total: u64, chunks: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            status: BatchStatus::Pending,
            chunks,
            started_at,
            completed_at: None,
            estimated_remaining_ms: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    /// Fold one chunk's tally in and advance the status.
    pub fn apply_chunk(&mut self, tally: ChunkTally, now: DateTime<Utc>) {
        self.processed += tally.processed;
        self.succeeded += tally.succeeded;
        self.failed += tally.failed();

        if self.status == BatchStatus::Pending {
            self.status = BatchStatus::Processing;
        }
        if self.processed >= self.total && self.status != BatchStatus::Completed {
            self.status = BatchStatus::Completed;
            self.completed_at = Some(now);
        }

        self.estimated_remaining_ms = if self.is_completed() {
            Some(0)
        } else if self.processed > 0 {
            let elapsed_ms = (now - self.started_at).num_milliseconds().max(1) as u128;
            let remaining = (self.total - self.processed) as u128;
            Some((remaining * elapsed_ms / self.processed as u128) as u64)
        } else {
            None
        };
    }
}
