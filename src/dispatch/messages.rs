use crate::common::types::{Identifier, Job, ResolutionResult};

/// Worker -> coordinator
#[derive(Debug)]
pub enum WorkerMessage {
    Ready {
        worker_id: usize,
    },
    Result {
        worker_id: usize,
        identifier: Identifier,
        result: ResolutionResult,
    },
    Done {
        worker_id: usize,
    },
    /// Sent by the worker's supervisor, never by the worker itself
    Crashed {
        worker_id: usize,
        reason: String,
    },
}

/// Coordinator -> worker
#[derive(Debug)]
pub enum CoordinatorMessage {
    Job(Job),
    NoMoreJobs,
}
