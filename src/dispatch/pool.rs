use crate::common::error::PoolError;
use crate::common::types::{Job, ResultRecord};
use crate::dispatch::messages::{CoordinatorMessage, WorkerMessage};
use crate::observability::metrics;
use crate::pipeline::ResolutionPipeline;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, info_span, Instrument};

/// Aggregated outcome of one pool run. `results` are in arrival order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolReport {
    pub results: Vec<ResultRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub total_elapsed_ms: u64,
    pub average_ms: u64,
}

impl PoolReport {
    fn from_results(results: Vec<ResultRecord>, total_elapsed_ms: u64) -> Self {
        let succeeded = results.iter().filter(|r| r.result.success).count();
        let failed = results.len() - succeeded;
        let average_ms = if results.is_empty() {
            0
        } else {
            results.iter().map(|r| r.result.response_time_ms).sum::<u64>() / results.len() as u64
        };
        Self {
            results,
            succeeded,
            failed,
            total_elapsed_ms,
            average_ms,
        }
    }

    /// Stable output order for callers that need it
    pub fn sorted_by_identifier(mut self) -> Self {
        self.results.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        self
    }
}

/// Fixed-size pool of workers, each running the pipeline one job at a time.
pub struct WorkerPool {
    pipeline: Arc<ResolutionPipeline>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<ResolutionPipeline>, workers: usize) -> Self {
        Self { pipeline, workers }
    }

    /// Resolve every job. Completes when all workers report done; a crashed
    /// worker fails the whole run.
    pub async fn run(&self, jobs: Vec<Job>) -> Result<PoolReport, PoolError> {
        if self.workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let started = Instant::now();
        let total_jobs = jobs.len();
        let mut queue: VecDeque<Job> = jobs.into();

        let (outbox, mut from_workers) = unbounded_channel::<WorkerMessage>();
        let mut inboxes = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let (tx, rx) = unbounded_channel();
            inboxes.push(tx);
            spawn_supervised(Worker {
                id: worker_id,
                pipeline: self.pipeline.clone(),
                inbox: rx,
                outbox: outbox.clone(),
            });
        }
        drop(outbox);
        info!(workers = self.workers, jobs = total_jobs, "worker pool started");

        let mut finished = vec![false; self.workers];
        let mut outstanding = self.workers;
        let mut results = Vec::with_capacity(total_jobs);

        while outstanding > 0 {
            let Some(msg) = from_workers.recv().await else {
                return Err(PoolError::ChannelClosed { outstanding });
            };
            match msg {
                WorkerMessage::Ready { worker_id } => {
                    dispatch_next(&mut queue, &inboxes[worker_id], worker_id);
                }
                WorkerMessage::Result {
                    worker_id,
                    identifier,
                    result,
                } => {
                    results.push(ResultRecord { identifier, result });
                    dispatch_next(&mut queue, &inboxes[worker_id], worker_id);
                }
                WorkerMessage::Done { worker_id } => {
                    if !finished[worker_id] {
                        finished[worker_id] = true;
                        outstanding -= 1;
                    }
                }
                WorkerMessage::Crashed { worker_id, reason } => {
                    error!(worker_id, %reason, "worker terminated abnormally, aborting pool run");
                    metrics::pool::worker_crashed();
                    // dropping the inboxes stops the remaining workers
                    return Err(PoolError::WorkerCrashed { worker_id, reason });
                }
            }
        }

        let elapsed = started.elapsed();
        metrics::pool::run_finished(elapsed.as_secs_f64());
        let report = PoolReport::from_results(results, elapsed.as_millis() as u64);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.total_elapsed_ms,
            "worker pool finished"
        );
        Ok(report)
    }
}

fn dispatch_next(queue: &mut VecDeque<Job>, inbox: &UnboundedSender<CoordinatorMessage>, worker_id: usize) {
    let msg = match queue.pop_front() {
        Some(job) => {
            debug!(worker_id, identifier = %job.identifier, "dispatching job");
            metrics::pool::job_dispatched();
            CoordinatorMessage::Job(job)
        }
        None => CoordinatorMessage::NoMoreJobs,
    };
    // a worker that already went away is picked up by its supervisor
    let _ = inbox.send(msg);
}

struct Worker {
    id: usize,
    pipeline: Arc<ResolutionPipeline>,
    inbox: UnboundedReceiver<CoordinatorMessage>,
    outbox: UnboundedSender<WorkerMessage>,
}

impl Worker {
    async fn run(mut self) {
        if self.outbox.send(WorkerMessage::Ready { worker_id: self.id }).is_err() {
            return;
        }
        while let Some(msg) = self.inbox.recv().await {
            match msg {
                CoordinatorMessage::Job(job) => {
                    let result = self.pipeline.resolve(&job).await;
                    let reply = WorkerMessage::Result {
                        worker_id: self.id,
                        identifier: job.identifier,
                        result,
                    };
                    if self.outbox.send(reply).is_err() {
                        return;
                    }
                }
                CoordinatorMessage::NoMoreJobs => {
                    let _ = self.outbox.send(WorkerMessage::Done { worker_id: self.id });
                    return;
                }
            }
        }
    }
}

/// Run the worker in its own task and report a panic back to the coordinator.
fn spawn_supervised(worker: Worker) {
    let worker_id = worker.id;
    let outbox = worker.outbox.clone();
    let span = info_span!("worker", worker_id);
    let handle = tokio::spawn(worker.run().instrument(span));
    tokio::spawn(async move {
        if let Err(join_error) = handle.await {
            let reason = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "worker task was cancelled".to_string()
            };
            let _ = outbox.send(WorkerMessage::Crashed { worker_id, reason });
        }
    });
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
