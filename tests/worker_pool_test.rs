mod common;

use address_resolver::dispatch::WorkerPool;
use address_resolver::PoolError;
use common::{job, scripted_pipeline, ScriptedStep};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn every_job_yields_one_result() {
    let pipeline = scripted_pipeline(ScriptedStep::new(Duration::ZERO));
    let jobs = vec![job("ok-1"), job("nope-1"), job("ok-2"), job("ok-3"), job("nope-2")];

    let report = WorkerPool::new(pipeline, 3).run(jobs).await.unwrap();

    assert_eq!(report.results.len(), 5);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 2);
    let failed = report
        .results
        .iter()
        .find(|r| r.identifier.as_str() == "nope-1")
        .unwrap();
    assert!(!failed.result.success);
    assert_eq!(failed.result.errors.len(), 1);
}

#[tokio::test]
async fn single_worker_drains_fifo() {
    let pipeline = scripted_pipeline(ScriptedStep::new(Duration::ZERO));
    let ids = ["ok-c", "ok-a", "ok-b", "ok-e", "ok-d"];

    let report = WorkerPool::new(pipeline, 1)
        .run(ids.iter().map(|id| job(id)).collect())
        .await
        .unwrap();

    let order: Vec<&str> = report.results.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(order, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sorted_report_is_stable_regardless_of_arrival() {
    let pipeline = scripted_pipeline(ScriptedStep::new(Duration::from_millis(5)));
    let jobs: Vec<_> = (0..20).rev().map(|i| job(&format!("ok-{:02}", i))).collect();

    let report = WorkerPool::new(pipeline, 4).run(jobs).await.unwrap().sorted_by_identifier();

    let order: Vec<String> = report.results.iter().map(|r| r.identifier.to_string()).collect();
    let expected: Vec<String> = (0..20).map(|i| format!("ok-{:02}", i)).collect();
    assert_eq!(order, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_jobs_never_exceed_worker_count() {
    let step = ScriptedStep::new(Duration::from_millis(10));
    let pipeline = scripted_pipeline(step.clone());
    let jobs: Vec<_> = (0..24).map(|i| job(&format!("ok-{}", i))).collect();

    let report = WorkerPool::new(pipeline, 3).run(jobs).await.unwrap();

    assert_eq!(report.succeeded, 24);
    let peak = step.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency was {}", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn crashed_worker_fails_the_whole_run() {
    let pipeline = scripted_pipeline(ScriptedStep::new(Duration::ZERO));
    let jobs = vec![job("ok-1"), job("boom"), job("ok-2"), job("ok-3")];

    let err = WorkerPool::new(pipeline, 2).run(jobs).await.unwrap_err();

    match err {
        PoolError::WorkerCrashed { reason, .. } => assert!(reason.contains("exploded")),
        other => panic!("expected WorkerCrashed, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_queue_finishes_immediately() {
    let pipeline = scripted_pipeline(ScriptedStep::new(Duration::ZERO));
    let report = WorkerPool::new(pipeline, 4).run(Vec::new()).await.unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.average_ms, 0);
}

#[tokio::test]
async fn zero_workers_is_rejected() {
    let pipeline = scripted_pipeline(ScriptedStep::new(Duration::ZERO));
    assert!(matches!(
        WorkerPool::new(pipeline, 0).run(vec![job("ok-1")]).await,
        Err(PoolError::NoWorkers)
    ));
}
