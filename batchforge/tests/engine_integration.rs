use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use batchforge::engine::{
    EngineEvent, ExecutionContext, ExecutionError, JobParameters, JobStatus,
};
use batchforge::{BatchEngine, EngineConfig, JobRequest};
use serde_json::json;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default()
        .with_data_dir(dir.path())
        .with_workers(1, 4);
    config.monitor.enabled = false;
    config.persistence.snapshot_interval_secs = 0;
    config
}

fn quick(_: &JobParameters, ctx: &ExecutionContext) -> Result<(), ExecutionError> {
    ctx.checkpoint()?;
    ctx.report(100);
    Ok(())
}

async fn wait_until_finished(engine: &BatchEngine, count: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while engine.stats().finished() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs did not finish in time");
}

#[tokio::test]
async fn test_jobs_start_in_priority_then_submission_order() {
    let dir = TempDir::new().unwrap();
    let engine = BatchEngine::new(test_config(&dir), quick).unwrap();
    let mut events = engine.subscribe();

    let a = engine
        .submit(JobRequest::new(json!({})).with_name("A").with_priority(5))
        .unwrap();
    let b = engine
        .submit(JobRequest::new(json!({})).with_name("B").with_priority(8))
        .unwrap();
    let c = engine
        .submit(JobRequest::new(json!({})).with_name("C").with_priority(5))
        .unwrap();

    engine.start(1).unwrap();
    wait_until_finished(&engine, 3).await;
    engine.stop(true).await.unwrap();

    let mut started = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::JobStarted { job_id, .. } = event {
            started.push(job_id);
        }
    }
    assert_eq!(started, vec![b, a, c]);
}

#[tokio::test]
async fn test_one_failing_job_does_not_affect_the_rest() {
    let dir = TempDir::new().unwrap();
    let engine = BatchEngine::new(
        test_config(&dir),
        |params: &JobParameters, _: &ExecutionContext| -> Result<(), ExecutionError> {
            match params.get_str("mode") {
                Some("panic") => panic!("corrupt input"),
                Some("fail") => Err(ExecutionError::failed("encoder rejected settings")),
                _ => Ok(()),
            }
        },
    )
    .unwrap();
    engine.start(3).unwrap();

    for mode in ["ok", "panic", "ok", "fail", "ok"] {
        engine
            .submit(JobRequest::new(json!({ "mode": mode })).with_name(mode))
            .unwrap();
    }
    wait_until_finished(&engine, 5).await;

    let stats = engine.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 2);

    let history = engine.history().statistics();
    assert_eq!(history.total, 5);
    assert_eq!(history.completed, 3);

    engine.stop(true).await.unwrap();
}

#[tokio::test]
async fn test_snapshot_restores_pending_jobs_in_order() {
    let dir = TempDir::new().unwrap();

    let (first, second) = {
        let engine = BatchEngine::new(test_config(&dir), quick).unwrap();
        let first = engine
            .submit(JobRequest::new(json!({"n": 1})).with_name("first").with_priority(2))
            .unwrap();
        let second = engine
            .submit(JobRequest::new(json!({"n": 2})).with_name("second").with_priority(2))
            .unwrap();
        engine.snapshot_now().await.unwrap();
        (first, second)
    };

    let engine = BatchEngine::new(test_config(&dir), quick).unwrap();
    assert_eq!(engine.recover().await.unwrap(), 2);

    let pending = engine.queue().peek_snapshot();
    let ids: Vec<_> = pending.iter().map(|job| job.id.clone()).collect();
    assert_eq!(ids, vec![first, second]);
    assert!(pending.iter().all(|job| job.status == JobStatus::Pending));
    assert_eq!(pending[1].parameters.get_u64("n"), Some(2));

    // New submissions sort after recovered ones.
    let third = engine
        .submit(JobRequest::new(json!({})).with_name("third").with_priority(2))
        .unwrap();
    assert_eq!(engine.queue().peek_snapshot().last().unwrap().id, third);

    engine.start(1).unwrap();
    wait_until_finished(&engine, 3).await;
    engine.stop(true).await.unwrap();

    // Nothing left to recover after a clean run.
    let engine = BatchEngine::new(test_config(&dir), quick).unwrap();
    assert_eq!(engine.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_history_keeps_most_recent_records() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.persistence.history_limit = 3;

    let engine = BatchEngine::new(config.clone(), quick).unwrap();
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            engine
                .submit(JobRequest::new(json!({})).with_name(format!("job-{n}")))
                .unwrap(),
        );
    }
    engine.start(1).unwrap();
    wait_until_finished(&engine, 5).await;
    engine.stop(true).await.unwrap();

    let kept: Vec<_> = engine
        .history()
        .records()
        .into_iter()
        .map(|record| record.job_id)
        .collect();
    assert_eq!(kept, ids[2..].to_vec());

    // The cap survives a reload from disk.
    let reopened = config.persistence.open_history();
    assert_eq!(reopened.len(), 3);
}

#[tokio::test]
async fn test_jobs_share_cached_inputs() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("source.bin");
    std::fs::write(&input, vec![7u8; 64]).unwrap();

    let reads = Arc::new(AtomicUsize::new(0));
    let seen = reads.clone();
    let engine = BatchEngine::new(
        test_config(&dir),
        move |params: &JobParameters, ctx: &ExecutionContext| -> Result<(), ExecutionError> {
            let path = params.get_str("input").unwrap_or_default();
            let bytes = ctx.load_file(std::path::Path::new(path))?;
            assert_eq!(bytes.len(), 64);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
    .unwrap();

    for _ in 0..3 {
        engine
            .submit(JobRequest::new(json!({ "input": input.to_string_lossy() })))
            .unwrap();
    }
    engine.start(1).unwrap();
    wait_until_finished(&engine, 3).await;
    engine.stop(true).await.unwrap();

    assert_eq!(reads.load(Ordering::SeqCst), 3);
    let cache = engine.stats().cache;
    assert_eq!(cache.misses, 1);
    assert_eq!(cache.hits, 2);
    assert_eq!(cache.entries, 1);
    assert_eq!(cache.weight, 64);
}

#[tokio::test]
async fn test_cancel_all_clears_queue() {
    let dir = TempDir::new().unwrap();
    let engine = BatchEngine::new(test_config(&dir), quick).unwrap();

    for n in 0..4 {
        engine
            .submit(JobRequest::new(json!({})).with_priority(n))
            .unwrap();
    }
    assert_eq!(engine.cancel_all().await, 4);
    assert!(engine.queue().is_empty());
    assert_eq!(engine.stats().cancelled, 4);
    assert_eq!(engine.history().len(), 4);
}

#[tokio::test]
async fn test_rejects_out_of_range_priority() {
    let dir = TempDir::new().unwrap();
    let engine = BatchEngine::new(test_config(&dir), quick).unwrap();

    assert!(engine
        .submit(JobRequest::new(json!({})).with_priority(11))
        .is_err());
    assert!(engine.submit(JobRequest::new(json!([1, 2]))).is_err());
    assert!(engine.queue().is_empty());
    assert_eq!(engine.stats().submitted, 0);
}

struct HotCpu;

impl batchforge::monitor::LoadSampler for HotCpu {
    fn sample(&self) -> batchforge::Result<batchforge::monitor::ResourceSnapshot> {
        Ok(batchforge::monitor::ResourceSnapshot::new(97.0, 40.0))
    }
}

#[tokio::test]
async fn test_sustained_load_sheds_one_worker_per_cycle() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.monitor.enabled = true;
    config.monitor.sample_interval_ms = 25;

    let engine = BatchEngine::builder(config, quick)
        .sampler(Arc::new(HotCpu))
        .build()
        .unwrap();
    let mut events = engine.subscribe();
    engine.start(4).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.worker_count() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.worker_count(), 1);
    engine.stop(true).await.unwrap();

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::WorkersChanged { previous, current } = event {
            changes.push((previous, current));
        }
    }
    assert_eq!(changes.first(), Some(&(0, 4)));
    assert_eq!(changes.last(), Some(&(1, 0)));
    assert_eq!(&changes[1..changes.len() - 1], &[(4, 3), (3, 2), (2, 1)]);
}
