use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use fenceq::producer::Producer;
use fenceq::worker::{LockedHandler, WorkerRuntime};
use fenceq_config::load_settings;

use crate::commands::shared::{
    build_lock_manager, build_queue, connect_stores, lock_retry_policy, wait_for_shutdown_signal,
};
use crate::commands::worker::SleepEchoHandler;

// How often the demo re-checks whether the queue has drained.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Self-contained exercise of the whole pipeline: wipe the queue, then run
/// a paced producer and a lock-serialized worker in one process until
/// every job settles.
pub(crate) async fn run_demo(config: Option<String>, hold_ms: u64) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let stores = connect_stores(&settings).await?;
    let queue = build_queue(&settings, Arc::clone(&stores[0]));
    let locks = build_lock_manager(&settings, stores);

    let removed = queue.obliterate(true).await?;
    if removed > 0 {
        println!("Cleared {removed} leftover job(s)");
    }
    queue.on_completed(|job| {
        println!("Job {} completed (attempt {})", job.id, job.attempts);
    });
    queue.on_failed(|job| {
        println!(
            "Job {} dead-lettered: {}",
            job.id,
            job.last_error.as_deref().unwrap_or("unknown error")
        );
    });

    let handler = Arc::new(LockedHandler::new(
        locks,
        vec![settings.lock_resource.clone()],
        Duration::from_millis(settings.lock_ttl_ms),
        lock_retry_policy(&settings),
        Arc::new(SleepEchoHandler::new(Duration::from_millis(hold_ms))),
    ));
    let grace = Duration::from_secs_f64(settings.shutdown_grace_seconds);
    let worker = WorkerRuntime::new(queue.clone(), handler)
        .with_concurrency(settings.worker_concurrency)
        .with_shutdown_grace(grace);
    let shutdown = worker.shutdown_token();
    let mut worker_handle = tokio::spawn(async move { worker.run().await });

    let producer = Producer::new(
        queue.clone(),
        Duration::from_millis(settings.producer.interval_ms),
        settings.producer.max_in_flight,
    );
    let cancel = CancellationToken::new();
    let count = settings.producer.count;

    let outcome = tokio::select! {
        produced = producer.run(count, demo_payload, &cancel) => Some(produced?),
        _ = wait_for_shutdown_signal() => {
            cancel.cancel();
            None
        }
    };

    if let Some(produced) = outcome {
        println!("Produced {produced} job(s); waiting for the queue to drain");
        loop {
            let counts = queue.counts().await?;
            if counts.in_flight() == 0 {
                println!(
                    "Drained: {} completed, {} dead-lettered",
                    counts.completed, counts.failed
                );
                break;
            }
            tokio::select! {
                _ = wait_for_shutdown_signal() => break,
                _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
            }
        }
    }

    shutdown.cancel();
    match tokio::time::timeout(grace + Duration::from_secs(2), &mut worker_handle).await {
        Ok(result) => result??,
        Err(_) => worker_handle.abort(),
    }
    Ok(())
}

fn demo_payload(sequence: u64) -> String {
    serde_json::json!({
        "sequence": sequence,
        "produced_at": Utc::now().to_rfc3339(),
    })
    .to_string()
}
