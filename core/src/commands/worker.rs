use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use fenceq::error::JobError;
use fenceq::job::Job;
use fenceq::queue::JobHandler;
use fenceq::worker::{LockedHandler, WorkerRuntime};
use fenceq_config::load_settings;

use crate::commands::shared::{
    build_lock_manager, build_queue, connect_stores, lock_retry_policy, wait_for_shutdown_signal,
};

/// Built-in handler: holds the job for a fixed duration, then echoes the
/// payload back as the result. Stands in for real work so lock contention
/// and renewal can be exercised end to end.
pub(crate) struct SleepEchoHandler {
    hold: Duration,
}

impl SleepEchoHandler {
    pub(crate) fn new(hold: Duration) -> Self {
        Self { hold }
    }
}

#[async_trait]
impl JobHandler for SleepEchoHandler {
    async fn handle(
        &self,
        job: &Job,
        cancel: CancellationToken,
    ) -> Result<Option<String>, JobError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(JobError::Retryable(
                    "interrupted before the work was committed".to_string(),
                ));
            }
            _ = tokio::time::sleep(self.hold) => {}
        }
        let result = serde_json::json!({
            "echo": job.payload,
            "processed_at": Utc::now().to_rfc3339(),
        });
        Ok(Some(result.to_string()))
    }
}

pub(crate) async fn run_worker(
    config: Option<String>,
    concurrency: Option<usize>,
    hold_ms: u64,
) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let stores = connect_stores(&settings).await?;
    let queue = build_queue(&settings, Arc::clone(&stores[0]));
    let locks = build_lock_manager(&settings, stores);

    let handler = Arc::new(LockedHandler::new(
        locks,
        vec![settings.lock_resource.clone()],
        Duration::from_millis(settings.lock_ttl_ms),
        lock_retry_policy(&settings),
        Arc::new(SleepEchoHandler::new(Duration::from_millis(hold_ms))),
    ));
    let grace = Duration::from_secs_f64(settings.shutdown_grace_seconds);
    let worker = WorkerRuntime::new(queue, handler)
        .with_concurrency(concurrency.unwrap_or(settings.worker_concurrency))
        .with_shutdown_grace(grace);
    let shutdown = worker.shutdown_token();

    let mut handle = tokio::spawn(async move { worker.run().await });
    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received; draining worker");
            shutdown.cancel();
        }
        result = &mut handle => {
            result??;
            return Ok(());
        }
    }
    match tokio::time::timeout(grace + Duration::from_secs(2), &mut handle).await {
        Ok(result) => result??,
        Err(_) => handle.abort(),
    }
    Ok(())
}
