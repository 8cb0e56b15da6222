use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fenceq_config::Settings;

use fenceq::lock::{LockManager, RetryPolicy};
use fenceq::queue::{JobQueue, QueueOptions};
use fenceq::store::{DurableStore, RedisStore};
use fenceq::telemetry::TracingLockObserver;

/// One store handle per configured endpoint, in configuration order. The
/// first is the queue primary; the whole list forms the lock quorum.
pub(crate) async fn connect_stores(settings: &Settings) -> Result<Vec<Arc<dyn DurableStore>>> {
    let mut stores: Vec<Arc<dyn DurableStore>> =
        Vec::with_capacity(settings.store_endpoints.len());
    for endpoint in &settings.store_endpoints {
        let store = RedisStore::connect(endpoint)
            .await
            .with_context(|| format!("store endpoint {} is unreachable", stores.len()))?;
        stores.push(Arc::new(store));
    }
    Ok(stores)
}

pub(crate) fn queue_options(settings: &Settings) -> QueueOptions {
    QueueOptions {
        max_attempts: settings.max_attempts,
        base_retry_delay: Duration::from_secs_f64(settings.base_retry_delay_seconds),
        max_retry_delay: Duration::from_secs_f64(settings.max_retry_delay_seconds),
        retry_jitter: settings.retry_jitter,
        visibility_timeout: Duration::from_secs_f64(settings.visibility_timeout_seconds),
        poll_delay: Duration::from_secs_f64(settings.poll_delay_seconds),
    }
}

pub(crate) fn build_queue(settings: &Settings, primary: Arc<dyn DurableStore>) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(
        primary,
        &settings.queue_name,
        queue_options(settings),
    ))
}

pub(crate) fn build_lock_manager(
    settings: &Settings,
    replicas: Vec<Arc<dyn DurableStore>>,
) -> Arc<LockManager> {
    let mut manager = LockManager::new(replicas)
        .with_drift_factor(settings.lock_drift_factor)
        .with_safety_margin(Duration::from_millis(settings.lock_safety_margin_ms));
    if settings.instrument_locks {
        manager = manager.with_observer(Arc::new(TracingLockObserver));
    }
    Arc::new(manager)
}

pub(crate) fn lock_retry_policy(settings: &Settings) -> RetryPolicy {
    let base_delay = Duration::from_millis(settings.lock_retry_delay_ms);
    RetryPolicy {
        max_retries: settings.lock_retry_limit,
        base_delay,
        // cap the exponential curve a few doublings above the base
        max_delay: base_delay * 16,
        jitter: settings.retry_jitter,
    }
}

pub(crate) async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let sigint = signal(SignalKind::interrupt());
        let sigterm = signal(SignalKind::terminate());
        match (sigint, sigterm) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
