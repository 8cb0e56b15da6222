use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::constants::DEFAULT_WORKER_ID_PREFIX;
use crate::error::{JobError, LockError, QueueError};
use crate::job::Job;
use crate::lock::{LockManager, RetryPolicy};
use crate::queue::{JobHandler, JobQueue};

/// Stable-per-process worker identity, used as the claim value so
/// settlement can verify ownership.
pub fn generate_worker_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{DEFAULT_WORKER_ID_PREFIX}{}_{}",
        std::process::id(),
        &suffix[..6]
    )
}

/// Wraps a handler so every job runs inside a held distributed lock. The
/// inner handler sees a liveness token that fires if the lock cannot be
/// renewed; work not yet committed at that point must be abandoned.
pub struct LockedHandler {
    locks: Arc<LockManager>,
    resources: Vec<String>,
    ttl: Duration,
    policy: RetryPolicy,
    inner: Arc<dyn JobHandler>,
}

impl LockedHandler {
    pub fn new(
        locks: Arc<LockManager>,
        resources: Vec<String>,
        ttl: Duration,
        policy: RetryPolicy,
        inner: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            locks,
            resources,
            ttl,
            policy,
            inner,
        }
    }
}

#[async_trait]
impl JobHandler for LockedHandler {
    async fn handle(
        &self,
        job: &Job,
        cancel: CancellationToken,
    ) -> Result<Option<String>, JobError> {
        let inner = Arc::clone(&self.inner);
        let outcome = self
            .locks
            .using(&self.resources, self.ttl, &self.policy, &cancel, |liveness| async move {
                inner.handle(job, liveness).await
            })
            .await;
        match outcome {
            Ok(result) => result,
            Err(err @ LockError::NotAcquired { .. }) => {
                Err(JobError::LockNotAcquired(err.to_string()))
            }
            Err(LockError::Cancelled) => {
                Err(JobError::Retryable("shutdown before lock acquired".to_string()))
            }
            Err(err @ (LockError::Lost | LockError::Store(_))) => {
                Err(JobError::Retryable(err.to_string()))
            }
        }
    }
}

/// Long-running consumer: claims jobs from one queue and drives them
/// through a handler until told to shut down.
pub struct WorkerRuntime {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    worker_id: String,
    concurrency: usize,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            queue,
            handler,
            worker_id: generate_worker_id(),
            concurrency: fenceq_config::defaults::DEFAULT_WORKER_CONCURRENCY,
            shutdown_grace: Duration::from_secs_f64(
                fenceq_config::defaults::DEFAULT_SHUTDOWN_GRACE_SECONDS,
            ),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_worker_id(mut self, worker_id: &str) -> Self {
        self.worker_id = worker_id.to_string();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Token that stops the claim loop when cancelled. In-flight jobs get
    /// the shutdown grace to settle.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(&self) -> Result<(), QueueError> {
        tracing::info!(
            worker_id = %self.worker_id,
            queue = %self.queue.name(),
            concurrency = self.concurrency,
            "worker started"
        );
        let outcome = self
            .queue
            .process(
                &self.worker_id,
                self.concurrency,
                self.shutdown_grace,
                Arc::clone(&self.handler),
                self.shutdown.clone(),
            )
            .await;
        tracing::info!(worker_id = %self.worker_id, "worker stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueOptions;
    use crate::store::{DurableStore, MemoryStore};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[test]
    fn worker_ids_are_prefixed_and_unique() {
        let a = generate_worker_id();
        let b = generate_worker_id();
        assert!(a.starts_with(DEFAULT_WORKER_ID_PREFIX));
        assert_ne!(a, b);
    }

    struct OverlapProbe {
        running: AtomicUsize,
        max_seen: AtomicUsize,
        hold: Duration,
    }

    #[async_trait]
    impl JobHandler for OverlapProbe {
        async fn handle(
            &self,
            _job: &Job,
            _cancel: CancellationToken,
        ) -> Result<Option<String>, JobError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn locked_handler_serializes_concurrent_jobs() {
        let store = MemoryStore::new();
        let replicas: Vec<Arc<dyn DurableStore>> =
            vec![Arc::new(store.clone()), Arc::new(store.clone()), Arc::new(store.clone())];
        let locks = Arc::new(LockManager::new(replicas));

        let queue = Arc::new(JobQueue::new(
            Arc::new(store),
            "serialized",
            QueueOptions {
                poll_delay: Duration::from_millis(10),
                ..QueueOptions::default()
            },
        ));
        for _ in 0..4 {
            queue.enqueue("{}").await.unwrap();
        }

        let probe = Arc::new(OverlapProbe {
            running: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            hold: Duration::from_millis(30),
        });
        let handler = Arc::new(LockedHandler::new(
            locks,
            vec!["shared".to_string()],
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: Some(50),
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                jitter: 0.0,
            },
            probe.clone(),
        ));

        let worker = WorkerRuntime::new(queue.clone(), handler)
            .with_concurrency(4)
            .with_shutdown_grace(Duration::from_secs(2));
        let shutdown = worker.shutdown_token();
        let runner = tokio::spawn(async move { worker.run().await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if queue.counts().await.unwrap().completed == 4 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "jobs never completed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.cancel();
        runner.await.unwrap().unwrap();
        assert_eq!(probe.max_seen.load(Ordering::SeqCst), 1, "handlers overlapped");
    }

    struct CountingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(
            &self,
            _job: &Job,
            _cancel: CancellationToken,
        ) -> Result<Option<String>, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn locked_handler_reports_contention_without_running_inner() {
        let store = MemoryStore::new();
        let replicas: Vec<Arc<dyn DurableStore>> = vec![Arc::new(store.clone())];
        let locks = Arc::new(LockManager::new(replicas));

        // hold the resource so the handler cannot acquire it
        let cancel = CancellationToken::new();
        let held = locks
            .acquire(
                &["shared".to_string()],
                Duration::from_secs(30),
                &RetryPolicy::limited(0),
                &cancel,
            )
            .await
            .unwrap();

        let inner = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
        });
        let handler = LockedHandler::new(
            locks.clone(),
            vec!["shared".to_string()],
            Duration::from_secs(1),
            RetryPolicy {
                max_retries: Some(1),
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(10),
                jitter: 0.0,
            },
            inner.clone(),
        );

        let job = Job::new(crate::job::JobId(1), "{}", 3);
        let outcome = handler.handle(&job, CancellationToken::new()).await;
        assert!(matches!(outcome, Err(JobError::LockNotAcquired(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
        locks.release(&held).await.unwrap();
    }
}
