use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use fenceq::{
    DurableStore, Job, JobError, JobHandler, JobQueue, LockManager, LockedHandler, MemoryStore,
    Producer, QueueOptions, RetryPolicy, WorkerRuntime,
};

fn replicas(n: usize) -> (Vec<MemoryStore>, Vec<Arc<dyn DurableStore>>) {
    let stores: Vec<MemoryStore> = (0..n).map(|_| MemoryStore::new()).collect();
    let handles = stores
        .iter()
        .map(|store| Arc::new(store.clone()) as Arc<dyn DurableStore>)
        .collect();
    (stores, handles)
}

fn fast_queue(primary: Arc<dyn DurableStore>, name: &str) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(
        primary,
        name,
        QueueOptions {
            max_attempts: 3,
            base_retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(40),
            retry_jitter: 0.0,
            visibility_timeout: Duration::from_secs(5),
            poll_delay: Duration::from_millis(10),
        },
    ))
}

fn contended_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: Some(200),
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: 0.0,
    }
}

struct HoldProbe {
    running: AtomicUsize,
    max_seen: AtomicUsize,
    handled: AtomicU32,
    hold: Duration,
}

impl HoldProbe {
    fn new(hold: Duration) -> Self {
        Self {
            running: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            handled: AtomicU32::new(0),
            hold,
        }
    }
}

#[async_trait]
impl JobHandler for HoldProbe {
    async fn handle(
        &self,
        job: &Job,
        _cancel: CancellationToken,
    ) -> Result<Option<String>, JobError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("echo:{}", job.payload)))
    }
}

async fn wait_for_completed(queue: &JobQueue, expected: u64, deadline: Duration) {
    let until = tokio::time::Instant::now() + deadline;
    loop {
        let counts = queue.counts().await.unwrap();
        if counts.completed >= expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < until,
            "queue never reached {expected} completions: {counts:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn producer_and_worker_drain_the_queue_serialized() {
    let (_, handles) = replicas(3);
    let queue = fast_queue(Arc::clone(&handles[0]), "pipeline");
    let locks = Arc::new(LockManager::new(handles));

    let probe = Arc::new(HoldProbe::new(Duration::from_millis(15)));
    let handler = Arc::new(LockedHandler::new(
        locks,
        vec!["pipeline".to_string()],
        Duration::from_secs(5),
        contended_policy(),
        probe.clone(),
    ));
    let worker = WorkerRuntime::new(queue.clone(), handler)
        .with_concurrency(4)
        .with_shutdown_grace(Duration::from_secs(2));
    let shutdown = worker.shutdown_token();
    let runner = tokio::spawn(async move { worker.run().await });

    let producer = Producer::new(queue.clone(), Duration::ZERO, 3);
    let cancel = CancellationToken::new();
    let produced = producer
        .run(6, |sequence| format!("{{\"n\":{sequence}}}"), &cancel)
        .await
        .unwrap();
    assert_eq!(produced, 6);

    wait_for_completed(&queue, 6, Duration::from_secs(15)).await;
    shutdown.cancel();
    runner.await.unwrap().unwrap();

    assert_eq!(probe.handled.load(Ordering::SeqCst), 6);
    assert_eq!(
        probe.max_seen.load(Ordering::SeqCst),
        1,
        "lock failed to serialize handlers"
    );
    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.completed, 6);
    assert_eq!(counts.in_flight(), 0);
    assert_eq!(counts.failed, 0);
}

#[tokio::test]
async fn pipeline_survives_a_minority_replica_outage() {
    let (stores, handles) = replicas(3);
    let queue = fast_queue(Arc::clone(&handles[0]), "degraded");
    let locks = Arc::new(LockManager::new(handles));

    // one lock replica down for the whole run; quorum is still 2 of 3
    stores[2].set_unavailable(true);

    let probe = Arc::new(HoldProbe::new(Duration::from_millis(10)));
    let handler = Arc::new(LockedHandler::new(
        locks,
        vec!["degraded".to_string()],
        Duration::from_secs(5),
        contended_policy(),
        probe.clone(),
    ));
    let worker = WorkerRuntime::new(queue.clone(), handler)
        .with_concurrency(2)
        .with_shutdown_grace(Duration::from_secs(2));
    let shutdown = worker.shutdown_token();
    let runner = tokio::spawn(async move { worker.run().await });

    for _ in 0..3 {
        queue.enqueue("{}").await.unwrap();
    }
    wait_for_completed(&queue, 3, Duration::from_secs(15)).await;
    shutdown.cancel();
    runner.await.unwrap().unwrap();
    assert_eq!(probe.max_seen.load(Ordering::SeqCst), 1);
}

struct AlwaysFailing;

#[async_trait]
impl JobHandler for AlwaysFailing {
    async fn handle(
        &self,
        _job: &Job,
        _cancel: CancellationToken,
    ) -> Result<Option<String>, JobError> {
        Err(JobError::Retryable("downstream rejected the job".to_string()))
    }
}

#[tokio::test]
async fn exhausted_retries_end_in_the_dead_letter_queue() {
    let (_, handles) = replicas(1);
    let queue = fast_queue(Arc::clone(&handles[0]), "doomed");

    let dead = Arc::new(AtomicU32::new(0));
    {
        let dead = dead.clone();
        queue.on_failed(move |_| {
            dead.fetch_add(1, Ordering::SeqCst);
        });
    }

    let worker = WorkerRuntime::new(queue.clone(), Arc::new(AlwaysFailing))
        .with_concurrency(1)
        .with_shutdown_grace(Duration::from_secs(1));
    let shutdown = worker.shutdown_token();
    let runner = tokio::spawn(async move { worker.run().await });

    queue.enqueue("{}").await.unwrap();
    let until = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        if queue.counts().await.unwrap().failed == 1 {
            break;
        }
        assert!(tokio::time::Instant::now() < until, "job never dead-lettered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown.cancel();
    runner.await.unwrap().unwrap();

    assert_eq!(dead.load(Ordering::SeqCst), 1);
    let letters = queue.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(
        letters[0].last_error.as_deref(),
        Some("downstream rejected the job")
    );
}

#[tokio::test]
async fn fencing_tokens_order_successive_holders() {
    let (_, handles) = replicas(3);
    let manager = LockManager::new(handles);
    let cancel = CancellationToken::new();
    let resources = vec!["ordered".to_string()];

    let mut tokens = Vec::new();
    for _ in 0..3 {
        let lock = manager
            .acquire(
                &resources,
                Duration::from_secs(2),
                &RetryPolicy::limited(0),
                &cancel,
            )
            .await
            .unwrap();
        tokens.push(lock.token.clone());
        assert!(manager.release(&lock).await.unwrap());
    }

    // time-ordered tokens: a later holder always presents a greater token
    let mut sorted = tokens.clone();
    sorted.sort();
    assert_eq!(tokens, sorted);
    assert_eq!(
        tokens.iter().collect::<std::collections::HashSet<_>>().len(),
        tokens.len()
    );
}

#[tokio::test]
async fn forced_obliterate_discards_inflight_work_cleanly() {
    let (_, handles) = replicas(1);
    let queue = fast_queue(Arc::clone(&handles[0]), "wiped");
    let completions = Arc::new(AtomicU32::new(0));
    {
        let completions = completions.clone();
        queue.on_completed(move |_| {
            completions.fetch_add(1, Ordering::SeqCst);
        });
    }

    queue.enqueue("a").await.unwrap();
    queue.enqueue("b").await.unwrap();
    let active = queue.claim("w1").await.unwrap().unwrap();

    assert!(queue.obliterate(false).await.is_err());
    assert_eq!(queue.obliterate(true).await.unwrap(), 2);

    // the worker finishing the abandoned job later is a harmless no-op
    queue
        .complete(&active, "w1", Some("late".to_string()))
        .await
        .unwrap();
    assert_eq!(completions.load(Ordering::SeqCst), 0);
    assert_eq!(queue.counts().await.unwrap().completed, 0);
}
