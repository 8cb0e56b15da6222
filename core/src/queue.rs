use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backoff;
use crate::constants::{
    ACTIVE_KEY_PREFIX, CLAIM_KEY_PREFIX, COMPLETED_COUNTER_PREFIX, DLQ_KEY_PREFIX,
    JOB_COUNTER_PREFIX, JOB_KEY_PREFIX, QUEUE_KEY_PREFIX, RETRY_KEY_PREFIX,
};
use crate::error::{JobError, QueueError};
use crate::job::{Job, JobId, JobState, QueueCounts};
use crate::store::DurableStore;

/// Processes one claimed job. `Ok(Some(_))` records a result string on the
/// job; errors decide its fate: `Retryable` and `LockNotAcquired` consume
/// retry budget, `Fatal` dead-letters immediately. `cancel` fires when the
/// worker is shutting down or the handler's lock can no longer be held;
/// handlers should wind down instead of committing further work.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        job: &Job,
        cancel: CancellationToken,
    ) -> Result<Option<String>, JobError>;
}

type JobCallback = Arc<dyn Fn(&Job) + Send + Sync>;

/// Retry and claim tuning for a queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_attempts: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub retry_jitter: f64,
    /// How long a claim shields an active job from re-delivery.
    pub visibility_timeout: Duration,
    /// How long one claim attempt waits on an empty queue.
    pub poll_delay: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: fenceq_config::defaults::DEFAULT_MAX_ATTEMPTS,
            base_retry_delay: Duration::from_secs_f64(
                fenceq_config::defaults::DEFAULT_BASE_RETRY_DELAY_SECONDS,
            ),
            max_retry_delay: Duration::from_secs_f64(
                fenceq_config::defaults::DEFAULT_MAX_RETRY_DELAY_SECONDS,
            ),
            retry_jitter: fenceq_config::defaults::DEFAULT_RETRY_JITTER,
            visibility_timeout: Duration::from_secs_f64(
                fenceq_config::defaults::DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            ),
            poll_delay: Duration::from_secs_f64(fenceq_config::defaults::DEFAULT_POLL_DELAY_SECONDS),
        }
    }
}

/// Durable FIFO job queue over a single primary store. Jobs live in
/// per-job hashes; the waiting, active, retry, and dead-letter lists hold
/// ids only. Claims are TTL keys, so a crashed worker's jobs become
/// recoverable once the visibility timeout lapses.
pub struct JobQueue {
    store: Arc<dyn DurableStore>,
    name: String,
    options: QueueOptions,
    completed_callbacks: Mutex<Vec<JobCallback>>,
    failed_callbacks: Mutex<Vec<JobCallback>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn DurableStore>, name: &str, options: QueueOptions) -> Self {
        Self {
            store,
            name: name.to_string(),
            options,
            completed_callbacks: Mutex::new(Vec::new()),
            failed_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn job_key(id: JobId) -> String {
        format!("{JOB_KEY_PREFIX}{id}")
    }

    fn claim_key(id: JobId) -> String {
        format!("{CLAIM_KEY_PREFIX}{id}")
    }

    fn counter_key(&self) -> String {
        format!("{JOB_COUNTER_PREFIX}{}", self.name)
    }

    fn waiting_key(&self) -> String {
        format!("{QUEUE_KEY_PREFIX}{}", self.name)
    }

    fn active_key(&self) -> String {
        format!("{ACTIVE_KEY_PREFIX}{}", self.name)
    }

    fn retry_key(&self) -> String {
        format!("{RETRY_KEY_PREFIX}{}", self.name)
    }

    fn dlq_key(&self) -> String {
        format!("{DLQ_KEY_PREFIX}{}", self.name)
    }

    fn completed_counter_key(&self) -> String {
        format!("{COMPLETED_COUNTER_PREFIX}{}", self.name)
    }

    /// Register a callback fired once per job completion.
    pub fn on_completed(&self, callback: impl Fn(&Job) + Send + Sync + 'static) {
        let mut callbacks = self
            .completed_callbacks
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        callbacks.push(Arc::new(callback));
    }

    /// Register a callback fired once per job dead-lettered.
    pub fn on_failed(&self, callback: impl Fn(&Job) + Send + Sync + 'static) {
        let mut callbacks = self
            .failed_callbacks
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        callbacks.push(Arc::new(callback));
    }

    fn fire_completed(&self, job: &Job) {
        let callbacks = self
            .completed_callbacks
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        for callback in callbacks {
            callback(job);
        }
    }

    fn fire_failed(&self, job: &Job) {
        let callbacks = self
            .failed_callbacks
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        for callback in callbacks {
            callback(job);
        }
    }

    /// Append a new Waiting job and return its queue-assigned id.
    pub async fn enqueue(&self, payload: &str) -> Result<JobId, QueueError> {
        let id = JobId(self.store.counter_incr(&self.counter_key()).await?);
        let job = Job::new(id, payload, self.options.max_attempts);
        self.store.hash_set(&Self::job_key(id), &job.to_fields()).await?;
        self.store.list_push(&self.waiting_key(), &id.to_string()).await?;
        tracing::debug!(job_id = %id, queue = %self.name, "job enqueued");
        Ok(id)
    }

    /// Take the oldest waiting job for `worker_id`, waiting up to the poll
    /// delay for one to arrive. The claim key expires after the visibility
    /// timeout unless the job finishes first.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let Some(raw_id) = self
            .store
            .list_pop_blocking(&self.waiting_key(), self.options.poll_delay)
            .await?
        else {
            return Ok(None);
        };
        let id: JobId = raw_id
            .parse()
            .map_err(|_| QueueError::InvalidJobId(raw_id.clone()))?;

        let claimed = self
            .store
            .set_if_absent(
                &Self::claim_key(id),
                worker_id,
                self.options.visibility_timeout,
            )
            .await?;
        if !claimed {
            // another consumer holds it; put the id back for later
            self.store.list_push(&self.waiting_key(), &raw_id).await?;
            return Ok(None);
        }

        let raw = self.store.hash_get_all(&Self::job_key(id)).await?;
        if raw.is_empty() {
            tracing::warn!(job_id = %id, "claimed id has no job record; dropping");
            self.store.delete(&Self::claim_key(id)).await?;
            return Ok(None);
        }
        let mut job = Job::from_fields(raw)?;
        job.attempts += 1;
        job.state = JobState::Active;
        job.claimed_by = Some(worker_id.to_string());
        self.store.hash_set(&Self::job_key(id), &job.to_fields()).await?;
        self.store.list_push(&self.active_key(), &raw_id).await?;
        tracing::debug!(job_id = %id, attempt = job.attempts, worker = worker_id, "job claimed");
        Ok(Some(job))
    }

    /// Must still own the claim for `job`; returns Ok(()) without effect if
    /// the claim lapsed or the job was discarded underneath us.
    async fn verify_claim(&self, job: &Job, worker_id: &str) -> Result<bool, QueueError> {
        let holder = self.store.get(&Self::claim_key(job.id)).await?;
        if holder.as_deref() != Some(worker_id) {
            tracing::warn!(
                job_id = %job.id,
                worker = worker_id,
                "claim no longer held; discarding settlement"
            );
            return Ok(false);
        }
        if self.store.hash_get_all(&Self::job_key(job.id)).await?.is_empty() {
            tracing::warn!(job_id = %job.id, "job record discarded while active");
            self.store
                .delete_if_matches(&Self::claim_key(job.id), worker_id)
                .await?;
            self.store
                .list_remove(&self.active_key(), &job.id.to_string())
                .await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Settle a job as Completed. Completion callbacks fire exactly once,
    /// after the terminal state is durable.
    pub async fn complete(
        &self,
        job: &Job,
        worker_id: &str,
        result: Option<String>,
    ) -> Result<(), QueueError> {
        if !self.verify_claim(job, worker_id).await? {
            return Ok(());
        }
        let mut job = job.clone();
        job.state = JobState::Completed;
        job.finished_at = Some(Utc::now());
        job.result = result;
        self.store
            .hash_set(&Self::job_key(job.id), &job.to_fields())
            .await?;
        self.store.counter_incr(&self.completed_counter_key()).await?;
        self.store
            .delete_if_matches(&Self::claim_key(job.id), worker_id)
            .await?;
        self.store
            .list_remove(&self.active_key(), &job.id.to_string())
            .await?;
        tracing::debug!(job_id = %job.id, attempts = job.attempts, "job completed");
        self.fire_completed(&job);
        Ok(())
    }

    /// Settle a job attempt as failed: schedule a retry, or dead-letter it
    /// when the error is fatal or the retry budget is exhausted.
    pub async fn fail(
        &self,
        job: &Job,
        worker_id: &str,
        error: &JobError,
    ) -> Result<(), QueueError> {
        if !self.verify_claim(job, worker_id).await? {
            return Ok(());
        }
        self.store
            .delete_if_matches(&Self::claim_key(job.id), worker_id)
            .await?;
        self.dispose(job.clone(), error).await
    }

    async fn dispose(&self, mut job: Job, error: &JobError) -> Result<(), QueueError> {
        self.store
            .list_remove(&self.active_key(), &job.id.to_string())
            .await?;
        job.last_error = Some(error.to_string());
        job.claimed_by = None;

        let fatal = matches!(error, JobError::Fatal(_));
        if fatal || job.attempts >= job.max_attempts {
            job.state = JobState::Failed;
            job.finished_at = Some(Utc::now());
            self.store
                .hash_set(&Self::job_key(job.id), &job.to_fields())
                .await?;
            self.store
                .list_push(&self.dlq_key(), &job.id.to_string())
                .await?;
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                fatal,
                error = %error,
                "job dead-lettered"
            );
            self.fire_failed(&job);
            return Ok(());
        }

        let delay = backoff::jittered(
            backoff::exponential(
                self.options.base_retry_delay,
                self.options.max_retry_delay,
                job.attempts,
            ),
            self.options.retry_jitter,
        );
        job.state = JobState::Waiting;
        job.retry_at = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        self.store
            .hash_set(&Self::job_key(job.id), &job.to_fields())
            .await?;
        self.store
            .list_push(&self.retry_key(), &job.id.to_string())
            .await?;
        tracing::debug!(
            job_id = %job.id,
            attempt = job.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "job scheduled for retry"
        );
        Ok(())
    }

    /// Housekeeping pass: promote due retries back to the waiting list and
    /// requeue active jobs whose claim expired without settlement. Returns
    /// how many jobs were moved.
    pub async fn recover(&self) -> Result<u64, QueueError> {
        let mut moved = 0u64;

        for raw_id in self.store.list_range(&self.retry_key()).await? {
            let Ok(id) = raw_id.parse::<JobId>() else {
                self.store.list_remove(&self.retry_key(), &raw_id).await?;
                continue;
            };
            let raw = self.store.hash_get_all(&Self::job_key(id)).await?;
            if raw.is_empty() {
                self.store.list_remove(&self.retry_key(), &raw_id).await?;
                continue;
            }
            let job = Job::from_fields(raw)?;
            let due = job.retry_at.is_none_or(|at| at <= Utc::now());
            if due {
                self.store.list_remove(&self.retry_key(), &raw_id).await?;
                self.store.list_push(&self.waiting_key(), &raw_id).await?;
                moved += 1;
                tracing::debug!(job_id = %id, "retry promoted to waiting");
            }
        }

        for raw_id in self.store.list_range(&self.active_key()).await? {
            let Ok(id) = raw_id.parse::<JobId>() else {
                self.store.list_remove(&self.active_key(), &raw_id).await?;
                continue;
            };
            if self.store.get(&Self::claim_key(id)).await?.is_some() {
                continue;
            }
            let raw = self.store.hash_get_all(&Self::job_key(id)).await?;
            if raw.is_empty() {
                self.store.list_remove(&self.active_key(), &raw_id).await?;
                continue;
            }
            let job = Job::from_fields(raw)?;
            if job.state != JobState::Active {
                self.store.list_remove(&self.active_key(), &raw_id).await?;
                continue;
            }
            tracing::warn!(
                job_id = %id,
                worker = job.claimed_by.as_deref().unwrap_or("unknown"),
                "claim expired without settlement; requeueing"
            );
            self.dispose(job, &JobError::Retryable("visibility timeout expired".to_string()))
                .await?;
            moved += 1;
        }

        Ok(moved)
    }

    /// Best-effort snapshot of queue state. Scheduled retries count as
    /// waiting.
    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let waiting = self.store.list_len(&self.waiting_key()).await?
            + self.store.list_len(&self.retry_key()).await?;
        Ok(QueueCounts {
            waiting,
            active: self.store.list_len(&self.active_key()).await?,
            completed: self.store.counter_get(&self.completed_counter_key()).await?,
            failed: self.store.list_len(&self.dlq_key()).await?,
        })
    }

    /// Dead-lettered jobs, oldest first.
    pub async fn dead_letters(&self) -> Result<Vec<Job>, QueueError> {
        let mut jobs = Vec::new();
        for raw_id in self.store.list_range(&self.dlq_key()).await? {
            let Ok(id) = raw_id.parse::<JobId>() else {
                continue;
            };
            let raw = self.store.hash_get_all(&Self::job_key(id)).await?;
            if raw.is_empty() {
                continue;
            }
            jobs.push(Job::from_fields(raw)?);
        }
        Ok(jobs)
    }

    /// Destroy the queue and every job it references. Refused while jobs
    /// are active unless `force` is set; a forced obliterate abandons
    /// active jobs, and their eventual settlement becomes a no-op. Returns
    /// how many job records were removed.
    pub async fn obliterate(&self, force: bool) -> Result<u64, QueueError> {
        let active = self.store.list_len(&self.active_key()).await?;
        if active > 0 && !force {
            return Err(QueueError::ObliterateRefused { active });
        }

        let mut ids: Vec<String> = Vec::new();
        for list in [
            self.waiting_key(),
            self.active_key(),
            self.retry_key(),
            self.dlq_key(),
        ] {
            ids.extend(self.store.list_range(&list).await?);
        }
        ids.sort();
        ids.dedup();

        let mut removed = 0u64;
        for raw_id in &ids {
            if let Ok(id) = raw_id.parse::<JobId>() {
                if self.store.delete(&Self::job_key(id)).await? {
                    removed += 1;
                }
                self.store.delete(&Self::claim_key(id)).await?;
            }
        }
        for key in [
            self.waiting_key(),
            self.active_key(),
            self.retry_key(),
            self.dlq_key(),
            self.counter_key(),
            self.completed_counter_key(),
        ] {
            self.store.delete(&key).await?;
        }
        tracing::info!(queue = %self.name, removed, force, "queue obliterated");
        Ok(removed)
    }

    /// Claim-and-process loop: up to `concurrency` jobs run at once, each
    /// on its own task, with periodic recovery of due retries and expired
    /// claims. Returns once `shutdown` fires and in-flight jobs settle or
    /// `shutdown_grace` lapses, whichever is first.
    pub async fn process(
        self: &Arc<Self>,
        worker_id: &str,
        concurrency: usize,
        shutdown_grace: Duration,
        handler: Arc<dyn JobHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), QueueError> {
        let concurrency = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let reap_interval = (self.options.visibility_timeout / 2).max(self.options.poll_delay);
        let mut next_reap = Instant::now();

        while !shutdown.is_cancelled() {
            if Instant::now() >= next_reap {
                if let Err(err) = self.recover().await {
                    tracing::warn!(error = %err, "queue recovery pass failed");
                }
                next_reap = Instant::now() + reap_interval;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let job = tokio::select! {
                claimed = self.claim(worker_id) => claimed?,
                _ = shutdown.cancelled() => {
                    drop(permit);
                    break;
                }
            };
            let Some(job) = job else {
                drop(permit);
                continue;
            };

            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let worker_id = worker_id.to_string();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                queue.run_one(job, handler, &worker_id, shutdown).await;
                drop(permit);
            });
        }

        // drain: wait for in-flight jobs, then rely on the visibility
        // timeout for anything still running
        let drained = tokio::time::timeout(
            shutdown_grace,
            semaphore.acquire_many(concurrency as u32),
        )
        .await;
        if drained.is_err() {
            tracing::warn!(
                queue = %self.name,
                "shutdown grace elapsed with jobs in flight; claims will expire"
            );
        }
        Ok(())
    }

    async fn run_one(
        &self,
        job: Job,
        handler: Arc<dyn JobHandler>,
        worker_id: &str,
        shutdown: CancellationToken,
    ) {
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            queue = %self.name,
            attempt = job.attempts,
        );
        async {
            let started = Instant::now();
            let outcome = handler.handle(&job, shutdown.child_token()).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let settled = match &outcome {
                Ok(result) => {
                    tracing::info!(duration_ms, outcome = "success", "job finished");
                    self.complete(&job, worker_id, result.clone()).await
                }
                Err(err) => {
                    let label = match err {
                        JobError::LockNotAcquired(_) => "lock_not_acquired",
                        JobError::Retryable(_) => "retryable",
                        JobError::Fatal(_) => "fatal",
                    };
                    tracing::info!(duration_ms, outcome = label, error = %err, "job finished");
                    self.fail(&job, worker_id, err).await
                }
            };
            if let Err(err) = settled {
                tracing::error!(error = %err, "failed to settle job");
            }
        }
        .instrument(span)
        .await
    }
}
