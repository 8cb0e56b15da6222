use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff;
use crate::constants::LOCK_KEY_PREFIX;
use crate::error::LockError;
use crate::store::DurableStore;

/// Acquisition retry policy. `max_retries: None` retries until the
/// caller's cancellation token fires; it is never truly unbounded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn limited(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Default::default()
        }
    }

    pub fn until_cancelled() -> Self {
        Self {
            max_retries: None,
            ..Default::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        backoff::jittered(
            backoff::exponential(self.base_delay, self.max_delay, attempt),
            self.jitter,
        )
    }
}

/// A held lock: resource keys plus the fencing token issued for this
/// acquisition. UUIDv7 tokens are unique per acquisition and
/// time-ordered, so any two tokens for a resource are monotonically
/// distinguishable. Holders never mutate replica state directly.
#[derive(Debug, Clone)]
pub struct Lock {
    pub resources: Vec<String>,
    pub token: String,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl Lock {
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Observer for lock lifecycle transitions. Invoked synchronously at each
/// transition; implementations must not alter functional behavior.
pub trait LockObserver: Send + Sync {
    fn on_acquire_attempt(&self, _resources: &[String], _ttl: Duration) {}
    fn on_acquired(&self, _lock: &Lock) {}
    fn on_extended(&self, _lock: &Lock) {}
    fn on_released(&self, _lock: &Lock, _released: bool) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLockObserver;

impl LockObserver for NoopLockObserver {}

/// Quorum lock manager over N independent store replicas. An acquisition
/// holds only if a strict majority of replicas accepted the conditional
/// write inside a clock-drift-bounded validity window.
pub struct LockManager {
    replicas: Vec<Arc<dyn DurableStore>>,
    drift_factor: f64,
    safety_margin: Duration,
    observer: Arc<dyn LockObserver>,
}

impl LockManager {
    /// `replicas` must not be empty; the single-replica case degenerates
    /// to a plain TTL lock.
    pub fn new(replicas: Vec<Arc<dyn DurableStore>>) -> Self {
        Self {
            replicas,
            drift_factor: 0.01,
            safety_margin: Duration::from_millis(500),
            observer: Arc::new(NoopLockObserver),
        }
    }

    pub fn with_drift_factor(mut self, drift_factor: f64) -> Self {
        self.drift_factor = drift_factor;
        self
    }

    /// Remaining-validity threshold below which `using` renews the lock.
    pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn quorum(&self) -> usize {
        self.replicas.len() / 2 + 1
    }

    fn drift(&self, ttl: Duration) -> Duration {
        Duration::from_secs_f64(ttl.as_secs_f64() * self.drift_factor) + Duration::from_millis(2)
    }

    fn lock_key(resource: &str) -> String {
        format!("{LOCK_KEY_PREFIX}{resource}")
    }

    /// Acquire all `resources` with a quorum of replicas, retrying per
    /// `policy` until `cancel` fires.
    pub async fn acquire(
        &self,
        resources: &[String],
        ttl: Duration,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Lock, LockError> {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            attempts += 1;
            self.observer.on_acquire_attempt(resources, ttl);
            if let Some(lock) = self.try_acquire_once(resources, ttl).await {
                self.observer.on_acquired(&lock);
                return Ok(lock);
            }
            if let Some(max_retries) = policy.max_retries
                && attempts > max_retries
            {
                return Err(LockError::NotAcquired { attempts });
            }
            let delay = policy.delay_for(attempts);
            tokio::select! {
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }

    /// One quorum round: conditional writes on every replica, validity
    /// check against elapsed time and clock drift, rollback on failure so
    /// partial acquisitions never leak.
    async fn try_acquire_once(&self, resources: &[String], ttl: Duration) -> Option<Lock> {
        let token = Uuid::now_v7().to_string();
        let started = Instant::now();
        let mut granted = 0usize;
        for replica in &self.replicas {
            if self
                .acquire_on_replica(replica.as_ref(), resources, &token, ttl)
                .await
            {
                granted += 1;
            }
        }

        let elapsed = started.elapsed();
        let validity = ttl.saturating_sub(elapsed + self.drift(ttl));
        if granted >= self.quorum() && !validity.is_zero() {
            return Some(Lock {
                resources: resources.to_vec(),
                token,
                acquired_at: started,
                expires_at: started + validity,
            });
        }

        tracing::debug!(
            granted,
            quorum = self.quorum(),
            validity_ms = validity.as_millis() as u64,
            "quorum round failed; rolling back partial acquisitions"
        );
        self.rollback(resources, &token).await;
        None
    }

    async fn acquire_on_replica(
        &self,
        replica: &dyn DurableStore,
        resources: &[String],
        token: &str,
        ttl: Duration,
    ) -> bool {
        for resource in resources {
            match replica
                .set_if_absent(&Self::lock_key(resource), token, ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => return false,
                Err(err) => {
                    tracing::debug!(error = %err, resource = %resource, "replica unavailable during acquire");
                    return false;
                }
            }
        }
        true
    }

    async fn rollback(&self, resources: &[String], token: &str) {
        for replica in &self.replicas {
            for resource in resources {
                let _ = replica
                    .delete_if_matches(&Self::lock_key(resource), token)
                    .await;
            }
        }
    }

    /// Extend a held lock. The deadline only ever moves forward; a stale
    /// token or elapsed expiry fails with `LockError::Lost`.
    pub async fn extend(&self, lock: &Lock, ttl: Duration) -> Result<Lock, LockError> {
        if lock.is_expired() {
            return Err(LockError::Lost);
        }
        let now = Instant::now();
        let mut granted = 0usize;
        for replica in &self.replicas {
            if self
                .extend_on_replica(replica.as_ref(), lock, ttl)
                .await
            {
                granted += 1;
            }
        }
        if granted < self.quorum() {
            return Err(LockError::Lost);
        }

        let candidate = now + ttl.saturating_sub(self.drift(ttl));
        let extended = Lock {
            expires_at: lock.expires_at.max(candidate),
            ..lock.clone()
        };
        self.observer.on_extended(&extended);
        Ok(extended)
    }

    async fn extend_on_replica(&self, replica: &dyn DurableStore, lock: &Lock, ttl: Duration) -> bool {
        for resource in &lock.resources {
            match replica
                .extend_if_matches(&Self::lock_key(resource), &lock.token, ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => return false,
                Err(err) => {
                    tracing::debug!(error = %err, resource = %resource, "replica unavailable during extend");
                    return false;
                }
            }
        }
        true
    }

    /// Release a held lock. Idempotent: releasing an already-released or
    /// expired lock is a no-op returning false, never an error.
    pub async fn release(&self, lock: &Lock) -> Result<bool, LockError> {
        let mut deleted = 0usize;
        for replica in &self.replicas {
            let mut all = true;
            for resource in &lock.resources {
                match replica
                    .delete_if_matches(&Self::lock_key(resource), &lock.token)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => all = false,
                    Err(err) => {
                        tracing::debug!(error = %err, resource = %resource, "replica unavailable during release");
                        all = false;
                    }
                }
            }
            if all {
                deleted += 1;
            }
        }
        let released = deleted >= self.quorum();
        self.observer.on_released(lock, released);
        Ok(released)
    }

    /// Scoped acquisition: runs `f` under the lock with a liveness token
    /// that fires if the lock can no longer be renewed, and releases on
    /// every exit path. The lock is renewed whenever remaining validity
    /// drops below the safety margin; if renewal fails, `f` is signalled
    /// and given the rest of the validity window to wind down before the
    /// critical section is abandoned with `LockError::Lost`.
    pub async fn using<T, F, Fut>(
        &self,
        resources: &[String],
        ttl: Duration,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut current = self.acquire(resources, ttl, policy, cancel).await?;
        let liveness = cancel.child_token();
        let body = f(liveness.clone());
        tokio::pin!(body);

        let mut renewing = true;
        let result = loop {
            let remaining = current.remaining();
            if remaining.is_zero() {
                liveness.cancel();
                break Err(LockError::Lost);
            }
            let wake_in = if renewing {
                remaining.saturating_sub(self.safety_margin)
            } else {
                remaining
            };
            tokio::select! {
                output = &mut body => break Ok(output),
                _ = sleep(wake_in) => {
                    if !renewing {
                        continue;
                    }
                    match self.extend(&current, ttl).await {
                        Ok(extended) => current = extended,
                        Err(err) => {
                            tracing::warn!(
                                token = %current.token,
                                error = %err,
                                "lock renewal failed; signalling critical section"
                            );
                            liveness.cancel();
                            renewing = false;
                        }
                    }
                }
            }
        };

        let _ = self.release(&current).await;
        result
    }
}
