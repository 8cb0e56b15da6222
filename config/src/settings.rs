use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_BASE_RETRY_DELAY_SECONDS, DEFAULT_LOCK_DRIFT_FACTOR, DEFAULT_LOCK_RESOURCE,
    DEFAULT_LOCK_RETRY_DELAY_MS, DEFAULT_LOCK_SAFETY_MARGIN_MS, DEFAULT_LOCK_TTL_MS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RETRY_DELAY_SECONDS, DEFAULT_POLL_DELAY_SECONDS,
    DEFAULT_PRODUCER_COUNT, DEFAULT_PRODUCER_INTERVAL_MS, DEFAULT_PRODUCER_MAX_IN_FLIGHT,
    DEFAULT_QUEUE_NAME, DEFAULT_RETRY_JITTER, DEFAULT_SHUTDOWN_GRACE_SECONDS,
    DEFAULT_STORE_ENDPOINT, DEFAULT_VISIBILITY_TIMEOUT_SECONDS, DEFAULT_WORKER_CONCURRENCY,
};

/// Bounded-rate producer knobs. `max_in_flight` caps Waiting + Active jobs
/// cluster-wide, checked before every enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ProducerSettings {
    pub count: u64,
    pub interval_ms: u64,
    pub max_in_flight: u64,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            count: DEFAULT_PRODUCER_COUNT,
            interval_ms: DEFAULT_PRODUCER_INTERVAL_MS,
            max_in_flight: DEFAULT_PRODUCER_MAX_IN_FLIGHT,
        }
    }
}

/// Full configuration surface for the queue, lock manager, worker runtime
/// and producer. Every field has a sane default so a bare `fenceq.toml`
/// (or none at all, via env overrides) is enough to run against localhost.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Settings {
    /// Store replica DSNs. The first endpoint is the queue primary; the
    /// whole list forms the lock quorum.
    pub store_endpoints: Vec<String>,
    pub queue_name: String,
    /// Resource key serialized by the worker's critical section.
    pub lock_resource: String,

    pub lock_ttl_ms: u64,
    pub lock_drift_factor: f64,
    pub lock_safety_margin_ms: u64,
    /// `None` retries acquisition until the caller's cancellation fires.
    pub lock_retry_limit: Option<u32>,
    pub lock_retry_delay_ms: u64,

    pub max_attempts: u32,
    pub base_retry_delay_seconds: f64,
    pub max_retry_delay_seconds: f64,
    pub retry_jitter: f64,

    pub visibility_timeout_seconds: f64,
    pub poll_delay_seconds: f64,
    pub worker_concurrency: usize,
    pub shutdown_grace_seconds: f64,

    /// Emit a structured event for every lock lifecycle transition.
    pub instrument_locks: bool,

    pub producer: ProducerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_endpoints: vec![DEFAULT_STORE_ENDPOINT.to_string()],
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            lock_resource: DEFAULT_LOCK_RESOURCE.to_string(),
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            lock_drift_factor: DEFAULT_LOCK_DRIFT_FACTOR,
            lock_safety_margin_ms: DEFAULT_LOCK_SAFETY_MARGIN_MS,
            lock_retry_limit: None,
            lock_retry_delay_ms: DEFAULT_LOCK_RETRY_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_retry_delay_seconds: DEFAULT_BASE_RETRY_DELAY_SECONDS,
            max_retry_delay_seconds: DEFAULT_MAX_RETRY_DELAY_SECONDS,
            retry_jitter: DEFAULT_RETRY_JITTER,
            visibility_timeout_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            poll_delay_seconds: DEFAULT_POLL_DELAY_SECONDS,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            shutdown_grace_seconds: DEFAULT_SHUTDOWN_GRACE_SECONDS,
            instrument_locks: false,
            producer: ProducerSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.store_endpoints.is_empty() {
            anyhow::bail!("store_endpoints must list at least one endpoint");
        }
        if self.queue_name.is_empty() {
            anyhow::bail!("queue_name must not be empty");
        }
        if self.lock_resource.is_empty() {
            anyhow::bail!("lock_resource must not be empty");
        }
        if self.lock_ttl_ms == 0 {
            anyhow::bail!("lock_ttl_ms must be positive");
        }
        if !(0.0..0.5).contains(&self.lock_drift_factor) {
            anyhow::bail!("lock_drift_factor must be in [0, 0.5)");
        }
        if self.lock_safety_margin_ms >= self.lock_ttl_ms {
            anyhow::bail!("lock_safety_margin_ms must be smaller than lock_ttl_ms");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be positive");
        }
        if !(0.0..1.0).contains(&self.retry_jitter) {
            anyhow::bail!("retry_jitter must be in [0, 1)");
        }
        if self.visibility_timeout_seconds <= 0.0 {
            anyhow::bail!("visibility_timeout_seconds must be positive");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("worker_concurrency must be positive");
        }
        if self.producer.max_in_flight == 0 {
            anyhow::bail!("producer.max_in_flight must be positive");
        }
        Ok(())
    }
}
