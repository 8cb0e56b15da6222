pub const DEFAULT_STORE_ENDPOINT: &str = "redis://localhost:6379/0";
pub const DEFAULT_QUEUE_NAME: &str = "default";
pub const DEFAULT_LOCK_RESOURCE: &str = "default";

pub const DEFAULT_LOCK_TTL_MS: u64 = 10_000;
pub const DEFAULT_LOCK_DRIFT_FACTOR: f64 = 0.01;
pub const DEFAULT_LOCK_SAFETY_MARGIN_MS: u64 = 500;
pub const DEFAULT_LOCK_RETRY_DELAY_MS: u64 = 200;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_RETRY_DELAY_SECONDS: f64 = 0.5;
pub const DEFAULT_MAX_RETRY_DELAY_SECONDS: f64 = 60.0;
pub const DEFAULT_RETRY_JITTER: f64 = 0.5;

pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: f64 = 30.0;
pub const DEFAULT_POLL_DELAY_SECONDS: f64 = 0.1;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 10;
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: f64 = 10.0;

pub const DEFAULT_PRODUCER_COUNT: u64 = 100;
pub const DEFAULT_PRODUCER_INTERVAL_MS: u64 = 2_500;
pub const DEFAULT_PRODUCER_MAX_IN_FLIGHT: u64 = 100;
