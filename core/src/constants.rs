pub const JOB_KEY_PREFIX: &str = "fq:job:";
pub const JOB_COUNTER_PREFIX: &str = "fq:counter:";
pub const QUEUE_KEY_PREFIX: &str = "fq:queue:";
pub const ACTIVE_KEY_PREFIX: &str = "fq:active:";
pub const RETRY_KEY_PREFIX: &str = "fq:retry:";
pub const DLQ_KEY_PREFIX: &str = "fq:dlq:";
pub const CLAIM_KEY_PREFIX: &str = "fq:claim:";
pub const COMPLETED_COUNTER_PREFIX: &str = "fq:completed:";
pub const LOCK_KEY_PREFIX: &str = "fq:lock:";

pub const DEFAULT_WORKER_ID_PREFIX: &str = "fenceq_worker_";
