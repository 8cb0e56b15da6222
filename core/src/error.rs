use thiserror::Error;

/// Failures at the durable-store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient infrastructure failure. Call sites that can retry do so
    /// with backoff; everything else propagates it, never swallows it.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record in store: {0}")]
    Corrupt(String),
}

/// Failures of the distributed lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    /// Quorum was not reached within the retry budget. Recoverable: the
    /// job handler surfaces it as a retryable failure.
    #[error("lock not acquired after {attempts} attempt(s)")]
    NotAcquired { attempts: u32 },
    /// The caller's cancellation fired while retrying.
    #[error("lock acquisition cancelled")]
    Cancelled,
    /// The presented fencing token is no longer current, or validity ran
    /// out. Fatal to the current critical section; partial work must be
    /// treated as not committed.
    #[error("lock lost: fencing token is no longer current")]
    Lost,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures reported by a job handler back to the queue.
#[derive(Debug, Error)]
pub enum JobError {
    /// Lock acquisition failed before the critical section ran. Retryable,
    /// but kept distinct from handler errors so telemetry can tell the two
    /// apart.
    #[error("lock not acquired: {0}")]
    LockNotAcquired(String),
    #[error("{0}")]
    Retryable(String),
    /// Dead-letters the job immediately, without consuming the remaining
    /// retry budget.
    #[error("{0}")]
    Fatal(String),
}

/// Failures of queue-level operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue has {active} active job(s); pass force to obliterate anyway")]
    ObliterateRefused { active: u64 },
    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
