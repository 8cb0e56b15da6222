pub mod backoff;
pub mod constants;
pub mod error;
pub mod job;
pub mod lock;
pub mod producer;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use error::{JobError, LockError, QueueError, StoreError};
pub use job::{Job, JobId, JobState, QueueCounts};
pub use lock::{Lock, LockManager, LockObserver, NoopLockObserver, RetryPolicy};
pub use producer::Producer;
pub use queue::{JobHandler, JobQueue, QueueOptions};
pub use store::{DurableStore, MemoryStore, RedisStore};
pub use worker::{LockedHandler, WorkerRuntime, generate_worker_id};
