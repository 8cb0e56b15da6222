use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Atomic primitives the core requires from durable storage. The queue
/// talks to one primary store; the lock manager holds one handle per
/// replica. Implementations must support native TTL expiry.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Conditional write: set `key` to `value` with a TTL only if the key
    /// does not exist. The lock acquire primitive.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Compare-and-delete: remove `key` only while it still holds
    /// `expected`. The lock release primitive; stale tokens are a no-op.
    async fn delete_if_matches(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Compare-and-expire: refresh the TTL only while `key` still holds
    /// `expected`. The lock extend primitive.
    async fn extend_if_matches(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    async fn counter_incr(&self, key: &str) -> Result<u64, StoreError>;
    async fn counter_get(&self, key: &str) -> Result<u64, StoreError>;

    /// FIFO push to the tail of a list.
    async fn list_push(&self, key: &str, item: &str) -> Result<(), StoreError>;
    /// Pop from the head of a list, waiting up to `timeout` for an item.
    async fn list_pop_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError>;
    async fn list_len(&self, key: &str) -> Result<u64, StoreError>;
    /// Remove every occurrence of `item`; returns how many were removed.
    async fn list_remove(&self, key: &str, item: &str) -> Result<u64, StoreError>;
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
}
