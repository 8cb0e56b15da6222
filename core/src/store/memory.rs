use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::store::DurableStore;

#[derive(Default)]
struct Shared {
    strings: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    counters: HashMap<String, u64>,
}

impl Shared {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.strings
            .retain(|_, (_, expires_at)| expires_at.is_none_or(|deadline| deadline > now));
    }
}

/// In-memory durable store for tests and local development. TTL-aware,
/// with an injectable unavailability switch so replica failure can be
/// simulated deterministically.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Shared>>,
    push_notify: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        let mut shared = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        shared.purge_expired();
        shared
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut shared = self.lock();
        if shared.strings.contains_key(key) {
            return Ok(false);
        }
        shared.strings.insert(
            key.to_string(),
            (value.to_string(), Some(Instant::now() + ttl)),
        );
        Ok(true)
    }

    async fn delete_if_matches(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut shared = self.lock();
        match shared.strings.get(key) {
            Some((value, _)) if value == expected => {
                shared.strings.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_if_matches(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut shared = self.lock();
        match shared.strings.get_mut(key) {
            Some((value, expires_at)) if value == expected => {
                *expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let shared = self.lock();
        Ok(shared.strings.get(key).map(|(value, _)| value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut shared = self.lock();
        let mut deleted = shared.strings.remove(key).is_some();
        deleted |= shared.lists.remove(key).is_some();
        deleted |= shared.hashes.remove(key).is_some();
        deleted |= shared.counters.remove(key).is_some();
        Ok(deleted)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check_available()?;
        let shared = self.lock();
        let Some((_, expires_at)) = shared.strings.get(key) else {
            return Ok(None);
        };
        Ok(expires_at.map(|deadline| deadline.saturating_duration_since(Instant::now())))
    }

    async fn counter_incr(&self, key: &str) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut shared = self.lock();
        let counter = shared.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn counter_get(&self, key: &str) -> Result<u64, StoreError> {
        self.check_available()?;
        let shared = self.lock();
        Ok(shared.counters.get(key).copied().unwrap_or(0))
    }

    async fn list_push(&self, key: &str, item: &str) -> Result<(), StoreError> {
        self.check_available()?;
        {
            let mut shared = self.lock();
            shared
                .lists
                .entry(key.to_string())
                .or_default()
                .push_back(item.to_string());
        }
        self.push_notify.notify_waiters();
        Ok(())
    }

    async fn list_pop_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_available()?;
            let notified = self.push_notify.notified();
            {
                let mut shared = self.lock();
                if let Some(list) = shared.lists.get_mut(key)
                    && let Some(item) = list.pop_front()
                {
                    return Ok(Some(item));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(deadline - now) => return Ok(None),
            }
        }
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        self.check_available()?;
        let shared = self.lock();
        Ok(shared.lists.get(key).map(|list| list.len() as u64).unwrap_or(0))
    }

    async fn list_remove(&self, key: &str, item: &str) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut shared = self.lock();
        let Some(list) = shared.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|entry| entry != item);
        Ok((before - list.len()) as u64)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let shared = self.lock();
        Ok(shared
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut shared = self.lock();
        let hash = shared.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check_available()?;
        let shared = self.lock();
        Ok(shared.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let shared = self.lock();
        let mut keys: Vec<String> = shared
            .strings
            .keys()
            .chain(shared.lists.keys())
            .chain(shared.hashes.keys())
            .chain(shared.counters.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_is_exclusive_until_expiry() {
        let store = MemoryStore::new();
        assert!(
            store
                .set_if_absent("k", "a", Duration::from_millis(40))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_if_absent("k", "b", Duration::from_millis(40))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            store
                .set_if_absent("k", "b", Duration::from_millis(40))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_if_matches_requires_current_value() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "token", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!store.delete_if_matches("k", "other").await.unwrap());
        assert!(store.delete_if_matches("k", "token").await.unwrap());
        assert!(!store.delete_if_matches("k", "token").await.unwrap());
    }

    #[tokio::test]
    async fn extend_if_matches_refreshes_ttl() {
        let store = MemoryStore::new();
        store
            .set_if_absent("k", "token", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(
            store
                .extend_if_matches("k", "token", Duration::from_secs(5))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("token"));
        assert!(
            !store
                .extend_if_matches("k", "stale", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn list_pop_blocking_waits_for_push() {
        let store = MemoryStore::new();
        let popper = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .list_pop_blocking("q", Duration::from_secs(2))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.list_push("q", "item").await.unwrap();
        assert_eq!(popper.await.unwrap().as_deref(), Some("item"));
    }

    #[tokio::test]
    async fn list_pop_blocking_times_out_empty() {
        let store = MemoryStore::new();
        let popped = store
            .list_pop_blocking("q", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn lists_are_fifo() {
        let store = MemoryStore::new();
        store.list_push("q", "1").await.unwrap();
        store.list_push("q", "2").await.unwrap();
        store.list_push("q", "3").await.unwrap();
        let first = store
            .list_pop_blocking("q", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("1"));
        assert_eq!(store.list_len("q").await.unwrap(), 2);
        assert_eq!(store.list_remove("q", "3").await.unwrap(), 1);
        assert_eq!(store.list_range("q").await.unwrap(), vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_store_errors_every_operation() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.ping().await.is_err());
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn scan_prefix_spans_all_namespaces() {
        let store = MemoryStore::new();
        store
            .set_if_absent("fq:claim:1", "w", Duration::from_secs(5))
            .await
            .unwrap();
        store.list_push("fq:queue:default", "1").await.unwrap();
        store
            .hash_set(
                "fq:job:1",
                &[("id".to_string(), "1".to_string())],
            )
            .await
            .unwrap();
        store.counter_incr("fq:counter:default").await.unwrap();
        let keys = store.scan_prefix("fq:").await.unwrap();
        assert_eq!(keys.len(), 4);
        assert!(store.scan_prefix("other:").await.unwrap().is_empty());
    }
}
