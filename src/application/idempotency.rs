use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

type Slots = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// Removes the in-flight slot of a key when the call ends, including when
/// the caller's future is dropped mid-call.
struct InFlight<'a> {
    slots: &'a Slots,
    key: &'a str,
    slot: Arc<Mutex<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slots.get(self.key).is_some_and(|s| Arc::ptr_eq(s, &self.slot)) {
            slots.remove(self.key);
        }
    }
}

/// TTL cache of operation results keyed by a caller-supplied idempotency key.
///
/// Only successful results are cached. Concurrent calls with the same key
/// are serialized, so the operation runs at most once per live key. Expired
/// entries are dropped on every insert.
pub struct IdempotencyCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
    in_flight: Slots,
}

impl<T: Clone + Send> IdempotencyCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: T) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Return the cached value for `key`, or run `f` and cache its success.
    ///
    /// The flag is true when the value came from the cache.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, f: F) -> Result<(T, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_try_insert_if(key, f, |_| true).await
    }

    /// Like `get_or_try_insert_with`, caching only values accepted by `cacheable`.
    pub async fn get_or_try_insert_if<F, Fut, E, P>(
        &self,
        key: &str,
        f: F,
        cacheable: P,
    ) -> Result<(T, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&T) -> bool,
    {
        let slot = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _in_flight = InFlight {
            slots: &self.in_flight,
            key,
            slot: slot.clone(),
        };
        let _guard = slot.lock().await;

        if let Some(value) = self.get(key).await {
            info!("Idempotency hit for {}", key);
            return Ok((value, true));
        }

        let result = f().await;
        if let Ok(value) = &result
            && cacheable(value)
        {
            self.insert(key, value.clone()).await;
        }
        result.map(|value| (value, false))
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Idempotency cache purged {} expired entries", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for expected_cached in [false, true] {
            let (value, cached) = cache
                .get_or_try_insert_with("order-1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
            assert_eq!(cached, expected_cached);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: IdempotencyCache<u32> = IdempotencyCache::new(Duration::from_secs(60));
        let first = cache
            .get_or_try_insert_with("k", || async { Err::<u32, _>("boom") })
            .await;
        assert!(first.is_err());

        let (value, cached) = cache
            .get_or_try_insert_with("k", || async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!((value, cached), (7, false));
    }

    #[tokio::test]
    async fn test_uncacheable_values_rerun() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        for _ in 0..2 {
            let (_, cached) = cache
                .get_or_try_insert_if("k", || async { Ok::<_, String>(0) }, |v| *v > 0)
                .await
                .unwrap();
            assert!(!cached);
        }
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_clear_drops_live_entries() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        assert_eq!(cache.ttl(), Duration::from_secs(60));

        tokio_test::block_on(async {
            cache.insert("a", 1u8).await;
            cache.insert("b", 2u8).await;
            assert_eq!(cache.len().await, 2);
            cache.clear().await;
            assert!(cache.is_empty().await);
            assert_eq!(cache.get("a").await, None);
        });
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = IdempotencyCache::new(Duration::from_millis(20));
        cache.insert("k", "v").await;
        assert_eq!(cache.get("k").await, Some("v"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await, None);

        cache.insert("a", "1").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_drops_expired_keys() {
        let cache = IdempotencyCache::new(Duration::from_millis(20));
        cache.insert("old-1", 1).await;
        cache.insert("old-2", 2).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.insert("new", 3).await;

        // The old keys are gone without ever being looked up again
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("new").await, Some(3));
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_its_slot() {
        let cache: IdempotencyCache<u32> = IdempotencyCache::new(Duration::from_secs(60));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_try_insert_with("slow", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, String>(1)
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(cache.in_flight.lock().unwrap().is_empty());

        let (value, cached) = cache
            .get_or_try_insert_with("slow", || async { Ok::<_, String>(2) })
            .await
            .unwrap();
        assert_eq!((value, cached), (2, false));
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_run_once() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_try_insert_with("same", || async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok::<_, String>("done")
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().0, "done");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
