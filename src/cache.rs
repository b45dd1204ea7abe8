//! TTL cache with an injected clock, used by the identity resolver.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::info;

/// Time source injected into the cache so expiry is deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Expiring key-value cache. Entries live for a fixed TTL; the whole cache is
/// cleared when it grows past `max_entries` to bound memory.
pub struct TtlCache<K, V> {
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    inner: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            max_entries,
            clock,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Get a live entry; expired entries read as absent.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let cache = self.inner.read().await;
        cache
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        let mut cache = self.inner.write().await;
        if cache.len() >= self.max_entries {
            cache.clear();
            info!("Cleared identity cache (exceeded {} entries)", self.max_entries);
        }
        cache.insert(key, Entry { value, expires_at });
    }

    /// Drop entries whose TTL has elapsed.
    pub async fn clear_expired(&self) {
        let now = self.clock.now();
        let mut cache = self.inner.write().await;
        cache.retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn entry_is_readable_until_ttl_elapses() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<String, u32> =
            TtlCache::new(Duration::from_secs(60), 100, clock.clone());

        cache.insert("k".to_string(), 7).await;
        assert_eq!(cache.get(&"k".to_string()).await, Some(7));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&"k".to_string()).await, Some(7));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get(&"k".to_string()).await, None);
    }

    #[tokio::test]
    async fn clear_expired_prunes_only_dead_entries() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<String, u32> =
            TtlCache::new(Duration::from_secs(30), 100, clock.clone());

        cache.insert("old".to_string(), 1).await;
        clock.advance(Duration::from_secs(20));
        cache.insert("fresh".to_string(), 2).await;
        clock.advance(Duration::from_secs(15));

        cache.clear_expired().await;
        assert_eq!(cache.get(&"old".to_string()).await, None);
        assert_eq!(cache.get(&"fresh".to_string()).await, Some(2));
    }

    #[tokio::test]
    async fn cache_clears_when_over_capacity() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 2, clock);

        cache.insert(1, 1).await;
        cache.insert(2, 2).await;
        cache.insert(3, 3).await;

        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.get(&3).await, Some(3));
    }
}
