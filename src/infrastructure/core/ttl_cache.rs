use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// In-process TTL cache with LRU eviction at a fixed capacity. Backs
/// the quote gateway's L1 tier and the persistence read-through cache.
/// Lookups and inserts never suspend beyond the lock.
pub struct TtlCache<V: Clone> {
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
}

struct CacheInner<V> {
    entries: HashMap<String, Entry<V>>,
    // Recency list, most recent last. Size stays in lockstep with `entries`.
    order: Vec<String>,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let value = entry.value.clone();
                touch(&mut inner.order, key);
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.entries.insert(
            key.clone(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        touch(&mut inner.order, &key);

        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.order.first().cloned() {
                inner.entries.remove(&oldest);
                inner.order.remove(0);
            } else {
                break;
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.entries.remove(key);
        inner.order.retain(|k| k != key);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn touch(order: &mut Vec<String>, key: &str) {
    order.retain(|k| k != key);
    order.push(key.to_string());
}
