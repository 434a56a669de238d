use crate::domain::ports::SharedCacheService;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// In-process stand-in for the shared cache tier, wired when no
/// external cache server is configured. Single-node deployments lose
/// nothing; multi-node ones plug a real client into the same port.
pub struct InProcessSharedCache {
    entries: RwLock<HashMap<String, (Instant, Vec<u8>)>>,
}

impl InProcessSharedCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InProcessSharedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCacheService for InProcessSharedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(expires_at, _)| *expires_at > Instant::now())
            .map(|(_, bytes)| bytes.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        // Opportunistic sweep keeps the map from growing unbounded.
        let now = Instant::now();
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        entries.insert(key.to_string(), (now + ttl, value.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = InProcessSharedCache::new();
        cache
            .set("k", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = InProcessSharedCache::new();
        cache
            .set("k", b"value", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
