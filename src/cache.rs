use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct CachedBody {
    body: Bytes,
    stored_at: Instant,
}

/// Short-lived reuse of successful upstream bodies, keyed by cloud and video.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedBody>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn key(cloud_name: &str, public_id: &str) -> String {
        format!("{cloud_name}/{public_id}")
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if !self.enabled() {
            return None;
        }
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|cached| cached.stored_at.elapsed() < self.ttl)
            .map(|cached| cached.body.clone())
    }

    pub async fn put(&self, key: String, body: Bytes) {
        if !self.enabled() {
            return;
        }
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, cached| cached.stored_at.elapsed() < ttl);
        entries.insert(
            key,
            CachedBody {
                body,
                stored_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let key = ResponseCache::key("demo", "clip");
        cache.put(key.clone(), Bytes::from_static(b"{}")).await;
        assert_eq!(cache.get(&key).await, Some(Bytes::from_static(b"{}")));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let cache = ResponseCache::new(Duration::ZERO);
        assert!(!cache.enabled());
        cache.put("demo/clip".to_string(), Bytes::from_static(b"{}")).await;
        assert!(cache.get("demo/clip").await.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_cloud() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache
            .put(ResponseCache::key("a", "clip"), Bytes::from_static(b"1"))
            .await;
        assert!(cache.get(&ResponseCache::key("b", "clip")).await.is_none());
    }
}
