//! In-process dedupe memory
//!
//! Good for a single engine process. Entries expire after the configured
//! TTL and are purged by [`DedupeStore::sweep`], which the engine calls on
//! a fixed interval independent of request handling.

use async_trait::async_trait;
use callhub_core::models::DedupeKey;
use callhub_core::traits::DedupeStore;
use callhub_core::AppError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct BucketEntry {
    call_id: String,
    expires_at: Instant,
}

/// Dedupe memory held in two lock-protected maps
#[derive(Debug)]
pub struct MemoryDedupeCache {
    buckets: Mutex<HashMap<DedupeKey, BucketEntry>>,
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl MemoryDedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of live entries (buckets + seen markers), expired ones included
    /// until the next sweep
    pub fn len(&self) -> usize {
        self.buckets.lock().len() + self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupeStore for MemoryDedupeCache {
    async fn find_bucket(&self, key: &DedupeKey) -> Result<Option<String>, AppError> {
        let now = Instant::now();
        let buckets = self.buckets.lock();
        Ok(buckets
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.call_id.clone()))
    }

    async fn claim_bucket(
        &self,
        key: &DedupeKey,
        call_id: &str,
    ) -> Result<Option<String>, AppError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        if let Some(entry) = buckets.get(key) {
            if entry.expires_at > now && entry.call_id != call_id {
                debug!(key = %key, holder = %entry.call_id, call_id, "Bucket already claimed");
                return Ok(Some(entry.call_id.clone()));
            }
        }

        buckets.insert(
            key.clone(),
            BucketEntry {
                call_id: call_id.to_string(),
                expires_at: now + self.ttl,
            },
        );
        Ok(None)
    }

    async fn mark_seen(&self, call_id: &str) -> Result<bool, AppError> {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        let previous = seen.insert(call_id.to_string(), now + self.ttl);
        Ok(previous.is_some_and(|expires_at| expires_at > now))
    }

    async fn sweep(&self) -> Result<usize, AppError> {
        let now = Instant::now();

        let mut removed = 0;
        {
            let mut buckets = self.buckets.lock();
            let before = buckets.len();
            buckets.retain(|_, entry| entry.expires_at > now);
            removed += before - buckets.len();
        }
        {
            let mut seen = self.seen.lock();
            let before = seen.len();
            seen.retain(|_, expires_at| *expires_at > now);
            removed += before - seen.len();
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DedupeKey {
        DedupeKey::new("user-1", "+15550100", 10)
    }

    #[tokio::test]
    async fn test_first_claim_wins() {
        let cache = MemoryDedupeCache::new(Duration::from_secs(60));

        assert_eq!(cache.claim_bucket(&key(), "CA1").await.unwrap(), None);
        assert_eq!(
            cache.claim_bucket(&key(), "CA2").await.unwrap(),
            Some("CA1".to_string())
        );
        // Re-claim by the holder is fine
        assert_eq!(cache.claim_bucket(&key(), "CA1").await.unwrap(), None);
        assert_eq!(
            cache.find_bucket(&key()).await.unwrap(),
            Some("CA1".to_string())
        );
    }

    #[tokio::test]
    async fn test_mark_seen() {
        let cache = MemoryDedupeCache::new(Duration::from_secs(60));
        assert!(!cache.mark_seen("CA1").await.unwrap());
        assert!(cache.mark_seen("CA1").await.unwrap());
        assert!(!cache.mark_seen("CA2").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_and_sweep() {
        let cache = MemoryDedupeCache::new(Duration::from_secs(60));
        cache.claim_bucket(&key(), "CA1").await.unwrap();
        cache.mark_seen("CA1").await.unwrap();
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;

        // Expired entries no longer fold
        assert_eq!(cache.find_bucket(&key()).await.unwrap(), None);
        assert!(!cache.mark_seen("CA1").await.unwrap());

        // The bucket is gone after the sweep, the fresh seen marker stays
        assert_eq!(cache.sweep().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.claim_bucket(&key(), "CA2").await.unwrap(), None);
    }
}
