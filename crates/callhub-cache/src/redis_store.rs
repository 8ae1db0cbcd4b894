//! Redis-backed dedupe memory
//!
//! Claims use `SET key value NX EX ttl`, so several engine processes behind
//! a load balancer fold duplicates against the same memory. Redis expires
//! entries on its own; [`DedupeStore::sweep`] has nothing to do.

use crate::keys;
use async_trait::async_trait;
use callhub_core::models::DedupeKey;
use callhub_core::traits::DedupeStore;
use callhub_core::AppError;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Dedupe memory on a shared Redis
///
/// Wraps a Redis ConnectionManager for multiplexed access.
#[derive(Clone)]
pub struct RedisDedupeCache {
    manager: ConnectionManager,
    ttl_secs: u64,
}

impl RedisDedupeCache {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the connection fails
    pub async fn new(url: &str, ttl: Duration) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::CacheConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self {
            manager,
            ttl_secs: ttl.as_secs().max(1),
        })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis ping failed: {}", e);
                AppError::Cache(format!("Ping failed: {}", e))
            })?;
        Ok(())
    }

    #[cfg(test)]
    async fn flush_db(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// `SET key value NX EX ttl`; `true` when the key was written
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(reply.is_some())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::CacheConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }
}

#[async_trait]
impl DedupeStore for RedisDedupeCache {
    async fn find_bucket(&self, key: &DedupeKey) -> Result<Option<String>, AppError> {
        let redis_key = keys::bucket_key(key);
        debug!("GET {}", redis_key);
        let mut conn = self.manager.clone();
        conn.get(&redis_key).await.map_err(Self::map_redis_error)
    }

    async fn claim_bucket(
        &self,
        key: &DedupeKey,
        call_id: &str,
    ) -> Result<Option<String>, AppError> {
        let redis_key = keys::bucket_key(key);
        if self.set_nx(&redis_key, call_id).await? {
            debug!("Claimed {} for {}", redis_key, call_id);
            return Ok(None);
        }

        let mut conn = self.manager.clone();
        let holder: Option<String> = conn.get(&redis_key).await.map_err(Self::map_redis_error)?;
        match holder {
            Some(holder) if holder != call_id => Ok(Some(holder)),
            Some(_) => Ok(None),
            // Expired between SET and GET; retry the claim once
            None => {
                if self.set_nx(&redis_key, call_id).await? {
                    Ok(None)
                } else {
                    conn.get(&redis_key).await.map_err(Self::map_redis_error)
                }
            }
        }
    }

    async fn mark_seen(&self, call_id: &str) -> Result<bool, AppError> {
        let written = self.set_nx(&keys::call_seen_key(call_id), "1").await?;
        if written {
            return Ok(false);
        }

        // Refresh the TTL of an existing marker
        let mut conn = self.manager.clone();
        let _: bool = conn
            .expire(keys::call_seen_key(call_id), self.ttl_secs as i64)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(true)
    }

    async fn sweep(&self) -> Result<usize, AppError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_cache() -> RedisDedupeCache {
        let cache = RedisDedupeCache::new("redis://127.0.0.1:6379", Duration::from_secs(60))
            .await
            .expect("Failed to connect to Redis");
        cache.flush_db().await.expect("Failed to flush DB");
        cache
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ping() {
        let cache = setup_cache().await;
        assert!(cache.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_claim_bucket() {
        let cache = setup_cache().await;
        let key = DedupeKey::new("user-1", "+15550100", 7);

        assert_eq!(cache.claim_bucket(&key, "CA1").await.unwrap(), None);
        assert_eq!(
            cache.claim_bucket(&key, "CA2").await.unwrap(),
            Some("CA1".to_string())
        );
        assert_eq!(cache.claim_bucket(&key, "CA1").await.unwrap(), None);
        assert_eq!(
            cache.find_bucket(&key).await.unwrap(),
            Some("CA1".to_string())
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_mark_seen() {
        let cache = setup_cache().await;
        assert!(!cache.mark_seen("CA1").await.unwrap());
        assert!(cache.mark_seen("CA1").await.unwrap());
    }
}
