use std::time::Duration;

use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use crate::{app_state::AppError, torrent_item::digest_prefix};

/// Marker value for playback queries that are being pre-cached at a debrid.
pub const DOWNLOAD_IN_PROGRESS: &str = "DOWNLOAD_IN_PROGRESS";

/// Builds the canonical cache key shape: 16 hex chars of
/// `sha256(domain|part|part|…)`.
pub fn cache_key(domain: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update("|");
        hasher.update(part);
    }
    digest_prefix(&hasher.finalize())
}

/// Process-wide cache handle over redis. Values are stored as JSON; domain
/// objects round-trip losslessly. Every operation degrades to a cache miss
/// on connection trouble, logged but never fatal to a request.
#[derive(Clone)]
pub struct KvCache {
    conn: ConnectionManager,
}

impl std::fmt::Debug for KvCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvCache").finish_non_exhaustive()
    }
}

impl KvCache {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::internal_error(format!("invalid redis url: {e}")))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = match conn.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(key, "Redis get failed: {e}");
                return None;
            }
        };
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key, "Cached value does not deserialize: {e}");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(key, "Value does not serialize: {e}");
                return;
            }
        };
        self.set_string(key, &raw, ttl).await;
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match conn.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(key, "Redis get failed: {e}");
                None
            }
        }
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = match ttl {
            Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await,
            None => conn.set(key, value).await,
        };
        if let Err(e) = result {
            tracing::error!(key, "Redis set failed: {e}");
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        match conn.del::<_, u64>(key).await {
            Ok(deleted) => deleted > 0,
            Err(e) => {
                tracing::error!(key, "Redis delete failed: {e}");
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        match conn.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::error!(key, "Redis exists failed: {e}");
                false
            }
        }
    }

    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut conn = self.conn.clone();
        match conn.ttl::<_, i64>(key).await {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
            Ok(_) => None,
            Err(e) => {
                tracing::error!(key, "Redis ttl failed: {e}");
                None
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut conn = self.conn.clone();
        match conn.expire::<_, bool>(key, ttl.as_secs().max(1) as i64).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!(key, "Redis expire failed: {e}");
                false
            }
        }
    }

    pub async fn flush(&self) {
        let mut conn = self.conn.clone();
        if let Err(e) = redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await {
            tracing::error!("Redis flush failed: {e}");
        }
    }

    /// Cache-or-compute. The fallible computation only runs on a miss; its
    /// result is stored with the given TTL before being returned.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        if let Some(cached) = self.get(key).await {
            tracing::debug!(key, "Cache hit");
            return Ok(cached);
        }
        tracing::debug!(key, "Cache miss, computing");
        let value = compute().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Distributed lock: `SET key NX EX ttl`. Returns `None` when another
    /// holder has the lease. The lease expires on its own if the holder
    /// dies; `release` drops it early.
    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<Option<KvLock>, AppError> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.map(|_| KvLock {
            key: key.to_string(),
            conn: self.conn.clone(),
        }))
    }
}

/// A held distributed lock. Dropping it without calling [KvLock::release]
/// leaves the lease to expire on its own.
pub struct KvLock {
    key: String,
    conn: ConnectionManager,
}

impl KvLock {
    pub async fn release(mut self) {
        if let Err(e) = self.conn.del::<_, u64>(&self.key).await {
            tracing::warn!(key = self.key, "Failed to release lock: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_are_16_hex_chars_and_stable() {
        let key = cache_key("media", &["movie", "Inception", "2010", "fr"]);
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, cache_key("media", &["movie", "Inception", "2010", "fr"]));
    }

    #[test]
    fn cache_keys_separate_domains_and_parts() {
        assert_ne!(
            cache_key("media", &["movie", "Inception"]),
            cache_key("stream", &["movie", "Inception"])
        );
        // The separator keeps `ab|c` and `a|bc` apart.
        assert_ne!(cache_key("k", &["ab", "c"]), cache_key("k", &["a", "bc"]));
    }
}
