//! Versioned key-value cache backed by Redis.
//!
//! Keys are namespaced under a deploy-wide version prefix so a prefix bump
//! invalidates everything at once. Cache trouble is never allowed to fail a
//! request: reads degrade to misses, writes are logged and dropped.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const CACHE_PREFIX: &str = "jetstream:cache:v1:";

pub const ENTITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const SEARCH_TTL: Duration = Duration::from_secs(48 * 60 * 60);
pub const COVER_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const LYRICS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const PATH_INDEX_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Shared handle to the cache. Cloning is cheap; the underlying connection
/// manager multiplexes and reconnects on its own.
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    pub async fn connect(addr: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(format!("redis://{addr}"))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn key(suffix: &str) -> String {
        format!("{CACHE_PREFIX}{suffix}")
    }

    /// Fetch and deserialize a cached value. Any failure is a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, suffix: &str) -> Option<T> {
        let key = Self::key(suffix);
        let mut conn = self.conn.clone();
        let raw: Option<String> = match conn.get(&key).await {
            Ok(v) => v,
            Err(e) => {
                warn!("cache read failed for {key}: {e}");
                return None;
            }
        };
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(v) => {
                debug!("cache hit: {key}");
                Some(v)
            }
            Err(e) => {
                warn!("cache entry for {key} is unreadable, ignoring: {e}");
                None
            }
        }
    }

    /// Serialize and store a value with a TTL. Errors are logged only.
    pub async fn put_json<T: Serialize>(&self, suffix: &str, value: &T, ttl: Duration) {
        let key = Self::key(suffix);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache serialize failed for {key}: {e}");
                return;
            }
        };
        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(&key, raw, ttl.as_secs()).await {
            warn!("cache write failed for {key}: {e}");
        }
    }

    pub async fn get_string(&self, suffix: &str) -> Option<String> {
        let key = Self::key(suffix);
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(&key).await {
            Ok(v) => v.filter(|s| !s.is_empty()),
            Err(e) => {
                warn!("cache read failed for {key}: {e}");
                None
            }
        }
    }

    pub async fn put_string(&self, suffix: &str, value: &str, ttl: Duration) {
        let key = Self::key(suffix);
        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(&key, value, ttl.as_secs()).await {
            warn!("cache write failed for {key}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_the_version_prefix() {
        assert_eq!(
            Cache::key("song:ext-p-song-1"),
            "jetstream:cache:v1:song:ext-p-song-1"
        );
    }

    #[test]
    fn ttls_match_the_contract() {
        assert_eq!(ENTITY_TTL.as_secs(), 86_400);
        assert_eq!(SEARCH_TTL.as_secs(), 172_800);
        assert_eq!(COVER_TTL, LYRICS_TTL);
        assert_eq!(PATH_INDEX_TTL.as_secs(), 90 * 86_400);
    }
}
