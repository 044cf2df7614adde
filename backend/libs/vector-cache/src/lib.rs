//! Redis-backed vector cache shared by the recommendation services.
//!
//! The cache is best-effort: connection failure at construction is fatal,
//! but every per-operation failure degrades to a miss (`None`/`false`) plus
//! a logged warning. Callers recompute from source and never crash because
//! the cache backend is unavailable.

use redis::{AsyncCommands, Client};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default entry lifetime: 7 days.
pub const DEFAULT_TTL_SECS: u64 = 604_800;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(String),
}

/// Key-value store mapping namespaced string keys to fixed-length float
/// vectors with expiration.
///
/// Payloads are JSON arrays of `f32`, written atomically with `SETEX` so a
/// concurrent reader observes either the full vector or nothing.
pub struct VectorCache {
    client: Client,
    default_ttl: Duration,
}

impl VectorCache {
    /// Opens a client against `url` and verifies connectivity with a PING.
    ///
    /// Failure here aborts initialization; there is no degraded mode for a
    /// backend that was never reachable.
    pub async fn connect(url: &str, default_ttl: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            default_ttl,
        })
    }

    /// Wraps an already-constructed client without probing connectivity.
    ///
    /// For callers that manage connectivity themselves, and for tests that
    /// exercise the degraded path against an unreachable backend.
    pub fn with_client(client: Client, default_ttl: Duration) -> Self {
        Self {
            client,
            default_ttl,
        }
    }

    /// Cache key for an event vector: `event_vector:<id>`.
    pub fn event_vector_key(event_id: i64) -> String {
        format!("event_vector:{event_id}")
    }

    /// Cache key for a cluster vector: `cluster_vector:<name>`.
    pub fn cluster_vector_key(name: &str) -> String {
        format!("cluster_vector:{name}")
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, treating operation as cache miss");
                None
            }
        }
    }

    /// Stores a vector under `key` with the given (or default) TTL.
    pub async fn set(&self, key: &str, vector: &[f32], ttl: Option<Duration>) -> bool {
        let payload = match serde_json::to_string(vector) {
            Ok(p) => p,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize vector for cache");
                return false;
            }
        };

        let Some(mut conn) = self.connection().await else {
            return false;
        };

        let ttl = ttl.unwrap_or(self.default_ttl);
        let result: Result<(), _> = conn.set_ex(key, payload, ttl.as_secs()).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "Failed to write vector to cache");
                false
            }
        }
    }

    /// Reads a vector. A malformed stored payload is a miss, not an error.
    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut conn = self.connection().await?;

        let data: Option<String> = match conn.get(key).await {
            Ok(d) => d,
            Err(e) => {
                warn!(key, error = %e, "Failed to read vector from cache");
                return None;
            }
        };

        let data = data?;
        match serde_json::from_str::<Vec<f32>>(&data) {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(key, error = %e, "Malformed cached vector payload, treating as miss");
                None
            }
        }
    }

    /// Multi-get: the result has the same length and order as `keys`.
    pub async fn get_multiple(&self, keys: &[String]) -> Vec<Option<Vec<f32>>> {
        if keys.is_empty() {
            return Vec::new();
        }

        let Some(mut conn) = self.connection().await else {
            return vec![None; keys.len()];
        };

        let rows: Vec<Option<String>> = match conn.mget(keys).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Bulk cache read failed");
                return vec![None; keys.len()];
            }
        };

        rows.into_iter()
            .map(|row| row.and_then(|data| serde_json::from_str(&data).ok()))
            .collect()
    }

    /// Removes `key`. Returns whether an entry was actually deleted.
    pub async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };

        match conn.del::<_, i64>(key).await {
            Ok(deleted) => deleted > 0,
            Err(e) => {
                warn!(key, error = %e, "Failed to delete cache entry");
                false
            }
        }
    }

    /// Checks whether `key` exists in the backend.
    pub async fn exists(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };

        match conn.exists::<_, bool>(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, error = %e, "Failed to check cache key existence");
                false
            }
        }
    }

    /// Flushes the whole database.
    pub async fn clear_all(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };

        match redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to flush cache");
                false
            }
        }
    }
}
