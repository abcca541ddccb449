//! Redis-backed response cache.
//!
//! Entries are stored as JSON under `{prefix}{fingerprint}` with a Redis
//! TTL matching the entry's own. Redis may keep a key a little past its
//! logical expiry (second granularity), so reads still check
//! [`CacheEntry::is_expired`].
//!
//! One multiplexed connection is opened lazily and shared by every call.
//! A failed connect is not remembered, so the next call tries again.

use std::future::Future;

use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::debug;

use ideaforge_core::cache::{CacheEntry, ResponseCache};
use ideaforge_types::error::CacheError;

pub const DEFAULT_PREFIX: &str = "ideaforge:cache:";

/// Shared response cache in Redis, for multi-process deployments.
pub struct RedisResponseCache {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    prefix: String,
}

impl RedisResponseCache {
    /// Create a cache for `redis_url`. No connection is made until first use.
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        Self::with_prefix(redis_url, DEFAULT_PREFIX)
    }

    pub fn with_prefix(redis_url: &str, prefix: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid Redis URL: {e}")))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            prefix: prefix.to_string(),
        })
    }

    fn build_key(&self, fingerprint: &str) -> String {
        format!("{}{}", self.prefix, fingerprint)
    }

    /// Handle to the shared connection, connecting on first use.
    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("opening Redis connection");
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| CacheError::Unavailable(format!("Redis connection failed: {e}")))
            })
            .await?;
        Ok(conn.clone())
    }

    #[cfg(test)]
    fn is_connected(&self) -> bool {
        self.conn.initialized()
    }
}

/// Decode a stored entry; an entry past its TTL reads as a miss.
fn decode_entry(json: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
    let entry: CacheEntry =
        serde_json::from_str(json).map_err(|e| CacheError::Corrupt(e.to_string()))?;
    Ok((!entry.is_expired(now)).then_some(entry))
}

/// Redis rejects `EX 0`; keep every stored entry for at least a second.
fn redis_ttl(entry: &CacheEntry) -> u64 {
    entry.ttl_secs.max(1)
}

impl ResponseCache for RedisResponseCache {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn get(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send {
        let key = self.build_key(fingerprint);
        async move {
            let mut conn = self.connection().await?;
            let data: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Unavailable(format!("Redis GET failed: {e}")))?;

            match data {
                Some(json) => {
                    let entry = decode_entry(&json, now)?;
                    debug!(key = %key, hit = entry.is_some(), "cache entry loaded from Redis");
                    Ok(entry)
                }
                None => Ok(None),
            }
        }
    }

    fn put(&self, entry: CacheEntry) -> impl Future<Output = Result<(), CacheError>> + Send {
        let key = self.build_key(&entry.fingerprint);
        async move {
            let json =
                serde_json::to_string(&entry).map_err(|e| CacheError::Corrupt(e.to_string()))?;
            let mut conn = self.connection().await?;
            redis::cmd("SET")
                .arg(&key)
                .arg(&json)
                .arg("EX")
                .arg(redis_ttl(&entry))
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| CacheError::Unavailable(format!("Redis SET failed: {e}")))?;

            debug!(key = %key, ttl = entry.ttl_secs, "cache entry saved to Redis");
            Ok(())
        }
    }
}
