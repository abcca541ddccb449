//! Content-addressed response cache.
//!
//! Entries are keyed by a SHA-256 fingerprint of the request's semantic
//! content and carry their own TTL. Expiry is lazy: an entry past
//! `cached_at + ttl` is treated as absent (and dropped) on read.
//!
//! `ResponseCache` uses RPITIT like the other ports in this crate;
//! `BoxResponseCache` erases the backend so the router can run against
//! the in-memory map or Redis chosen at startup.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ideaforge_types::error::CacheError;
use ideaforge_types::provider::CapabilityTier;
use ideaforge_types::request::{RouterResponse, TaskType};

/// A cached response and its validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub response: RouterResponse,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(
        fingerprint: impl Into<String>,
        response: RouterResponse,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            response,
            cached_at: now,
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self.cached_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Logically absent once `now` is strictly past `cached_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for a request: SHA-256 over task type, normalized prompt,
/// context, and the capability tier the request prefers.
///
/// Fields are length-prefixed so that moving text between prompt and
/// context can never produce the same key.
pub fn fingerprint(
    task_type: TaskType,
    prompt: &str,
    context: Option<&str>,
    tier: CapabilityTier,
) -> String {
    let mut hasher = Sha256::new();
    let task = task_type.to_string();
    let prompt = normalize_prompt(prompt);
    let tier = tier.to_string();
    let fields = [task.as_str(), prompt.as_str(), context.unwrap_or(""), tier.as_str()];
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    // Distinguish "no context" from "empty context".
    hasher.update([u8::from(context.is_some())]);
    format!("{:x}", hasher.finalize())
}

/// Trait for response cache backends.
///
/// Backend failures are reported as `CacheError`; the router logs them and
/// carries on as if the cache missed.
pub trait ResponseCache: Send + Sync {
    /// Short backend name for logs ("memory", "redis").
    fn backend(&self) -> &'static str;

    /// Look up a live entry. Expired entries are never returned.
    fn get(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send;

    /// Store an entry, replacing any previous one (last write wins).
    fn put(&self, entry: CacheEntry) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Object-safe version of [`ResponseCache`] with boxed futures.
pub trait ResponseCacheDyn: Send + Sync {
    fn backend(&self) -> &'static str;

    fn get_boxed<'a>(
        &'a self,
        fingerprint: &'a str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CacheEntry>, CacheError>> + Send + 'a>>;

    fn put_boxed<'a>(
        &'a self,
        entry: CacheEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send + 'a>>;
}

impl<T: ResponseCache> ResponseCacheDyn for T {
    fn backend(&self) -> &'static str {
        ResponseCache::backend(self)
    }

    fn get_boxed<'a>(
        &'a self,
        fingerprint: &'a str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CacheEntry>, CacheError>> + Send + 'a>> {
        Box::pin(self.get(fingerprint, now))
    }

    fn put_boxed<'a>(
        &'a self,
        entry: CacheEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send + 'a>> {
        Box::pin(self.put(entry))
    }
}

/// Type-erased response cache.
pub struct BoxResponseCache {
    inner: Box<dyn ResponseCacheDyn + Send + Sync>,
}

impl BoxResponseCache {
    pub fn new<T: ResponseCache + 'static>(cache: T) -> Self {
        Self {
            inner: Box::new(cache),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    pub async fn get(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        self.inner.get_boxed(fingerprint, now).await
    }

    pub async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.inner.put_boxed(entry).await
    }
}

/// Process-local cache backed by `DashMap`.
///
/// Cloning produces a shared view of the same map. Entries are cloned out on
/// read so no map guard is ever held across an await.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResponseCache for InMemoryResponseCache {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn get(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send {
        let hit = self.entries.get(fingerprint).map(|r| r.value().clone());
        let result = match hit {
            Some(entry) if entry.is_expired(now) => {
                self.entries
                    .remove_if(fingerprint, |_, stored| stored.is_expired(now));
                None
            }
            other => other,
        };
        async move { Ok(result) }
    }

    fn put(&self, entry: CacheEntry) -> impl Future<Output = Result<(), CacheError>> + Send {
        self.entries.insert(entry.fingerprint.clone(), entry);
        async { Ok(()) }
    }
}
