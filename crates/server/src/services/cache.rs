//! In-process cache for list responses.
//!
//! Entries are keyed by the requesting user and the full request path
//! (including the query string), so two users never share an entry even
//! when they hit the same URL. Entries expire after a fixed time-to-live
//! and are dropped early when a write touches data the user can see.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header::HeaderName, HeaderValue, Uri},
    response::{IntoResponse, Response},
    Json,
};
use moka::future::Cache;
use serde_json::Value;

use crate::error::Result;

pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub user_id: String,
    pub path: String,
}

impl CacheKey {
    pub fn new(user_id: impl Into<String>, uri: &Uri) -> Self {
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());

        Self {
            user_id: user_id.into(),
            path: path.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    entries: Cache<CacheKey, Arc<Value>>,
    /// Bumped by every invalidation. A body computed across a bump may
    /// predate the write and is not kept.
    generation: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<Value>> {
        self.entries.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, body: Arc<Value>) {
        self.entries.insert(key, body).await;
    }

    /// Returns the cached body for `key`, or runs `compute` and stores its
    /// result. Errors are passed through and never stored.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> Result<CachedJson>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(body) = self.get(&key).await {
            tracing::debug!(user = %key.user_id, path = %key.path, "cache hit");
            return Ok(CachedJson { body, hit: true });
        }

        tracing::debug!(user = %key.user_id, path = %key.path, "cache miss");
        let started = self.generation.load(Ordering::SeqCst);
        let body = Arc::new(compute().await?);
        self.insert(key.clone(), Arc::clone(&body)).await;

        // Checked after the insert so an invalidation that raced the
        // computation either sees the entry or is seen here.
        if self.generation.load(Ordering::SeqCst) != started {
            tracing::debug!(user = %key.user_id, path = %key.path, "discarding raced cache entry");
            self.entries.invalidate(&key).await;
        }

        Ok(CachedJson { body, hit: false })
    }

    /// Drops every entry belonging to one of `users`.
    pub async fn invalidate_users<I, S>(&self, users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: HashSet<String> = users.into_iter().map(Into::into).collect();
        if users.is_empty() {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        let stale: Vec<Arc<CacheKey>> = self
            .entries
            .iter()
            .filter(|(key, _)| users.contains(&key.user_id))
            .map(|(key, _)| key)
            .collect();

        tracing::debug!(users = users.len(), entries = stale.len(), "invalidating cached lists");

        for key in stale {
            self.entries.invalidate(key.as_ref()).await;
        }
    }

    pub fn invalidate_all(&self) {
        tracing::debug!("invalidating all cached lists");
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate_all();
    }
}

/// A list body served from (or just stored into) the cache.
#[derive(Debug)]
pub struct CachedJson {
    pub body: Arc<Value>,
    pub hit: bool,
}

impl IntoResponse for CachedJson {
    fn into_response(self) -> Response {
        let status = HeaderValue::from_static(if self.hit { "HIT" } else { "MISS" });
        let mut response = Json(self.body.as_ref()).into_response();
        response.headers_mut().insert(CACHE_STATUS_HEADER, status);
        response
    }
}
