use super::api::ApiError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Serializes fetches per key so identical in-flight requests collapse into
/// one.
pub struct QueryCoalescer {
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QueryCoalescer {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    pub async fn forget_prefix(&self, prefix: &str) {
        self.inflight.lock().await.retain(|k, _| !k.starts_with(prefix));
    }
}

/// Cache entries are scoped per session so operators with different roles
/// never see each other's responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: String,
    pub resource: String,
}

impl CacheKey {
    pub fn new(scope: &str, resource: impl Into<String>) -> Self {
        Self {
            scope: scope.to_string(),
            resource: resource.into(),
        }
    }

    fn flat(&self) -> String {
        format!("{}\u{1f}{}", self.scope, self.resource)
    }
}

struct Entry {
    value: Value,
    fetched_at: Instant,
}

/// Stale-while-revalidate response cache. Fresh entries are served as-is;
/// stale ones are revalidated on read and kept as a fallback when the
/// revalidation fails.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Entry>>,
    coalescer: QueryCoalescer,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            coalescer: QueryCoalescer::new(),
        }
    }

    fn lookup(&self, key: &CacheKey, fresh_only: bool) -> Option<Value> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if fresh_only && entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Value, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>>,
    {
        if let Some(value) = self.lookup(key, true) {
            return Ok(value);
        }

        let _guard = self.coalescer.acquire(&key.flat()).await;
        // A caller that held the lock before us may have just filled it.
        if let Some(value) = self.lookup(key, true) {
            debug!("Cache hit after wait for {}", key.resource);
            return Ok(value);
        }

        match fetch().await {
            Ok(value) => {
                self.entries.write().insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(e) if !e.is_unauthorized() => match self.lookup(key, false) {
                Some(stale) => {
                    warn!("Revalidating {} failed, serving stale data: {}", key.resource, e);
                    Ok(stale)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Drops every scope's entries whose resource starts with `prefix`.
    /// Called after a mutation so the next read goes to the backend.
    pub fn invalidate(&self, prefix: &str) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.resource.starts_with(prefix));
        debug!("Invalidated {} cache entries for {}", before - entries.len(), prefix);
    }

    pub async fn clear_scope(&self, scope: &str) {
        self.entries.write().retain(|k, _| k.scope != scope);
        self.coalescer
            .forget_prefix(&format!("{}\u{1f}", scope))
            .await;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
