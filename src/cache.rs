//! Per-domain request cache.
//!
//! Successful GET responses are cached by the full request URL, separately for each cloud domain.
//! A [CacheRegistry] holds the caches for every domain and is shared between sessions, so that a
//! resource fetched by one session is served from memory to the next. Logging in to a domain as
//! a different user clears that domain's cache.

use std::sync::Arc;

use hashbrown::HashMap;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::metrics::{CACHE_HITS, CACHE_MISSES};
use crate::models::Identity;

#[derive(Debug, Default)]
struct DomainCacheState {
    /// User most recently logged in to this domain.
    user: Option<String>,
    /// Cached payloads keyed by request URL.
    entries: HashMap<String, Value>,
}

/// Cached responses for a single domain.
#[derive(Debug, Default)]
pub struct DomainCache {
    state: Mutex<DomainCacheState>,
}

impl DomainCache {
    /// Look up a cached payload.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().await.entries.get(key).cloned()
    }

    /// Store a payload, replacing any previous entry for the key.
    pub async fn put(&self, key: String, payload: Value) {
        self.state.lock().await.entries.insert(key, payload);
    }

    /// Remove all cached payloads.
    pub async fn invalidate(&self) {
        self.state.lock().await.entries.clear();
    }

    /// Record a login, clearing the cache if a different user was logged in before.
    ///
    /// Returns whether the cache was cleared. A login without a user name never clears the cache.
    pub async fn login(&self, identity: &Identity) -> bool {
        let mut state = self.state.lock().await;
        let Some(user) = &identity.user else {
            return false;
        };
        let invalidated = matches!(&state.user, Some(previous) if previous != user);
        if invalidated {
            state.entries.clear();
        }
        state.user = Some(user.clone());
        invalidated
    }

    /// Number of cached payloads.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Whether no payloads are cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// A map from cloud domain to its [DomainCache].
///
/// Caches are created on first use and never removed.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    /// A read-write lock synchronises access to the map, optimised for reads.
    domains: RwLock<HashMap<String, Arc<DomainCache>>>,
}

impl CacheRegistry {
    /// Create and return an empty [CacheRegistry].
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the cache for a domain.
    ///
    /// # Arguments
    ///
    /// * `domain`: Cloud domain, e.g. `https://iotile.cloud`
    pub async fn domain(&self, domain: &str) -> Arc<DomainCache> {
        // Common case: return an existing cache from the map.
        {
            let domains = self.domains.read().await;
            if let Some(cache) = domains.get(domain) {
                return cache.clone();
            }
        }
        let mut domains = self.domains.write().await;
        // Another task may have created the cache since the read lock was dropped.
        domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating request cache for {}", domain);
                Arc::new(DomainCache::default())
            })
            .clone()
    }

    /// Look up a cached payload for a domain.
    pub async fn get(&self, domain: &str, key: &str) -> Option<Value> {
        self.domain(domain).await.get(key).await
    }

    /// Store a payload for a domain.
    pub async fn put(&self, domain: &str, key: String, payload: Value) {
        self.domain(domain).await.put(key, payload).await
    }

    /// Clear the cache of a domain.
    pub async fn invalidate(&self, domain: &str) {
        self.domain(domain).await.invalidate().await
    }

    /// Record a login to a domain. See [DomainCache::login].
    pub async fn login(&self, domain: &str, identity: &Identity) -> bool {
        let invalidated = self.domain(domain).await.login(identity).await;
        if invalidated {
            tracing::info!("Cleared request cache for {} after change of user", domain);
        }
        invalidated
    }

    /// Number of cached payloads for a domain.
    pub async fn len(&self, domain: &str) -> usize {
        self.domain(domain).await.len().await
    }
}

/// A session's view of the cache of its domain.
///
/// When caching is disabled every lookup misses and nothing is stored.
#[derive(Clone, Debug)]
pub struct SessionCache {
    cache: Arc<DomainCache>,
    enabled: bool,
}

impl SessionCache {
    /// Return a new SessionCache.
    pub fn new(cache: Arc<DomainCache>, enabled: bool) -> Self {
        Self { cache, enabled }
    }

    /// Whether caching is enabled for this session.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a cached payload.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let payload = self.cache.get(key).await;
        if payload.is_some() {
            CACHE_HITS.inc();
            tracing::debug!("Cache hit for {}", key);
        } else {
            CACHE_MISSES.inc();
        }
        payload
    }

    /// Store a payload.
    pub async fn put(&self, key: String, payload: Value) {
        if self.enabled {
            self.cache.put(key, payload).await
        }
    }

    /// The underlying domain cache.
    pub fn domain_cache(&self) -> &Arc<DomainCache> {
        &self.cache
    }
}
