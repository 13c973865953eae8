//! # Identity Resolution
//!
//! Maps a client's session token to the identity (user objectId) that ACLs
//! are written against.
//!
//! [`IdentityCache`] sits in front of an [`IdentityResolver`]:
//! - hits are answered synchronously from an LRU
//! - concurrent misses for one token share a single in-flight lookup
//! - lookups are bounded by a timeout
//! - not-found and failures are never cached

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use super::errors::{AuthError, AuthResult};
use super::lru::LruCache;

/// Default identity cache capacity
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Resolves a session token to an identity.
///
/// `Ok(None)` means the token is unknown.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, session_token: &str) -> AuthResult<Option<String>>;
}

/// Fixed token table. With no entries every token is unknown.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityResolver {
    sessions: HashMap<String, String>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, token: impl Into<String>, identity: impl Into<String>) -> Self {
        self.sessions.insert(token.into(), identity.into());
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, session_token: &str) -> AuthResult<Option<String>> {
        Ok(self.sessions.get(session_token).cloned())
    }
}

type PendingLookup = Shared<BoxFuture<'static, AuthResult<Option<String>>>>;

/// Caching, deduplicating front for an [`IdentityResolver`]
pub struct IdentityCache {
    resolver: Arc<dyn IdentityResolver>,
    cache: Mutex<LruCache<String, String>>,
    in_flight: DashMap<String, PendingLookup>,
    timeout: Duration,
}

impl IdentityCache {
    pub fn new(resolver: Arc<dyn IdentityResolver>, capacity: usize, timeout: Duration) -> Self {
        Self {
            resolver,
            cache: Mutex::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
            timeout,
        }
    }

    /// Synchronous cache lookup. Refreshes recency on a hit.
    pub fn cached(&self, session_token: &str) -> Option<String> {
        let mut cache = self.cache.lock().ok()?;
        cache.get(&session_token.to_string()).cloned()
    }

    /// Resolves `session_token`, failing closed.
    ///
    /// Returns `None` when the token is unknown, the lookup failed, or it
    /// timed out.
    pub async fn resolve(&self, session_token: &str) -> Option<String> {
        if let Some(identity) = self.cached(session_token) {
            return Some(identity);
        }

        let pending = self
            .in_flight
            .entry(session_token.to_string())
            .or_insert_with(|| self.lookup(session_token.to_string()))
            .clone();

        let outcome = pending.clone().await;
        self.in_flight
            .remove_if(session_token, |_, current| current.ptr_eq(&pending));

        match outcome {
            Ok(Some(identity)) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(session_token.to_string(), identity.clone());
                }
                Some(identity)
            }
            Ok(None) => {
                debug!("Session token not found");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cannot resolve session token");
                None
            }
        }
    }

    /// Number of cached identities
    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, session_token: String) -> PendingLookup {
        let resolver = Arc::clone(&self.resolver);
        let timeout = self.timeout;
        async move {
            match tokio::time::timeout(timeout, resolver.resolve(&session_token)).await {
                Ok(result) => result,
                Err(_) => Err(AuthError::Timeout),
            }
        }
        .boxed()
        .shared()
    }
}
