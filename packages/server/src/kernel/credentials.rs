//! Request-scoped registry for credentials supplied inline.
//!
//! A request may carry its secret in the body instead of a ciphertext
//! reference. The workflow state only ever stores an opaque
//! `credentials_ref`, so inline secrets are parked here under that ref;
//! a healed worker redeems the same ref through the ordinary resolver
//! seam and the state alone still suffices to resume. Entries live for
//! as long as their request can heal and are evicted on any terminal
//! outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use harvester::{CredentialResolver, Credentials};

#[derive(Default)]
pub struct InlineCredentialCache {
    entries: Mutex<HashMap<String, Credentials>>,
}

impl InlineCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, credentials_ref: &str, credentials: Credentials) {
        self.entries
            .lock()
            .unwrap()
            .insert(credentials_ref.to_string(), credentials);
    }

    /// Drop an entry once its request can no longer heal.
    pub fn evict(&self, credentials_ref: &str) {
        self.entries.lock().unwrap().remove(credentials_ref);
    }

    fn get(&self, credentials_ref: &str) -> Option<Credentials> {
        self.entries.lock().unwrap().get(credentials_ref).cloned()
    }
}

/// Resolver that consults the inline cache before the configured
/// backend. Ciphertext references miss the cache and fall through
/// unchanged.
pub struct CachingCredentialResolver {
    cache: Arc<InlineCredentialCache>,
    fallback: Arc<dyn CredentialResolver>,
}

impl CachingCredentialResolver {
    pub fn new(cache: Arc<InlineCredentialCache>, fallback: Arc<dyn CredentialResolver>) -> Self {
        Self { cache, fallback }
    }
}

#[async_trait]
impl CredentialResolver for CachingCredentialResolver {
    async fn resolve(&self, ciphertext_ref: &str) -> Result<Credentials> {
        if let Some(credentials) = self.cache.get(ciphertext_ref) {
            return Ok(credentials);
        }
        self.fallback.resolve(ciphertext_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::StaticCredentialResolver;

    fn resolver_with_cache() -> (Arc<InlineCredentialCache>, CachingCredentialResolver) {
        let cache = Arc::new(InlineCredentialCache::new());
        let resolver =
            CachingCredentialResolver::new(cache.clone(), Arc::new(StaticCredentialResolver));
        (cache, resolver)
    }

    #[tokio::test]
    async fn registered_credentials_resolve_by_ref() {
        let (cache, resolver) = resolver_with_cache();
        cache.register(
            "inline:req-1",
            Credentials {
                identity: "acct-1".to_string(),
                secret: "hunter2".to_string(),
            },
        );

        let credentials = resolver.resolve("inline:req-1").await.unwrap();
        assert_eq!(credentials.identity, "acct-1");
        assert_eq!(credentials.secret, "hunter2");
    }

    #[tokio::test]
    async fn misses_fall_through_to_the_backend() {
        let (_cache, resolver) = resolver_with_cache();
        let credentials = resolver.resolve("vault/acct-2").await.unwrap();
        assert_eq!(credentials.identity, "dev:vault/acct-2");
    }

    #[tokio::test]
    async fn evicted_entries_no_longer_resolve_from_the_cache() {
        let (cache, resolver) = resolver_with_cache();
        cache.register(
            "inline:req-1",
            Credentials {
                identity: "acct-1".to_string(),
                secret: "hunter2".to_string(),
            },
        );
        cache.evict("inline:req-1");

        let credentials = resolver.resolve("inline:req-1").await.unwrap();
        assert_ne!(credentials.secret, "hunter2");
    }
}
