pub mod memory;
pub mod redis_store;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::probe::deadline::CollectionDeadline;
use crate::probe::ProbeEndpoint;
use crate::results::ResultSet;

pub use self::memory::MemoryCache;
pub use self::redis_store::RedisCache;

// ─── Key ─────────────────────────────────────────────────────────

/// Digest of everything observable about a scrape request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash method, path and decoded query pairs. Pair order is kept;
    /// two requests share a key only if their inputs are identical.
    pub fn of_request(
        endpoint: ProbeEndpoint,
        method: &str,
        path: &str,
        params: &[(String, String)],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.to_ascii_uppercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        for (k, v) in params {
            // Length-prefixed; "a=b&c=d" must not collide with a=b, c=d.
            hasher.update(format!("{}:{}={}:{};", k.len(), k, v.len(), v).as_bytes());
        }
        let tag = match endpoint {
            ProbeEndpoint::List => "list",
            ProbeEndpoint::Resource => "resource",
        };
        Self(format!("probe:{tag}:{}", hex::encode(hasher.finalize())))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Backend seam ────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),

    #[error("cached entry could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Storage for aggregated scrape results keyed by request fingerprint.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// `Ok(None)` on a miss or an expired entry. Never blocks on a
    /// concurrent `store` for the same key.
    async fn lookup(&self, key: &Fingerprint) -> Result<Option<ResultSet>, CacheError>;

    async fn store(&self, key: &Fingerprint, results: &ResultSet, ttl: Duration) -> Result<(), CacheError>;
}

/// Backend that never stores anything.
pub struct NoCache;

#[async_trait]
impl ResultCache for NoCache {
    async fn lookup(&self, _key: &Fingerprint) -> Result<Option<ResultSet>, CacheError> {
        Ok(None)
    }

    async fn store(&self, _key: &Fingerprint, _results: &ResultSet, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
}

// ─── Request-facing wrapper ──────────────────────────────────────

/// Wraps a backend so that cache trouble never fails a scrape: lookup
/// errors become misses and store errors are logged and dropped.
#[derive(Clone)]
pub struct ProbeCache {
    backend: Arc<dyn ResultCache>,
}

impl ProbeCache {
    pub fn new(backend: Arc<dyn ResultCache>) -> Self {
        Self { backend }
    }

    /// Look up `key` when the request enabled caching. A lookup still
    /// pending when the scrape deadline expires counts as a miss.
    pub async fn fetch(
        &self,
        key: &Fingerprint,
        ttl: Option<Duration>,
        deadline: &CollectionDeadline,
    ) -> Option<ResultSet> {
        if ttl.is_none() {
            return None;
        }
        match tokio::time::timeout(deadline.remaining(), self.backend.lookup(key)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!(key = %key, "cache lookup outlived the scrape deadline, treating as miss");
                None
            }
        }
    }

    /// Store `results` under `key`; a no-op when `ttl` is `None`. A store
    /// still pending when the scrape deadline expires is abandoned.
    pub async fn save(
        &self,
        key: &Fingerprint,
        results: &ResultSet,
        ttl: Option<Duration>,
        deadline: &CollectionDeadline,
    ) {
        let Some(ttl) = ttl else {
            return;
        };
        match tokio::time::timeout(deadline.remaining(), self.backend.store(key, results, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "cache store failed, skipping"),
            Err(_) => tracing::warn!(key = %key, "cache store outlived the scrape deadline, skipping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::sample;

    fn pairs(p: &[(&str, &str)]) -> Vec<(String, String)> {
        p.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn fingerprint_is_deterministic_and_input_sensitive() {
        let a = pairs(&[("subscription", "s1"), ("cache", "1m")]);
        let k1 = Fingerprint::of_request(ProbeEndpoint::List, "GET", "/probe/metrics/list", &a);
        let k2 = Fingerprint::of_request(ProbeEndpoint::List, "get", "/probe/metrics/list", &a);
        assert_eq!(k1, k2);

        let b = pairs(&[("subscription", "s2"), ("cache", "1m")]);
        let k3 = Fingerprint::of_request(ProbeEndpoint::List, "GET", "/probe/metrics/list", &b);
        assert_ne!(k1, k3);

        let k4 = Fingerprint::of_request(ProbeEndpoint::Resource, "GET", "/probe/metrics/list", &a);
        assert_ne!(k1, k4);

        let glued = pairs(&[("a", "b&c=d")]);
        let split = pairs(&[("a", "b"), ("c", "d")]);
        assert_ne!(
            Fingerprint::of_request(ProbeEndpoint::List, "GET", "/", &glued),
            Fingerprint::of_request(ProbeEndpoint::List, "GET", "/", &split),
        );
    }

    struct Broken;

    #[async_trait]
    impl ResultCache for Broken {
        async fn lookup(&self, _key: &Fingerprint) -> Result<Option<ResultSet>, CacheError> {
            Err(CacheError::Backend("down".into()))
        }

        async fn store(&self, _key: &Fingerprint, _results: &ResultSet, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
    }

    /// Never answers.
    struct Stalled;

    #[async_trait]
    impl ResultCache for Stalled {
        async fn lookup(&self, _key: &Fingerprint) -> Result<Option<ResultSet>, CacheError> {
            std::future::pending().await
        }

        async fn store(&self, _key: &Fingerprint, _results: &ResultSet, _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }
    }

    fn budget() -> (CollectionDeadline, tokio_util::sync::DropGuard) {
        CollectionDeadline::start(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn backend_failures_degrade_to_miss() {
        let cache = ProbeCache::new(Arc::new(Broken));
        let key = Fingerprint::of_request(ProbeEndpoint::List, "GET", "/", &[]);
        let ttl = Some(Duration::from_secs(60));
        let (deadline, _guard) = budget();

        cache.save(&key, &ResultSet::from(vec![sample("r", "m", 1.0)]), ttl, &deadline).await;
        assert!(cache.fetch(&key, ttl, &deadline).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_backend_is_bounded_by_the_deadline() {
        let cache = ProbeCache::new(Arc::new(Stalled));
        let key = Fingerprint::of_request(ProbeEndpoint::List, "GET", "/", &[]);
        let ttl = Some(Duration::from_secs(60));
        let (deadline, _guard) = CollectionDeadline::start(Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        assert!(cache.fetch(&key, ttl, &deadline).await.is_none());
        cache.save(&key, &ResultSet::from(vec![sample("r", "m", 1.0)]), ttl, &deadline).await;

        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn disabled_ttl_skips_the_backend() {
        let backend = Arc::new(MemoryCache::new());
        let cache = ProbeCache::new(backend.clone());
        let key = Fingerprint::of_request(ProbeEndpoint::List, "GET", "/", &[]);
        let (deadline, _guard) = budget();

        cache.save(&key, &ResultSet::from(vec![sample("r", "m", 1.0)]), None, &deadline).await;
        assert!(backend.lookup(&key).await.unwrap().is_none());
        assert!(cache.fetch(&key, None, &deadline).await.is_none());
    }
}
