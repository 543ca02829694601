use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{CacheError, Fingerprint, ResultCache};
use crate::results::ResultSet;

/// In-process cache. Expired entries read as misses and are swept on
/// the next store.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Fingerprint, Entry>>,
}

struct Entry {
    results: ResultSet,
    inserted: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.inserted + self.ttl
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn lookup(&self, key: &Fingerprint) -> Result<Option<ResultSet>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.results.clone()))
    }

    async fn store(&self, key: &Fingerprint, results: &ResultSet, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.clone(),
            Entry {
                results: results.clone(),
                inserted: now,
                ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeEndpoint;
    use crate::results::sample;

    fn key(n: &str) -> Fingerprint {
        Fingerprint::of_request(
            ProbeEndpoint::List,
            "GET",
            "/probe/metrics/list",
            &[("subscription".to_string(), n.to_string())],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_until_ttl_elapses() {
        let cache = MemoryCache::new();
        let results = ResultSet::from(vec![sample("r1", "cpu", 1.0), sample("r2", "cpu", 2.0)]);

        cache.store(&key("a"), &results, Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = cache.lookup(&key("a")).await.unwrap();
        assert_eq!(hit, Some(results));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.lookup(&key("a")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_has_no_side_effects_and_store_sweeps() {
        let cache = MemoryCache::new();
        let results = ResultSet::from(vec![sample("r1", "cpu", 1.0)]);

        cache.store(&key("old"), &results, Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(cache.lookup(&key("old")).await.unwrap().is_none());
        assert_eq!(cache.len(), 1);

        cache.store(&key("new"), &results, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&key("new")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unrelated_keys_do_not_interfere() {
        let cache = MemoryCache::new();
        cache
            .store(&key("a"), &ResultSet::from(vec![sample("r1", "cpu", 1.0)]), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.lookup(&key("b")).await.unwrap().is_none());
    }
}
