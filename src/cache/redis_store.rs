use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{CacheError, Fingerprint, ResultCache};
use crate::results::{MetricSample, ResultSet};

const KEY_PREFIX: &str = "azmon-bridge:";

/// Upper bound for establishing the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for a single GET or SET round trip.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Cache shared by every replica through Redis. Entries are stored as
/// JSON with a millisecond expiry so Redis does the eviction.
///
/// `ConnectionManager` is cheaply cloneable and reconnects on its own;
/// every call works on a clone.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Open `url` and establish the managed connection.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Backend(format!("invalid Redis URL \"{url}\": {e}")))?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Backend(format!("timed out connecting to Redis after {CONNECT_TIMEOUT:?}")))?
            .map_err(|e| CacheError::Backend(format!("cannot connect to Redis: {e}")))?;
        Ok(Self { conn })
    }

    fn key(fingerprint: &Fingerprint) -> String {
        format!("{KEY_PREFIX}{fingerprint}")
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn lookup(&self, key: &Fingerprint) -> Result<Option<ResultSet>, CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("GET");
        cmd.arg(Self::key(key));
        let raw: Option<String> = bounded(cmd.query_async(&mut conn)).await?;

        match raw {
            None => Ok(None),
            Some(json) => {
                let samples: Vec<MetricSample> = serde_json::from_str(&json)?;
                Ok(Some(ResultSet::from(samples)))
            }
        }
    }

    async fn store(&self, key: &Fingerprint, results: &ResultSet, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(results.samples())?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(Self::key(key)).arg(json).arg("PX").arg(ttl_ms);
        let _: () = bounded(cmd.query_async(&mut conn)).await?;
        Ok(())
    }
}

/// Run one command with `COMMAND_TIMEOUT`; the manager itself never gives up.
async fn bounded<T>(
    fut: impl std::future::Future<Output = redis::RedisResult<T>>,
) -> Result<T, CacheError> {
    tokio::time::timeout(COMMAND_TIMEOUT, fut)
        .await
        .map_err(|_| CacheError::Backend(format!("Redis command timed out after {COMMAND_TIMEOUT:?}")))?
        .map_err(|e| CacheError::Backend(e.to_string()))
}
