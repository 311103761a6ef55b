use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::Result;

/// Shared key-value tier of the cache
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// False while the store is known to be unreachable
    fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Keys matching a glob pattern such as `translation:*`
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Number of keys actually removed
    async fn delete(&self, keys: &[String]) -> Result<usize>;
}

/// Redis-backed store.
///
/// After any command error the store reports itself unavailable for
/// `retry_after`, so a dead server costs one failed round trip per interval
/// instead of one per request.
pub struct RedisStore {
    connection: ConnectionManager,
    unavailable_until: Mutex<Option<Instant>>,
    retry_after: Duration,
}

impl RedisStore {
    pub async fn connect(url: &str, retry_after: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected to Redis cache");

        Ok(Self {
            connection,
            unavailable_until: Mutex::new(None),
            retry_after,
        })
    }

    /// Connection handle shared with other Redis users such as the rate limiter
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    fn observe<T>(&self, result: redis::RedisResult<T>) -> Result<T> {
        match result {
            Ok(value) => {
                *self.unavailable_until.lock() = None;
                Ok(value)
            }
            Err(e) => {
                warn!("Redis command failed, skipping remote cache for {:?}: {}", self.retry_after, e);
                *self.unavailable_until.lock() = Some(Instant::now() + self.retry_after);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn is_available(&self) -> bool {
        self.unavailable_until
            .lock()
            .is_none_or(|until| Instant::now() >= until)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let result = conn.get::<_, Option<String>>(key).await;
        self.observe(result)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection.clone();
        let result = conn.set_ex::<_, _, ()>(key, value, ttl_secs).await;
        self.observe(result)
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut keys = Vec::new();
        // SCAN rather than KEYS so large keyspaces do not block the server
        let result = async {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok::<_, redis::RedisError>(())
        }
        .await;
        self.observe(result)?;
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let result = conn.del::<_, usize>(keys).await;
        self.observe(result)
    }
}

/// In-memory store with real TTL handling, for tests that need remote round trips
#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MemoryStore {
        entries: Mutex<HashMap<String, (String, Instant)>>,
        pub down: std::sync::atomic::AtomicBool,
    }

    impl MemoryStore {
        pub fn len(&self) -> usize {
            self.entries.lock().len()
        }

        fn check(&self) -> Result<()> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::error::GatewayError::Cache("store is down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryStore {
        fn is_available(&self) -> bool {
            true
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.check()?;
            Ok(self
                .entries
                .lock()
                .get(key)
                .filter(|(_, expires)| *expires > Instant::now())
                .map(|(value, _)| value.clone()))
        }

        async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
            self.check()?;
            let expires = Instant::now() + Duration::from_secs(ttl_secs);
            self.entries.lock().insert(key.to_string(), (value.to_string(), expires));
            Ok(())
        }

        async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
            self.check()?;
            let pattern = crate::cache::KeyPattern::new(pattern)?;
            Ok(self
                .entries
                .lock()
                .keys()
                .filter(|key| pattern.matches(key))
                .cloned()
                .collect())
        }

        async fn delete(&self, keys: &[String]) -> Result<usize> {
            self.check()?;
            let mut entries = self.entries.lock();
            Ok(keys.iter().filter(|key| entries.remove(*key).is_some()).count())
        }
    }
}
