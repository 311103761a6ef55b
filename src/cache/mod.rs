//! Two-tier translation cache.
//!
//! The remote store is authoritative and shared between instances; the local
//! store only takes writes the remote tier refused. Neither tier ever fails a
//! caller: errors are logged and treated as misses.

pub mod local;
pub mod pattern;
pub mod remote;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::detect::Detection;
use crate::metrics::{MetricsSink, NoopMetrics};
pub use local::LocalStore;
pub use pattern::KeyPattern;
pub use remote::{RedisStore, RemoteStore};

/// Namespace for language detection results
pub const DETECTION_NAMESPACE: &str = "langdetect";

const DIGEST_HEX_LEN: usize = 32;

/// `{namespace}:{digest}` for a translation request
pub fn fingerprint(text: &str, source_lang: &str, target_lang: &str, provider: &str, namespace: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [text, source_lang, target_lang, provider, namespace] {
        hasher.update(part.as_bytes());
        // Unit separator keeps ("ab","c") and ("a","bc") apart
        hasher.update([0x1f]);
    }
    format!("{}:{}", namespace, short_hex(hasher))
}

/// Detection entries depend on the text alone
pub fn detection_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{}:{}", DETECTION_NAMESPACE, short_hex(hasher))
}

fn short_hex(hasher: Sha256) -> String {
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(DIGEST_HEX_LEN);
    hex
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub remote_hits: u64,
    pub remote_misses: u64,
    pub local_hits: u64,
    pub local_misses: u64,
    pub local_entries: usize,
}

#[derive(Default)]
struct Counters {
    remote_hits: AtomicU64,
    remote_misses: AtomicU64,
    local_hits: AtomicU64,
    local_misses: AtomicU64,
}

pub struct TranslationCache {
    enabled: bool,
    namespace: String,
    ttl_secs: u64,
    detection_ttl_secs: u64,
    remote: Option<Arc<dyn RemoteStore>>,
    local: LocalStore,
    counters: Counters,
    metrics: Arc<dyn MetricsSink>,
}

impl TranslationCache {
    pub fn new(config: &CacheConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            enabled: config.enabled,
            namespace: config.namespace.clone(),
            ttl_secs: config.ttl_secs,
            detection_ttl_secs: config.detection_ttl_secs,
            remote,
            local: LocalStore::new(config.local_max_entries, config.eviction_batch),
            counters: Counters::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn key_for(&self, text: &str, source_lang: &str, target_lang: &str, provider: &str) -> String {
        fingerprint(text, source_lang, target_lang, provider, &self.namespace)
    }

    /// Remote first, then local; `None` when disabled or both tiers miss
    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        if let Some(remote) = self.remote.as_ref().filter(|r| r.is_available()) {
            match remote.get(key).await {
                Ok(Some(value)) => {
                    self.hit("remote", &self.counters.remote_hits);
                    return Some(value);
                }
                Ok(None) => self.miss("remote", &self.counters.remote_misses),
                Err(e) => {
                    warn!("Remote cache read failed for {}: {}", key, e);
                    self.miss("remote", &self.counters.remote_misses);
                }
            }
        }

        match self.local.get(key) {
            Some(value) => {
                self.hit("local", &self.counters.local_hits);
                Some(value)
            }
            None => {
                self.miss("local", &self.counters.local_misses);
                None
            }
        }
    }

    /// Store with the translation ttl
    pub async fn set(&self, key: &str, value: &str) {
        self.set_with_ttl(key, value, self.ttl_secs).await;
    }

    /// Remote when it accepts the write, local otherwise; never both
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) {
        if !self.enabled || ttl_secs == 0 {
            return;
        }

        if let Some(remote) = self.remote.as_ref().filter(|r| r.is_available()) {
            match remote.set_with_ttl(key, value, ttl_secs).await {
                Ok(()) => return,
                Err(e) => warn!("Remote cache write failed for {}, keeping it locally: {}", key, e),
            }
        }

        self.local.set(key, value, Duration::from_secs(ttl_secs));
    }

    pub async fn get_detection(&self, text: &str) -> Option<Detection> {
        let raw = self.get(&detection_key(text)).await?;
        match serde_json::from_str(&raw) {
            Ok(detection) => Some(detection),
            Err(e) => {
                debug!("Discarding unreadable detection cache entry: {}", e);
                None
            }
        }
    }

    pub async fn set_detection(&self, text: &str, detection: &Detection) {
        match serde_json::to_string(detection) {
            Ok(raw) => {
                self.set_with_ttl(&detection_key(text), &raw, self.detection_ttl_secs)
                    .await
            }
            Err(e) => warn!("Failed to serialize detection for cache: {}", e),
        }
    }

    /// Remove keys matching `pattern` (Redis glob, e.g. `translation:*`) from both tiers
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let matcher = match KeyPattern::new(pattern) {
            Ok(matcher) => matcher,
            Err(e) => {
                warn!("Skipping cache invalidation: {}", e);
                return 0;
            }
        };
        let mut removed = 0;

        if let Some(remote) = self.remote.as_ref().filter(|r| r.is_available()) {
            let result = match remote.list_keys(pattern).await {
                Ok(keys) => remote.delete(&keys).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(count) => removed += count,
                Err(e) => warn!("Remote cache invalidation of '{}' failed: {}", pattern, e),
            }
        }

        removed += self.local.remove_matching(&matcher);

        debug!("Invalidated {} cache entries matching '{}'", removed, pattern);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            remote_misses: self.counters.remote_misses.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            local_misses: self.counters.local_misses.load(Ordering::Relaxed),
            local_entries: self.local.len(),
        }
    }

    fn hit(&self, tier: &str, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.metrics.cache_request(tier, true);
    }

    fn miss(&self, tier: &str, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.metrics.cache_request(tier, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use super::remote::{MockRemoteStore, memory::MemoryStore};

    fn config() -> CacheConfig {
        CacheConfig {
            local_max_entries: 100,
            eviction_batch: 10,
            ..CacheConfig::default()
        }
    }

    fn failing_remote() -> Arc<dyn RemoteStore> {
        let mut remote = MockRemoteStore::new();
        remote.expect_is_available().return_const(true);
        remote
            .expect_get()
            .returning(|_| Err(GatewayError::Cache("connection refused".to_string())));
        remote
            .expect_set_with_ttl()
            .returning(|_, _, _| Err(GatewayError::Cache("connection refused".to_string())));
        remote
            .expect_list_keys()
            .returning(|_| Err(GatewayError::Cache("connection refused".to_string())));
        Arc::new(remote)
    }

    #[test]
    fn fingerprint_is_deterministic_and_namespaced() {
        let a = fingerprint("Hola mundo", "es", "en", "google", "translation");
        let b = fingerprint("Hola mundo", "es", "en", "google", "translation");
        assert_eq!(a, b);
        assert!(a.starts_with("translation:"));
        assert_eq!(a.len(), "translation:".len() + DIGEST_HEX_LEN);

        assert_ne!(a, fingerprint("Hola mundo", "es", "en", "deepl", "translation"));
        assert_ne!(a, fingerprint("Hola mundo", "es", "fr", "google", "translation"));
        assert_ne!(
            fingerprint("ab", "c", "en", "google", "translation"),
            fingerprint("a", "bc", "en", "google", "translation")
        );
    }

    #[test]
    fn detection_keys_use_their_own_namespace() {
        assert!(detection_key("Hola mundo").starts_with("langdetect:"));
        assert_eq!(detection_key("x"), detection_key("x"));
    }

    #[tokio::test]
    async fn round_trip_through_remote() {
        let remote = Arc::new(MemoryStore::default());
        let cache = TranslationCache::new(&config(), Some(remote.clone()));

        cache.set("translation:k", "Hello").await;
        assert_eq!(cache.get("translation:k").await.as_deref(), Some("Hello"));
        assert_eq!(remote.len(), 1);
        // never written to both tiers
        assert_eq!(cache.stats().local_entries, 0);
        assert_eq!(cache.stats().remote_hits, 1);
    }

    #[tokio::test]
    async fn round_trip_local_only() {
        let cache = TranslationCache::new(&config(), None);
        cache.set("translation:k", "Hello").await;
        assert_eq!(cache.get("translation:k").await.as_deref(), Some("Hello"));
        assert_eq!(cache.stats().local_hits, 1);
    }

    #[tokio::test]
    async fn remote_errors_degrade_to_local() {
        let cache = TranslationCache::new(&config(), Some(failing_remote()));
        cache.set("translation:k", "Hello").await;
        assert_eq!(cache.get("translation:k").await.as_deref(), Some("Hello"));
        assert_eq!(cache.stats().local_entries, 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_never_returned() {
        let remote = Arc::new(MemoryStore::default());
        let cache = TranslationCache::new(&config(), Some(remote.clone()));
        cache.set_with_ttl("translation:k", "Hello", 0).await;
        assert!(cache.get("translation:k").await.is_none());
        assert_eq!(remote.len(), 0);
    }

    #[tokio::test]
    async fn disabled_cache_is_pass_through() {
        let cache = TranslationCache::new(&CacheConfig { enabled: false, ..config() }, None);
        cache.set("translation:k", "Hello").await;
        assert!(cache.get("translation:k").await.is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn detection_round_trip() {
        let cache = TranslationCache::new(&config(), None);
        let detection = Detection::new("es", 0.95);
        cache.set_detection("Hola mundo, ¿qué tal?", &detection).await;
        assert_eq!(cache.get_detection("Hola mundo, ¿qué tal?").await, Some(detection));
        assert!(cache.get_detection("something else").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_counts_both_tiers() {
        let remote = Arc::new(MemoryStore::default());
        let cache = TranslationCache::new(&config(), Some(remote.clone()));
        cache.set("translation:a", "1").await;
        cache.set("translation:b", "2").await;
        cache.set_detection("Hola mundo", &Detection::new("es", 0.9)).await;

        remote.down.store(true, std::sync::atomic::Ordering::SeqCst);
        cache.set("translation:c", "3").await;
        remote.down.store(false, std::sync::atomic::Ordering::SeqCst);

        assert_eq!(cache.invalidate("translation:*").await, 3);
        assert!(cache.get("translation:a").await.is_none());
        assert!(cache.get_detection("Hola mundo").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_uses_glob_rules_in_the_local_tier() {
        let cache = TranslationCache::new(&config(), None);
        cache.set("translation:aaaa", "1").await;
        cache.set("translation:bbbb", "2").await;
        cache.set_detection("Hola mundo", &Detection::new("es", 0.9)).await;

        assert_eq!(cache.invalidate("*:zzzz").await, 0);
        assert_eq!(cache.stats().local_entries, 3);

        assert_eq!(cache.invalidate("*:aaaa").await, 1);
        assert_eq!(cache.invalidate("translation:b???").await, 1);
        assert!(cache.get_detection("Hola mundo").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_survives_remote_errors() {
        let cache = TranslationCache::new(&config(), Some(failing_remote()));
        cache.set("translation:a", "1").await;
        assert_eq!(cache.invalidate("translation:*").await, 1);
    }
}
