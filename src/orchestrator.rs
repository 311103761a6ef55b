//! Entry point for calling code.
//!
//! An `Orchestrator` owns every registry the gateway needs (providers,
//! breakers, cache, rate limiter) so several instances can coexist in one
//! process, each with isolated state.

use redis::aio::ConnectionManager;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::breaker::{BreakerRegistry, BreakerSnapshot};
use crate::cache::{CacheStats, RedisStore, RemoteStore, TranslationCache};
use crate::config::Config;
use crate::detect::{Detection, LanguageDetector, WhatlangDetector};
use crate::error::{GatewayError, Result};
use crate::metrics::{MetricsSink, RecorderMetrics};
use crate::models::{BatchMode, BatchNormalizeResponse, BatchRequest, NormalizeRequest, NormalizeResponse, TenantContext};
use crate::pipeline::{Pipeline, new_request_id};
use crate::rate_limit::{RateDecision, RateLimiter, derive_key};
use crate::translate::{ProviderKind, ProviderRegistry};
use crate::usage::{JsonlUsageSink, LogUsageSink, UsageSink};

pub struct Orchestrator {
    pipeline: Pipeline,
    breakers: Arc<BreakerRegistry>,
    cache: Arc<TranslationCache>,
    rate_limiter: RateLimiter,
}

/// Assembles an `Orchestrator`; every collaborator not supplied is built from config
pub struct OrchestratorBuilder {
    config: Config,
    providers: Option<ProviderRegistry>,
    detector: Option<Arc<dyn LanguageDetector>>,
    remote: Option<Arc<dyn RemoteStore>>,
    redis: Option<ConnectionManager>,
    usage: Option<Arc<dyn UsageSink>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            providers: None,
            detector: None,
            remote: None,
            redis: None,
            usage: None,
            metrics: None,
        }
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn remote_store(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Redis connection for the shared rate-limit window
    pub fn redis(mut self, connection: ConnectionManager) -> Self {
        self.redis = Some(connection);
        self
    }

    pub fn usage_sink(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let providers = match self.providers {
            Some(providers) => providers,
            None => ProviderRegistry::from_config(&config)?,
        };
        let detector = self
            .detector
            .unwrap_or_else(|| Arc::new(WhatlangDetector::new()));
        let usage: Arc<dyn UsageSink> = match (self.usage, config.usage.jsonl_path.as_deref()) {
            (Some(usage), _) => usage,
            (None, Some(path)) => Arc::new(JsonlUsageSink::new(path)),
            (None, None) => Arc::new(LogUsageSink),
        };
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(RecorderMetrics));

        let cache = Arc::new(TranslationCache::new(&config.cache, self.remote).with_metrics(metrics.clone()));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone(), metrics.clone()));
        // Known providers get a breaker up front so snapshots and resets see them before first use
        for name in providers.available().keys() {
            breakers.get_or_create(name);
        }
        let rate_limiter = RateLimiter::new(&config.rate_limit, self.redis);

        info!(
            "Orchestrator ready: default provider '{}', cache {}, remote tier {}",
            providers.default_kind(),
            if cache.is_enabled() { "enabled" } else { "disabled" },
            if cache.has_remote() { "connected" } else { "absent" }
        );

        let pipeline = Pipeline::new(
            &config,
            providers,
            detector,
            cache.clone(),
            breakers.clone(),
            usage,
            metrics,
        );

        Ok(Orchestrator {
            pipeline,
            breakers,
            cache,
            rate_limiter,
        })
    }
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Build from configuration, connecting to Redis when one is configured.
    ///
    /// An unreachable Redis is logged and the gateway runs local-only.
    pub async fn from_config(config: Config) -> Result<Self> {
        let mut builder = Self::builder(config.clone());

        if let Some(url) = config.cache.redis_url.as_deref().filter(|_| config.cache.enabled) {
            match RedisStore::connect(url, Duration::from_secs(config.cache.remote_retry_secs)).await {
                Ok(store) => {
                    builder = builder.redis(store.connection()).remote_store(Arc::new(store));
                }
                Err(e) => warn!("Redis unavailable, continuing with the local cache only: {}", e),
            }
        }

        builder.build()
    }

    pub async fn normalize_one(&self, request: &NormalizeRequest, tenant: &TenantContext) -> Result<NormalizeResponse> {
        self.pipeline.normalize(request, tenant, &new_request_id()).await
    }

    pub async fn normalize_batch(
        &self,
        request: &BatchRequest,
        tenant: &TenantContext,
        mode: BatchMode,
        concurrency: Option<usize>,
    ) -> Result<BatchNormalizeResponse> {
        self.pipeline
            .normalize_batch(request, tenant, mode, concurrency)
            .await
    }

    /// Source-language detection as the pipeline performs it
    pub async fn detect_language(&self, text: &str) -> Detection {
        self.pipeline.detect_language(text).await
    }

    pub fn detector_name(&self) -> String {
        self.pipeline.detector().name()
    }

    pub fn available_providers(&self) -> BTreeMap<String, bool> {
        self.pipeline.providers().available()
    }

    pub async fn supported_languages(&self, kind: ProviderKind) -> Result<Vec<String>> {
        let provider = self
            .pipeline
            .providers()
            .get(kind)
            .ok_or_else(|| GatewayError::Translation(format!("{} provider is not registered", kind)))?;
        Ok(provider.supported_languages().await)
    }

    /// One snapshot for `name`, or all of them; empty for an unknown name
    pub fn breaker_snapshot(&self, name: Option<&str>) -> Vec<BreakerSnapshot> {
        match name {
            Some(name) => self
                .breakers
                .get(name)
                .map(|breaker| vec![breaker.snapshot()])
                .unwrap_or_default(),
            None => self.breakers.snapshots(),
        }
    }

    /// `false` when `name` is not a known provider
    pub fn reset_breaker(&self, name: &str) -> bool {
        self.breakers.reset(name)
    }

    pub async fn invalidate_cache(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Admission check for one incoming request
    pub async fn check_rate_limit(&self, tenant_id: Option<&str>, client_ip: Option<&str>) -> RateDecision {
        self.rate_limiter.check(&derive_key(tenant_id, client_ip)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::config::RateLimitConfig;
    use crate::detect::MockLanguageDetector;
    use crate::metrics::NoopMetrics;
    use crate::models::RecordType;
    use crate::translate::{MockTranslationProvider, TranslationResult};

    fn mock_provider(kind: ProviderKind, available: bool) -> MockTranslationProvider {
        let mut provider = MockTranslationProvider::new();
        provider.expect_kind().return_const(kind);
        provider.expect_is_available().return_const(available);
        provider
    }

    fn orchestrator(google: MockTranslationProvider) -> Orchestrator {
        let mut providers = ProviderRegistry::new(ProviderKind::Google);
        providers.register(Arc::new(google));
        providers.register(Arc::new(mock_provider(ProviderKind::DeepL, false)));

        let mut detector = MockLanguageDetector::new();
        detector.expect_name().return_const("mock".to_string());
        detector.expect_is_available().return_const(true);
        detector
            .expect_detect()
            .returning(|_| Ok(Detection::new("es", 0.95)));

        let config = Config {
            rate_limit: RateLimitConfig {
                max_requests: 2,
                ..RateLimitConfig::default()
            },
            ..Config::default()
        };
        Orchestrator::builder(config)
            .providers(providers)
            .detector(Arc::new(detector))
            .usage_sink(Arc::new(LogUsageSink))
            .metrics(Arc::new(NoopMetrics))
            .build()
            .unwrap()
    }

    fn request() -> NormalizeRequest {
        NormalizeRequest {
            tenant_id: "t1".to_string(),
            record_id: "r1".to_string(),
            record_type: RecordType::MeetingTitle,
            text: "Hola mundo".to_string(),
            source_lang: None,
            target_lang: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn normalize_one_assigns_a_request_id() {
        let mut google = mock_provider(ProviderKind::Google, true);
        google
            .expect_translate()
            .returning(|_, _, _| Ok(TranslationResult::new("Hello world")));

        let orchestrator = orchestrator(google);
        let response = orchestrator
            .normalize_one(&request(), &TenantContext::new("t1"))
            .await
            .unwrap();
        assert_eq!(response.text_normalized, "Hello world");
        assert!(!response.meta.request_id.is_empty());
    }

    #[test]
    fn lists_provider_availability() {
        let orchestrator = orchestrator(mock_provider(ProviderKind::Google, true));
        let available = orchestrator.available_providers();
        assert_eq!(available.get("google"), Some(&true));
        assert_eq!(available.get("deepl"), Some(&false));
    }

    #[test]
    fn breakers_exist_for_every_registered_provider() {
        let orchestrator = orchestrator(mock_provider(ProviderKind::Google, true));
        let names: Vec<String> = orchestrator
            .breaker_snapshot(None)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["deepl", "google"]);

        let one = orchestrator.breaker_snapshot(Some("google"));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].state, BreakerState::Closed);
        assert!(orchestrator.breaker_snapshot(Some("bing")).is_empty());
    }

    #[test]
    fn reset_reports_unknown_names() {
        let orchestrator = orchestrator(mock_provider(ProviderKind::Google, true));
        assert!(orchestrator.reset_breaker("deepl"));
        assert!(!orchestrator.reset_breaker("bing"));
    }

    #[tokio::test]
    async fn invalidation_forces_a_fresh_translation() {
        let mut google = mock_provider(ProviderKind::Google, true);
        google
            .expect_translate()
            .times(2)
            .returning(|_, _, _| Ok(TranslationResult::new("Hello world")));

        let orchestrator = orchestrator(google);
        let tenant = TenantContext::new("t1");
        orchestrator.normalize_one(&request(), &tenant).await.unwrap();
        assert!(orchestrator.normalize_one(&request(), &tenant).await.unwrap().meta.cached);

        // the detection entry lives under its own namespace
        assert_eq!(orchestrator.invalidate_cache("translation:*").await, 1);
        let fresh = orchestrator.normalize_one(&request(), &tenant).await.unwrap();
        assert!(!fresh.meta.cached);
    }

    #[tokio::test]
    async fn rate_limit_is_per_tenant() {
        let orchestrator = orchestrator(mock_provider(ProviderKind::Google, true));
        assert!(orchestrator.check_rate_limit(Some("t1"), None).await.allowed);
        assert!(orchestrator.check_rate_limit(Some("t1"), None).await.allowed);
        assert!(!orchestrator.check_rate_limit(Some("t1"), None).await.allowed);
        assert!(orchestrator.check_rate_limit(Some("t2"), None).await.allowed);
    }

    #[tokio::test]
    async fn unregistered_provider_languages_are_an_error() {
        let mut providers = ProviderRegistry::new(ProviderKind::Google);
        providers.register(Arc::new(mock_provider(ProviderKind::Google, true)));
        let orchestrator = Orchestrator::builder(Config::default())
            .providers(providers)
            .metrics(Arc::new(NoopMetrics))
            .build()
            .unwrap();
        assert!(orchestrator.supported_languages(ProviderKind::DeepL).await.is_err());
    }
}
