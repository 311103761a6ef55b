//! Per-request normalization.
//!
//! Stages run strictly in order:
//! 1. resolve the source language (supplied or detected)
//! 2. skip when source equals target or is undetermined
//! 3. wrap glossary terms
//! 4. translate through cache, breaker and provider
//! 5. strip glossary markers
//! 6. record usage (best-effort)
//! 7. assemble the response

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::cache::TranslationCache;
use crate::config::{Config, DetectionConfig, PricingConfig};
use crate::detect::{Detection, LanguageDetector};
use crate::error::{GatewayError, Result};
use crate::glossary::{Glossary, remove_glossary_markers};
use crate::metrics::{MetricsSink, TranslationOutcome};
use crate::models::{
    BatchMode, BatchNormalizeResponse, BatchRequest, NO_PROVIDER, NormalizeMeta, NormalizeRequest,
    NormalizeResponse, TenantContext, UNDETERMINED, UsageRecord, estimate_cost, round_cost,
};
use crate::translate::{ProviderRegistry, is_auto_source};
use crate::usage::{UsageSink, record_best_effort};

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Whether translation can be skipped for this language pair
pub fn should_skip(source_lang: &str, target_lang: &str) -> bool {
    source_lang.eq_ignore_ascii_case(UNDETERMINED) || source_lang.eq_ignore_ascii_case(target_lang)
}

/// Outcome of stage 1
struct ResolvedLanguage {
    lang: String,
    /// Set only when detection ran
    confidence: Option<f64>,
}

pub struct Pipeline {
    providers: ProviderRegistry,
    detector: Arc<dyn LanguageDetector>,
    cache: Arc<TranslationCache>,
    breakers: Arc<BreakerRegistry>,
    usage: Arc<dyn UsageSink>,
    metrics: Arc<dyn MetricsSink>,
    detection: DetectionConfig,
    pricing: PricingConfig,
    batch_concurrency: usize,
    max_batch_size: usize,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        providers: ProviderRegistry,
        detector: Arc<dyn LanguageDetector>,
        cache: Arc<TranslationCache>,
        breakers: Arc<BreakerRegistry>,
        usage: Arc<dyn UsageSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            providers,
            detector,
            cache,
            breakers,
            usage,
            metrics,
            detection: config.detection.clone(),
            pricing: config.pricing.clone(),
            batch_concurrency: config.pipeline.batch_concurrency.max(1),
            max_batch_size: config.pipeline.max_batch_size,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn detector(&self) -> &dyn LanguageDetector {
        self.detector.as_ref()
    }

    /// Normalize one record under `request_id`
    pub async fn normalize(
        &self,
        request: &NormalizeRequest,
        tenant: &TenantContext,
        request_id: &str,
    ) -> Result<NormalizeResponse> {
        request.validate()?;
        let started = Instant::now();
        let target_lang = request.target_lang.trim();
        let char_count = request.text.chars().count();

        let mut resolved = self.resolve_language(request).await;

        if should_skip(&resolved.lang, target_lang) {
            debug!(
                tenant_id = %tenant.id,
                request_id,
                "Skipping translation ({} -> {})", resolved.lang, target_lang
            );
            self.metrics.translation(NO_PROVIDER, TranslationOutcome::Skipped);
            self.track_usage(request, request_id, &resolved.lang, NO_PROVIDER, char_count)
                .await;
            return Ok(self.respond(
                request,
                request.text.clone(),
                resolved,
                NO_PROVIDER,
                false,
                request_id,
                started,
            ));
        }

        let provider = self.providers.select(tenant.provider_preference)?;
        let provider_name = provider.kind().as_str();

        let masked = match Glossary::new(&tenant.glossary_preserve_terms) {
            Some(glossary) => glossary.apply(&request.text),
            None => request.text.clone(),
        };

        let key = self.cache.key_for(&masked, &resolved.lang, target_lang, provider_name);
        let (normalized, cached) = match self.cache.get(&key).await {
            Some(hit) => {
                self.metrics.translation(provider_name, TranslationOutcome::Cached);
                (hit, true)
            }
            None => {
                let breaker = self.breakers.get_or_create(provider_name);
                let call_started = Instant::now();
                let result = breaker
                    .call(|| provider.translate(&masked, &resolved.lang, target_lang))
                    .await;
                self.metrics
                    .translation_duration(provider_name, call_started.elapsed());

                let translated = match result {
                    Ok(translated) => translated,
                    Err(e) => {
                        self.metrics.translation(provider_name, TranslationOutcome::Failed);
                        warn!(
                            tenant_id = %tenant.id,
                            request_id,
                            provider = provider_name,
                            "Translation failed: {}", e
                        );
                        return Err(e.into_translation(provider_name));
                    }
                };

                self.metrics.translation(provider_name, TranslationOutcome::Translated);
                // "auto" sources take whatever the provider detected
                if let Some(detected) = translated
                    .detected_source_lang
                    .filter(|lang| is_auto_source(&resolved.lang) && !is_auto_source(lang))
                {
                    resolved.lang = detected;
                }
                let text = remove_glossary_markers(&translated.text);
                self.cache.set(&key, &text).await;
                (text, false)
            }
        };

        self.track_usage(request, request_id, &resolved.lang, provider_name, char_count)
            .await;

        info!(
            tenant_id = %tenant.id,
            request_id,
            provider = provider_name,
            cached,
            "Normalized {} ({} -> {})", request.record_id, resolved.lang, target_lang
        );

        Ok(self.respond(request, normalized, resolved, provider_name, cached, request_id, started))
    }

    /// Normalize every item of a batch; the first failing item fails the call
    pub async fn normalize_batch(
        &self,
        request: &BatchRequest,
        tenant: &TenantContext,
        mode: BatchMode,
        concurrency: Option<usize>,
    ) -> Result<BatchNormalizeResponse> {
        request.validate()?;
        if request.items.len() > self.max_batch_size {
            return Err(GatewayError::Validation(format!(
                "batch of {} items exceeds the configured maximum of {}",
                request.items.len(),
                self.max_batch_size
            )));
        }

        let batch_id = new_request_id();
        let mut items = Vec::with_capacity(request.items.len());

        match mode {
            BatchMode::Sequential => {
                for item in &request.items {
                    let item_request = request.item_request(item);
                    items.push(self.normalize(&item_request, tenant, &batch_id).await?);
                }
            }
            BatchMode::Concurrent => {
                let window = concurrency.unwrap_or(self.batch_concurrency).max(1);
                for chunk in request.items.chunks(window) {
                    let requests: Vec<NormalizeRequest> =
                        chunk.iter().map(|item| request.item_request(item)).collect();
                    let calls = requests.iter().map(|item_request| {
                        let item_id = new_request_id();
                        async move { self.normalize(item_request, tenant, &item_id).await }
                    });
                    for result in join_all(calls).await {
                        items.push(result?);
                    }
                }
            }
        }

        let total_chars = items.iter().map(|item| item.meta.char_count).sum();
        let total_cost = round_cost(items.iter().map(|item| item.meta.estimated_cost).sum());

        info!(
            tenant_id = %tenant.id,
            request_id = %batch_id,
            "Batch of {} items normalized ({:?})", items.len(), mode
        );

        Ok(BatchNormalizeResponse {
            tenant_id: request.tenant_id.clone(),
            request_id: batch_id,
            mode,
            items,
            total_chars,
            total_cost,
        })
    }

    async fn resolve_language(&self, request: &NormalizeRequest) -> ResolvedLanguage {
        if let Some(source) = request
            .source_lang
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return ResolvedLanguage {
                lang: source.to_string(),
                confidence: None,
            };
        }

        let detection = self.detect_language(&request.text).await;
        ResolvedLanguage {
            lang: detection.lang,
            confidence: Some(detection.confidence),
        }
    }

    /// Detect with length, cache and confidence rules applied.
    ///
    /// Every failure mode collapses to "und" with zero confidence.
    pub async fn detect_language(&self, text: &str) -> Detection {
        if text.chars().count() < self.detection.min_length {
            return Detection::undetermined();
        }

        let detection = match self.cache.get_detection(text).await {
            Some(cached) => cached,
            None if !self.detector.is_available() => {
                debug!("Language detector '{}' unavailable", self.detector.name());
                return Detection::undetermined();
            }
            None => match self.detector.detect(text).await {
                Ok(detection) => {
                    self.cache.set_detection(text, &detection).await;
                    detection
                }
                Err(e) => {
                    warn!("Language detection failed: {}", e);
                    return Detection::undetermined();
                }
            },
        };

        if detection.confidence < self.detection.confidence_threshold {
            debug!(
                "Detected '{}' below confidence threshold ({:.2} < {:.2})",
                detection.lang, detection.confidence, self.detection.confidence_threshold
            );
            return Detection::undetermined();
        }
        detection
    }

    async fn track_usage(
        &self,
        request: &NormalizeRequest,
        request_id: &str,
        source_lang: &str,
        provider: &str,
        char_count: usize,
    ) {
        let record = UsageRecord {
            tenant_id: request.tenant_id.clone(),
            request_id: request_id.to_string(),
            record_id: request.record_id.clone(),
            record_type: request.record_type,
            source_lang: source_lang.to_string(),
            target_lang: request.target_lang.trim().to_string(),
            char_count,
            provider: provider.to_string(),
            recorded_at: chrono::Utc::now(),
        };
        record_best_effort(self.usage.as_ref(), &record).await;
    }

    #[allow(clippy::too_many_arguments)]
    fn respond(
        &self,
        request: &NormalizeRequest,
        text_normalized: String,
        resolved: ResolvedLanguage,
        provider: &str,
        cached: bool,
        request_id: &str,
        started: Instant,
    ) -> NormalizeResponse {
        let char_count = request.text.chars().count();
        let estimated_cost = estimate_cost(char_count, self.pricing.rate_for(provider));

        NormalizeResponse {
            tenant_id: request.tenant_id.clone(),
            record_id: request.record_id.clone(),
            record_type: request.record_type,
            text_original: request.text.clone(),
            text_normalized,
            source_lang: resolved.lang,
            target_lang: request.target_lang.trim().to_string(),
            meta: NormalizeMeta {
                detector: resolved.confidence.map(|_| self.detector.name()),
                detection_confidence: resolved.confidence,
                translator: provider.to_string(),
                char_count,
                estimated_cost,
                request_id: request_id.to_string(),
                cached,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}
