//! Write-only metrics surface.
//!
//! The core never reads metrics back; an exporter (Prometheus or otherwise) is
//! installed by the embedding process as the global `metrics` recorder.

use std::time::Duration;

use crate::breaker::BreakerState;

/// Outcome label for `textgate_translations_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated,
    Cached,
    Skipped,
    Failed,
}

impl TranslationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translated => "translated",
            Self::Cached => "cached",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn translation(&self, provider: &str, outcome: TranslationOutcome);

    fn translation_duration(&self, provider: &str, elapsed: Duration);

    fn cache_request(&self, tier: &str, hit: bool);

    fn breaker_state(&self, provider: &str, state: BreakerState);
}

/// Emits through the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
    fn translation(&self, provider: &str, outcome: TranslationOutcome) {
        metrics::counter!(
            "textgate_translations_total",
            "provider" => provider.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    fn translation_duration(&self, provider: &str, elapsed: Duration) {
        metrics::histogram!(
            "textgate_translation_duration_seconds",
            "provider" => provider.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    fn cache_request(&self, tier: &str, hit: bool) {
        metrics::counter!(
            "textgate_cache_requests_total",
            "tier" => tier.to_string(),
            "result" => if hit { "hit" } else { "miss" }
        )
        .increment(1);
    }

    fn breaker_state(&self, provider: &str, state: BreakerState) {
        // 0 closed, 1 half-open, 2 open
        metrics::gauge!("textgate_breaker_state", "provider" => provider.to_string())
            .set(state.level());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn translation(&self, _provider: &str, _outcome: TranslationOutcome) {}

    fn translation_duration(&self, _provider: &str, _elapsed: Duration) {}

    fn cache_request(&self, _tier: &str, _hit: bool) {}

    fn breaker_state(&self, _provider: &str, _state: BreakerState) {}
}
