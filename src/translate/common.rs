use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
    /// Source language as reported by the provider, in generic form
    pub detected_source_lang: Option<String>,
}

impl TranslationResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            detected_source_lang: None,
        }
    }
}

/// Exponential backoff applied around every provider network call.
///
/// Attempt `n` (1-based) waits `base_delay * multiplier^(n-1)` before attempt
/// `n + 1`; the last error is returned after `max_attempts` without sleeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor.max(0.0))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or attempts run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts || !e.is_retryable() => {
                    if attempt > 1 {
                        warn!("{} failed after {} attempts: {}", label, attempt, e);
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    debug!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        label, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Build the HTTP client shared by a provider's calls
pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .user_agent(concat!("textgate/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(GatewayError::Http)
}

/// Turn a non-success response into `ProviderStatus`, passing successes through
pub async fn check_status(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::ProviderStatus {
        provider: provider.to_string(),
        status,
        body,
    })
}

/// Whether the provider should detect the source language itself
pub fn is_auto_source(source_lang: &str) -> bool {
    let source = source_lang.trim();
    source.is_empty() || source.eq_ignore_ascii_case("und") || source.eq_ignore_ascii_case("auto")
}

/// Primary subtag of a language code, lower-cased ("zh-TW" -> "zh")
pub fn base_language(code: &str) -> String {
    code.split(['-', '_'])
        .next()
        .unwrap_or(code)
        .trim()
        .to_lowercase()
}

static ENTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|(amp|lt|gt|quot|apos|nbsp));")
        .expect("entity pattern is valid")
});

/// Undo the entity escaping of a provider's HTML-mode output in a single pass,
/// so `&amp;lt;` becomes `&lt;` rather than `<`
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
            } else {
                match caps.get(3).map(|m| m.as_str()) {
                    Some("amp") => Some('&'),
                    Some("lt") => Some('<'),
                    Some("gt") => Some('>'),
                    Some("quot") => Some('"'),
                    Some("apos") => Some('\''),
                    Some("nbsp") => Some('\u{a0}'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Supported-language list fetched once per process.
///
/// Failed lookups are not remembered, so the next call tries again.
#[derive(Debug, Default)]
pub struct LanguageListCache {
    languages: RwLock<Option<Vec<String>>>,
}

impl LanguageListCache {
    pub async fn get_or_fetch<F, Fut>(&self, provider: &str, fetch: F) -> Vec<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        if let Some(languages) = self.languages.read().await.as_ref() {
            return languages.clone();
        }

        match fetch().await {
            Ok(mut languages) => {
                languages.sort();
                languages.dedup();
                *self.languages.write().await = Some(languages.clone());
                languages
            }
            Err(e) => {
                warn!("Failed to fetch supported languages from {}: {}", provider, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    fn transient() -> GatewayError {
        GatewayError::ProviderStatus {
            provider: "test".to_string(),
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn entities_decode_in_one_pass() {
        assert_eq!(decode_entities("l&#39;Acme &amp; co"), "l'Acme & co");
        assert_eq!(decode_entities("R&amp;D &lt;draft&gt; &#x27;x&#x27;"), "R&D <draft> 'x'");
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
        assert_eq!(decode_entities("AT&T &unknown;"), "AT&T &unknown;");
        assert_eq!(decode_entities("plain"), "plain");
    }

    #[test]
    fn escaped_payload_decodes_back_to_masked_text() {
        use crate::glossary::{apply_glossary, remove_glossary_markers, to_html};

        let original = "R&D <draft> \"Acme\" isn't AT&T";
        let masked = apply_glossary(original, &["Acme".to_string(), "AT&T".to_string()]);
        let round_trip = decode_entities(&to_html(&masked));
        assert_eq!(round_trip, masked);
        assert_eq!(remove_glossary_markers(&round_trip), original);
    }

    #[test]
    fn backoff_doubles_from_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_last_error_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;
        assert!(matches!(result, Err(GatewayError::ProviderStatus { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn configuration_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Config("no key".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_sources() {
        assert!(is_auto_source("und"));
        assert!(is_auto_source("AUTO"));
        assert!(is_auto_source(""));
        assert!(!is_auto_source("es"));
    }

    #[test]
    fn base_language_strips_region() {
        assert_eq!(base_language("zh-TW"), "zh");
        assert_eq!(base_language("pt_BR"), "pt");
        assert_eq!(base_language("EN"), "en");
    }

    #[tokio::test]
    async fn language_list_is_fetched_once_and_failures_are_empty() {
        let cache = LanguageListCache::default();
        let failed = cache
            .get_or_fetch("test", || async { Err(transient()) })
            .await;
        assert!(failed.is_empty());

        let fetched = cache
            .get_or_fetch("test", || async { Ok(vec!["fr".to_string(), "de".to_string(), "fr".to_string()]) })
            .await;
        assert_eq!(fetched, vec!["de", "fr"]);

        let cached = cache
            .get_or_fetch("test", || async { Ok(vec!["xx".to_string()]) })
            .await;
        assert_eq!(cached, vec!["de", "fr"]);
    }
}
