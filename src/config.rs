use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use crate::error::{Result, GatewayError};

// Defaults shared by `Default` impls and `#[serde(default = ...)]`
fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_remote_retry_secs() -> u64 {
    5
}

fn default_rolling_window_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
    pub pricing: PricingConfig,
    pub rate_limit: RateLimitConfig,
    pub usage: UsageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider used when the tenant has no preference
    pub default: String,
    /// Switch to any available provider when the selected one is not configured
    pub fallback_to_available: bool,
    pub google: ProviderCredentials,
    pub deepl: ProviderCredentials,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    /// Overrides the provider's public endpoint
    pub endpoint: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub base_delay_ms: u64,
    /// Factor applied to the delay after every failed attempt
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Disabled breakers pass every call straight through
    pub enabled: bool,
    /// Calls running longer than this count as timeouts
    pub timeout_ms: u64,
    /// Failure percentage at or above which the breaker opens
    pub error_threshold_percentage: f64,
    /// Time spent open before a probe call is let through
    pub reset_timeout_ms: u64,
    /// Calls required in the rolling window before the ratio is evaluated
    pub volume_threshold: u32,
    #[serde(default = "default_rolling_window_ms")]
    pub rolling_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Remote tier; the cache runs local-only when unset or unreachable
    pub redis_url: Option<String>,
    pub namespace: String,
    /// Translation entry lifetime in seconds
    pub ttl_secs: u64,
    /// Language detection entry lifetime in seconds
    pub detection_ttl_secs: u64,
    /// Capacity of the in-process fallback store
    pub local_max_entries: usize,
    /// Entries evicted at once when the fallback store is full
    pub eviction_batch: usize,
    /// How long the remote tier is skipped after an error
    #[serde(default = "default_remote_retry_secs")]
    pub remote_retry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Inputs shorter than this (in characters) are not detected
    pub min_length: usize,
    /// Detections below this confidence collapse to "und"
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_target_lang: String,
    /// Window size for concurrent batch processing
    pub batch_concurrency: usize,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// USD per one million characters, keyed by provider name
    pub rates: HashMap<String, f64>,
    /// Rate for providers missing from `rates`
    pub default_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_secs: u64,
    pub max_requests: u32,
    /// Share the window across instances through the cache's Redis
    #[serde(default = "default_true")]
    pub use_redis: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Append usage records as JSON lines to this file
    pub jsonl_path: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: "google".to_string(),
            fallback_to_available: false,
            google: ProviderCredentials {
                request_timeout_secs: default_request_timeout_secs(),
                ..Default::default()
            },
            deepl: ProviderCredentials {
                request_timeout_secs: default_request_timeout_secs(),
                ..Default::default()
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 10_000,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            volume_threshold: 5,
            rolling_window_ms: default_rolling_window_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            namespace: "translation".to_string(),
            ttl_secs: 7 * 24 * 60 * 60,
            detection_ttl_secs: 24 * 60 * 60,
            local_max_entries: 10_000,
            eviction_batch: 100,
            remote_retry_secs: default_remote_retry_secs(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_length: 10,
            confidence_threshold: 0.5,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_target_lang: "en".to_string(),
            batch_concurrency: 5,
            max_batch_size: 100,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        let rates = HashMap::from([
            ("google".to_string(), 20.0),
            ("deepl".to_string(), 25.0),
            ("none".to_string(), 0.0),
        ]);
        Self {
            rates,
            default_rate: 20.0,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 600,
            use_redis: true,
        }
    }
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }
}

impl PricingConfig {
    /// USD per one million characters for `provider`
    pub fn rate_for(&self, provider: &str) -> f64 {
        self.rates.get(provider).copied().unwrap_or(self.default_rate)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| GatewayError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Fill secrets and deployment settings from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GOOGLE_TRANSLATE_API_KEY") {
            self.providers.google.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("DEEPL_API_KEY") {
            self.providers.deepl.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("TEXTGATE_REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Ok(provider) = std::env::var("TEXTGATE_DEFAULT_PROVIDER") {
            self.providers.default = provider;
        }
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(GatewayError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.breaker.error_threshold_percentage) {
            return Err(GatewayError::Config(
                "breaker.error_threshold_percentage must be within 0..=100".to_string(),
            ));
        }
        if self.pipeline.batch_concurrency == 0 {
            return Err(GatewayError::Config("pipeline.batch_concurrency must be at least 1".to_string()));
        }
        if self.cache.local_max_entries == 0 {
            return Err(GatewayError::Config("cache.local_max_entries must be at least 1".to_string()));
        }
        Ok(())
    }
}
