use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Translation error: {0}")]
    Translation(String),

    /// Short-circuited by an open breaker; the provider was not called.
    #[error("Translation error: {0} unavailable")]
    CircuitOpen(String),

    #[error("Provider {provider} returned {status}: {body}")]
    ProviderStatus {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Language detection error: {0}")]
    Detection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Usage tracking error: {0}")]
    Usage(String),

    #[error("Rate limit exceeded for {key}, retry in {retry_after_ms}ms")]
    RateLimited { key: String, retry_after_ms: u64 },
}

impl GatewayError {
    /// Whether a provider call that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder() && !e.is_decode(),
            Self::ProviderStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Failures that surface to callers as translation failures.
    pub fn is_translation_failure(&self) -> bool {
        matches!(self, Self::Translation(_) | Self::CircuitOpen(_))
    }

    /// Collapse an adapter-level failure into a `Translation` error for `provider`.
    pub fn into_translation(self, provider: &str) -> Self {
        match self {
            Self::Translation(_) | Self::CircuitOpen(_) | Self::Validation(_) => self,
            other => Self::Translation(format!("{} request failed: {}", provider, other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_reads_as_unavailable_provider() {
        let err = GatewayError::CircuitOpen("deepl".to_string());
        assert_eq!(err.to_string(), "Translation error: deepl unavailable");
        assert!(err.is_translation_failure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_transient_statuses_are_retryable() {
        let status = |status| GatewayError::ProviderStatus {
            provider: "google".to_string(),
            status,
            body: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!GatewayError::Config("missing key".to_string()).is_retryable());
    }

    #[test]
    fn into_translation_wraps_foreign_errors_once() {
        let err = GatewayError::ProviderStatus {
            provider: "google".to_string(),
            status: 500,
            body: "boom".to_string(),
        }
        .into_translation("google");
        assert!(matches!(err, GatewayError::Translation(_)));

        let open = GatewayError::CircuitOpen("google".to_string()).into_translation("google");
        assert!(matches!(open, GatewayError::CircuitOpen(_)));
    }
}
