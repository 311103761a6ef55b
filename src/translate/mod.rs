// Provider-agnostic translation layer
//
// Every backend implements `TranslationProvider`; the set of backends is closed
// over `ProviderKind` and wired once at startup by `ProviderRegistry`:
// - Google: Cloud Translation v2 (variant A)
// - DeepL: DeepL REST API (variant B)
//
// To add a backend, add a `ProviderKind` variant, implement the trait in its own
// module and register it in `ProviderRegistry::from_config`.

pub mod common;
pub mod deepl;
pub mod google;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

pub use common::*;
use crate::config::Config;
use crate::error::{GatewayError, Result};

/// Main trait for translation backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Identifier of this backend
    fn kind(&self) -> ProviderKind;

    /// Translate one text; `source_lang` of "und"/"auto" lets the provider detect
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<TranslationResult>;

    /// Translate many texts in one call; results follow input order
    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationResult>>;

    /// Credentials present and client initialized
    fn is_available(&self) -> bool;

    /// Generic language codes the provider accepts; empty when the lookup fails
    async fn supported_languages(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    #[serde(rename = "deepl")]
    DeepL,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Google, ProviderKind::DeepL];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::DeepL => "deepl",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "deepl" => Ok(Self::DeepL),
            other => Err(GatewayError::Config(format!(
                "Unknown provider '{}'. Valid providers: google, deepl",
                other
            ))),
        }
    }
}

/// Providers available to the pipeline, built once at startup
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, Arc<dyn TranslationProvider>>,
    default: ProviderKind,
    fallback_to_available: bool,
}

impl ProviderRegistry {
    pub fn new(default: ProviderKind) -> Self {
        Self {
            providers: BTreeMap::new(),
            default,
            fallback_to_available: false,
        }
    }

    /// Build every known provider from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let default = config.providers.default.parse::<ProviderKind>()?;
        let retry = RetryPolicy::from(&config.retry);

        let mut registry = Self::new(default).with_fallback(config.providers.fallback_to_available);
        registry.register(Arc::new(google::GoogleTranslator::new(
            config.providers.google.clone(),
            retry.clone(),
        )?));
        registry.register(Arc::new(deepl::DeepLTranslator::new(
            config.providers.deepl.clone(),
            retry,
        )?));

        for (name, available) in registry.available() {
            if available {
                info!("Translation provider '{}' is configured", name);
            } else {
                warn!("Translation provider '{}' has no credentials", name);
            }
        }

        Ok(registry)
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_available = enabled;
        self
    }

    pub fn register(&mut self, provider: Arc<dyn TranslationProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn TranslationProvider>> {
        self.providers.get(&kind).cloned()
    }

    /// Resolve the provider for a tenant preference.
    ///
    /// Falls back to the process default when there is no preference. With
    /// `fallback_to_available` set, an unconfigured choice is swapped for the
    /// first configured provider; otherwise the choice stands and the call
    /// fails later with a translation error.
    pub fn select(&self, preference: Option<ProviderKind>) -> Result<Arc<dyn TranslationProvider>> {
        let kind = preference.unwrap_or(self.default);
        let chosen = self.get(kind);

        if self.fallback_to_available && !chosen.as_ref().is_some_and(|p| p.is_available()) {
            if let Some(alternative) = self.providers.values().find(|p| p.is_available()) {
                warn!(
                    "Provider '{}' unavailable, falling back to '{}'",
                    kind,
                    alternative.kind()
                );
                return Ok(alternative.clone());
            }
        }

        chosen.ok_or_else(|| GatewayError::Translation(format!("{} provider is not registered", kind)))
    }

    /// Availability of every registered provider, keyed by name
    pub fn available(&self) -> BTreeMap<String, bool> {
        self.providers
            .iter()
            .map(|(kind, provider)| (kind.as_str().to_string(), provider.is_available()))
            .collect()
    }
}
