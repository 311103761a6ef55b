use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderCredentials;
use crate::error::{GatewayError, Result};
use crate::glossary::{has_markers, to_html};
use super::{ProviderKind, TranslationProvider, common::{self, LanguageListCache, RetryPolicy, TranslationResult}};

const FREE_ENDPOINT: &str = "https://api-free.deepl.com";
const PRO_ENDPOINT: &str = "https://api.deepl.com";

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
    detected_source_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeepLLanguage {
    language: String,
}

/// DeepL REST API (v2)
pub struct DeepLTranslator {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    retry: RetryPolicy,
    languages: LanguageListCache,
}

impl DeepLTranslator {
    pub fn new(credentials: ProviderCredentials, retry: RetryPolicy) -> Result<Self> {
        let client = common::build_client(credentials.request_timeout_secs)?;
        let api_key = credentials.api_key.filter(|k| !k.trim().is_empty());

        // Free-tier keys end in ":fx" and only work against the free host
        let endpoint = match (credentials.endpoint, api_key.as_deref()) {
            (Some(endpoint), _) => endpoint,
            (None, Some(key)) if key.ends_with(":fx") => FREE_ENDPOINT.to_string(),
            (None, _) => PRO_ENDPOINT.to_string(),
        };

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            retry,
            languages: LanguageListCache::default(),
        })
    }

    fn auth_header(&self) -> Result<String> {
        self.api_key
            .as_deref()
            .map(|key| format!("DeepL-Auth-Key {}", key))
            .ok_or_else(|| GatewayError::Translation("deepl provider is not configured".to_string()))
    }

    async fn request_translations(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationResult>> {
        let auth = self.auth_header()?;
        let form = build_form(texts, source_lang, target_lang);
        let html = form.iter().any(|(key, _)| *key == "tag_handling");

        debug!("Sending {} text(s) to DeepL", texts.len());

        let response = self.client
            .post(format!("{}/v2/translate", self.endpoint))
            .header("Authorization", auth)
            .form(&form)
            .send()
            .await?;
        let response = common::check_status("deepl", response).await?;
        let parsed: TranslateResponse = response.json().await?;

        if parsed.translations.len() != texts.len() {
            return Err(GatewayError::Translation(format!(
                "deepl returned {} translations for {} texts",
                parsed.translations.len(),
                texts.len()
            )));
        }

        Ok(parsed
            .translations
            .into_iter()
            .map(|t| TranslationResult {
                text: if html { common::decode_entities(&t.text) } else { t.text },
                detected_source_lang: t.detected_source_language.map(|code| code.to_lowercase()),
            })
            .collect())
    }

    async fn fetch_languages(&self) -> Result<Vec<String>> {
        let auth = self.auth_header()?;
        let response = self.client
            .get(format!("{}/v2/languages", self.endpoint))
            .header("Authorization", auth)
            .query(&[("type", "target")])
            .send()
            .await?;
        let response = common::check_status("deepl", response).await?;
        let parsed: Vec<DeepLLanguage> = response.json().await?;

        Ok(parsed
            .into_iter()
            .map(|l| common::base_language(&l.language))
            .collect())
    }
}

#[async_trait]
impl TranslationProvider for DeepLTranslator {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepL
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<TranslationResult> {
        let texts = [text.to_string()];
        let mut results = self.translate_batch(&texts, source_lang, target_lang).await?;
        results
            .pop()
            .ok_or_else(|| GatewayError::Translation("deepl returned no translation".to_string()))
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry
            .run("deepl translate", || self.request_translations(texts, source_lang, target_lang))
            .await
            .map_err(|e| e.into_translation("deepl"))
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn supported_languages(&self) -> Vec<String> {
        self.languages
            .get_or_fetch("deepl", || {
                self.retry.run("deepl languages", || self.fetch_languages())
            })
            .await
    }
}

/// Masked texts are sent as escaped HTML with `tag_handling=html`
fn build_form(texts: &[String], source_lang: &str, target_lang: &str) -> Vec<(&'static str, String)> {
    let html = texts.iter().any(|t| has_markers(t));
    let mut form: Vec<(&'static str, String)> = texts
        .iter()
        .map(|t| ("text", if html { to_html(t) } else { t.clone() }))
        .collect();
    form.push(("target_lang", to_deepl_target(target_lang)));
    if !common::is_auto_source(source_lang) {
        form.push(("source_lang", to_deepl_source(source_lang)));
    }
    if html {
        form.push(("tag_handling", "html".to_string()));
    }
    form
}

/// DeepL source languages carry no regional variant ("zh-TW" -> "ZH")
fn to_deepl_source(code: &str) -> String {
    common::base_language(code).to_uppercase()
}

/// DeepL requires a variant for some target languages
fn to_deepl_target(code: &str) -> String {
    let code = code.trim().to_lowercase();
    match code.as_str() {
        "en" => "EN-US".to_string(),
        "pt" => "PT-BR".to_string(),
        "en-gb" | "en-us" | "pt-pt" | "pt-br" => code.to_uppercase(),
        _ => common::base_language(&code).to_uppercase(),
    }
}
