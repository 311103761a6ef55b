use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderCredentials;
use crate::error::{GatewayError, Result};
use crate::glossary::{has_markers, to_html};
use super::{ProviderKind, TranslationProvider, common::{self, LanguageListCache, RetryPolicy, TranslationResult}};

const DEFAULT_ENDPOINT: &str = "https://translation.googleapis.com/language/translate/v2";

#[derive(Debug, Serialize)]
struct TranslateBody {
    q: Vec<String>,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<GoogleTranslation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    translated_text: String,
    detected_source_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LanguagesResponse {
    data: LanguagesData,
}

#[derive(Debug, Deserialize)]
struct LanguagesData {
    languages: Vec<GoogleLanguage>,
}

#[derive(Debug, Deserialize)]
struct GoogleLanguage {
    language: String,
}

/// Google Cloud Translation (v2 REST)
pub struct GoogleTranslator {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    retry: RetryPolicy,
    languages: LanguageListCache,
}

impl GoogleTranslator {
    pub fn new(credentials: ProviderCredentials, retry: RetryPolicy) -> Result<Self> {
        let client = common::build_client(credentials.request_timeout_secs)?;
        let endpoint = credentials
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            api_key: credentials.api_key.filter(|k| !k.trim().is_empty()),
            endpoint,
            retry,
            languages: LanguageListCache::default(),
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| GatewayError::Translation("google provider is not configured".to_string()))
    }

    async fn request_translations(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<TranslationResult>> {
        let api_key = self.api_key()?;
        let body = build_body(texts, source_lang, target_lang);
        let html = body.format == "html";

        debug!("Sending {} text(s) to Google Translate", texts.len());

        let response = self.client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        let response = common::check_status("google", response).await?;
        let parsed: TranslateResponse = response.json().await?;

        if parsed.data.translations.len() != texts.len() {
            return Err(GatewayError::Translation(format!(
                "google returned {} translations for {} texts",
                parsed.data.translations.len(),
                texts.len()
            )));
        }

        Ok(parsed
            .data
            .translations
            .into_iter()
            .map(|t| TranslationResult {
                text: if html { common::decode_entities(&t.translated_text) } else { t.translated_text },
                detected_source_lang: t.detected_source_language.map(|code| from_google_code(&code)),
            })
            .collect())
    }

    async fn fetch_languages(&self) -> Result<Vec<String>> {
        let api_key = self.api_key()?;
        let response = self.client
            .get(format!("{}/languages", self.endpoint))
            .query(&[("key", api_key)])
            .send()
            .await?;
        let response = common::check_status("google", response).await?;
        let parsed: LanguagesResponse = response.json().await?;

        Ok(parsed
            .data
            .languages
            .into_iter()
            .map(|l| from_google_code(&l.language))
            .collect())
    }
}

#[async_trait]
impl TranslationProvider for GoogleTranslator {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<TranslationResult> {
        let texts = [text.to_string()];
        let mut results = self.translate_batch(&texts, source_lang, target_lang).await?;
        results
            .pop()
            .ok_or_else(|| GatewayError::Translation("google returned no translation".to_string()))
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
            .run("google translate", || self.request_translations(texts, source_lang, target_lang))
            .await
            .map_err(|e| e.into_translation("google"))
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn supported_languages(&self) -> Vec<String> {
        self.languages
            .get_or_fetch("google", || {
                self.retry.run("google languages", || self.fetch_languages())
            })
            .await
    }
}

/// Generic code to Google's dialect
fn to_google_code(code: &str) -> String {
    let code = code.trim();
    match code.to_lowercase().as_str() {
        "zh" | "zh-hans" => "zh-CN".to_string(),
        "zh-hant" => "zh-TW".to_string(),
        "he" => "iw".to_string(),
        "jv" => "jw".to_string(),
        _ => code.to_string(),
    }
}

/// Google's dialect back to generic codes
fn from_google_code(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "iw" => "he".to_string(),
        "jw" => "jv".to_string(),
        "zh-cn" => "zh-CN".to_string(),
        "zh-tw" => "zh-TW".to_string(),
        other => other.to_string(),
    }
}

/// Masked texts switch the whole request to HTML so marker spans are honoured
fn build_body(texts: &[String], source_lang: &str, target_lang: &str) -> TranslateBody {
    let html = texts.iter().any(|t| has_markers(t));
    TranslateBody {
        q: if html { texts.iter().map(|t| to_html(t)).collect() } else { texts.to_vec() },
        target: to_google_code(target_lang),
        source: (!common::is_auto_source(source_lang)).then(|| to_google_code(source_lang)),
        format: if html { "html" } else { "text" },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator(api_key: Option<&str>) -> GoogleTranslator {
        GoogleTranslator::new(
            ProviderCredentials {
                api_key: api_key.map(str::to_string),
                endpoint: None,
                request_timeout_secs: 5,
            },
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn expands_chinese_and_maps_legacy_codes() {
        assert_eq!(to_google_code("zh"), "zh-CN");
        assert_eq!(to_google_code("zh-TW"), "zh-TW");
        assert_eq!(to_google_code("he"), "iw");
        assert_eq!(to_google_code("es"), "es");
        assert_eq!(from_google_code("iw"), "he");
        assert_eq!(from_google_code("ES"), "es");
    }

    #[test]
    fn masked_body_is_escaped_html() {
        let texts = vec![crate::glossary::apply_glossary("R&D <draft> Acme", &["Acme".to_string()])];
        let body = build_body(&texts, "es", "en");
        assert_eq!(body.format, "html");
        assert_eq!(
            body.q[0],
            r#"R&amp;D &lt;draft&gt; <span translate="no">Acme</span>"#
        );
        assert_eq!(body.source.as_deref(), Some("es"));
    }

    #[test]
    fn plain_body_is_sent_verbatim() {
        let texts = vec!["R&D <draft>".to_string()];
        let body = build_body(&texts, "und", "zh");
        assert_eq!(body.format, "text");
        assert_eq!(body.q[0], "R&D <draft>");
        assert_eq!(body.target, "zh-CN");
    }

    #[test]
    fn availability_follows_credentials() {
        assert!(translator(Some("key")).is_available());
        assert!(!translator(None).is_available());
        assert!(!translator(Some("  ")).is_available());
    }

    #[tokio::test]
    async fn unconfigured_translate_fails_without_network() {
        let err = translator(None).translate("Hola", "es", "en").await.unwrap_err();
        assert!(matches!(err, GatewayError::Translation(_)));
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn unconfigured_language_list_is_empty() {
        assert!(translator(None).supported_languages().await.is_empty());
    }

    #[test]
    fn body_omits_source_for_auto_detection() {
        let texts = vec!["Hola".to_string()];
        let body = build_body(&texts, "auto", "en");
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("source").is_none());
        assert_eq!(json["target"], "en");
        assert_eq!(json["q"][0], "Hola");
    }
}
