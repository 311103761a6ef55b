use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use whatlang::Lang;

use crate::error::{GatewayError, Result};
use crate::models::UNDETERMINED;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub lang: String,
    pub confidence: f64,
}

impl Detection {
    pub fn new(lang: impl Into<String>, confidence: f64) -> Self {
        Self {
            lang: lang.into(),
            confidence,
        }
    }

    /// "und" with zero confidence
    pub fn undetermined() -> Self {
        Self::new(UNDETERMINED, 0.0)
    }

    pub fn is_undetermined(&self) -> bool {
        self.lang == UNDETERMINED
    }
}

/// Source-language detector consulted when a request carries no `source_lang`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    /// Reported as `meta.detector`
    fn name(&self) -> String;

    async fn detect(&self, text: &str) -> Result<Detection>;

    fn is_available(&self) -> bool;

    /// Message of the most recent failed detection
    fn last_error(&self) -> Option<String>;
}

/// Offline trigram detector backed by `whatlang`
#[derive(Default)]
pub struct WhatlangDetector {
    last_error: Mutex<Option<String>>,
}

impl WhatlangDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LanguageDetector for WhatlangDetector {
    fn name(&self) -> String {
        "whatlang".to_string()
    }

    async fn detect(&self, text: &str) -> Result<Detection> {
        match whatlang::detect(text) {
            Some(info) => {
                *self.last_error.lock() = None;
                let detection = Detection::new(iso_639_1(info.lang()), info.confidence());
                debug!(
                    "Detected '{}' with confidence {:.2} (reliable: {})",
                    detection.lang,
                    detection.confidence,
                    info.is_reliable()
                );
                Ok(detection)
            }
            None => {
                let message = format!("no language identified in {} characters", text.chars().count());
                *self.last_error.lock() = Some(message.clone());
                Err(GatewayError::Detection(message))
            }
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

/// Two-letter code where one exists, otherwise whatlang's three-letter code
fn iso_639_1(lang: Lang) -> String {
    let code = match lang.code() {
        "eng" => "en",
        "spa" => "es",
        "fra" => "fr",
        "deu" => "de",
        "ita" => "it",
        "por" => "pt",
        "rus" => "ru",
        "ukr" => "uk",
        "bel" => "be",
        "bul" => "bg",
        "srp" => "sr",
        "hrv" => "hr",
        "slv" => "sl",
        "slk" => "sk",
        "ces" => "cs",
        "pol" => "pl",
        "mkd" => "mk",
        "ron" => "ro",
        "hun" => "hu",
        "ell" => "el",
        "lit" => "lt",
        "lav" => "lv",
        "est" => "et",
        "fin" => "fi",
        "swe" => "sv",
        "dan" => "da",
        "nob" => "nb",
        "nld" => "nl",
        "afr" => "af",
        "cat" => "ca",
        "lat" => "la",
        "epo" => "eo",
        "tur" => "tr",
        "aze" => "az",
        "uzb" => "uz",
        "tuk" => "tk",
        "kat" => "ka",
        "hye" => "hy",
        "ara" => "ar",
        "heb" => "he",
        "yid" => "yi",
        "pes" => "fa",
        "urd" => "ur",
        "hin" => "hi",
        "mar" => "mr",
        "nep" => "ne",
        "ben" => "bn",
        "pan" => "pa",
        "guj" => "gu",
        "ori" => "or",
        "tam" => "ta",
        "tel" => "te",
        "kan" => "kn",
        "mal" => "ml",
        "sin" => "si",
        "tha" => "th",
        "khm" => "km",
        "mya" => "my",
        "vie" => "vi",
        "ind" => "id",
        "jav" => "jv",
        "tgl" => "tl",
        "cmn" => "zh",
        "jpn" => "ja",
        "kor" => "ko",
        "amh" => "am",
        "aka" => "ak",
        "zul" => "zu",
        "sna" => "sn",
        other => other,
    };
    code.to_string()
}
