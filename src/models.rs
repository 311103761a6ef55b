use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GatewayError, Result};
use crate::translate::ProviderKind;

/// Language code for "could not be determined"
pub const UNDETERMINED: &str = "und";

/// Provider name recorded when translation was skipped
pub const NO_PROVIDER: &str = "none";

pub const MAX_BATCH_ITEMS: usize = 100;

fn default_target_lang() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    EmailSubject,
    EmailBody,
    MeetingTitle,
    MeetingDescription,
    CallNote,
    CrmNote,
    DealUpdate,
    Custom,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailSubject => "email_subject",
            Self::EmailBody => "email_body",
            Self::MeetingTitle => "meeting_title",
            Self::MeetingDescription => "meeting_description",
            Self::CallNote => "call_note",
            Self::CrmNote => "crm_note",
            Self::DealUpdate => "deal_update",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "email_subject" => Ok(Self::EmailSubject),
            "email_body" => Ok(Self::EmailBody),
            "meeting_title" => Ok(Self::MeetingTitle),
            "meeting_description" => Ok(Self::MeetingDescription),
            "call_note" => Ok(Self::CallNote),
            "crm_note" => Ok(Self::CrmNote),
            "deal_update" => Ok(Self::DealUpdate),
            "custom" => Ok(Self::Custom),
            other => Err(GatewayError::Validation(format!("Unknown record type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeRequest {
    pub tenant_id: String,
    pub record_id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub text: String,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
}

impl NormalizeRequest {
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(GatewayError::Validation("tenant_id is required".to_string()));
        }
        if self.record_id.trim().is_empty() {
            return Err(GatewayError::Validation("record_id is required".to_string()));
        }
        if self.text.is_empty() {
            return Err(GatewayError::Validation("text must not be empty".to_string()));
        }
        if self.target_lang.trim().is_empty() {
            return Err(GatewayError::Validation("target_lang must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub record_id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub text: String,
    #[serde(default)]
    pub source_lang: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub tenant_id: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    pub items: Vec<BatchItem>,
}

impl BatchRequest {
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(GatewayError::Validation("tenant_id is required".to_string()));
        }
        if self.items.is_empty() || self.items.len() > MAX_BATCH_ITEMS {
            return Err(GatewayError::Validation(format!(
                "batch must contain between 1 and {} items, got {}",
                MAX_BATCH_ITEMS,
                self.items.len()
            )));
        }
        for (idx, item) in self.items.iter().enumerate() {
            if item.text.is_empty() {
                return Err(GatewayError::Validation(format!(
                    "item {} ({}) has empty text",
                    idx, item.record_id
                )));
            }
        }
        Ok(())
    }

    /// Expand one item into a standalone request
    pub fn item_request(&self, item: &BatchItem) -> NormalizeRequest {
        NormalizeRequest {
            tenant_id: self.tenant_id.clone(),
            record_id: item.record_id.clone(),
            record_type: item.record_type,
            text: item.text.clone(),
            source_lang: item.source_lang.clone(),
            target_lang: self.target_lang.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// One item at a time under a shared request id
    #[default]
    Sequential,
    /// Fixed-size windows of items processed concurrently
    Concurrent,
}

impl FromStr for BatchMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(GatewayError::Validation(format!(
                "Invalid batch mode '{}'. Valid modes: sequential, concurrent",
                other
            ))),
        }
    }
}

/// Tenant settings resolved by the caller; treated as already authenticated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantContext {
    pub id: String,
    #[serde(default)]
    pub provider_preference: Option<ProviderKind>,
    #[serde(default)]
    pub glossary_preserve_terms: Vec<String>,
}

impl TenantContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeMeta {
    /// Present only when detection ran
    pub detection_confidence: Option<f64>,
    pub translator: String,
    pub detector: Option<String>,
    pub char_count: usize,
    pub estimated_cost: f64,
    pub request_id: String,
    pub cached: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeResponse {
    pub tenant_id: String,
    pub record_id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub text_original: String,
    pub text_normalized: String,
    pub source_lang: String,
    pub target_lang: String,
    pub meta: NormalizeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormalizeResponse {
    pub tenant_id: String,
    pub request_id: String,
    pub mode: BatchMode,
    pub items: Vec<NormalizeResponse>,
    pub total_chars: usize,
    pub total_cost: f64,
}

/// Usage record handed to the usage sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant_id: String,
    pub request_id: String,
    pub record_id: String,
    pub record_type: RecordType,
    pub source_lang: String,
    pub target_lang: String,
    pub char_count: usize,
    pub provider: String,
    pub recorded_at: DateTime<Utc>,
}

/// Round a USD amount to 4 decimal places
pub fn round_cost(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Cost of translating `char_count` characters at `rate_per_million` USD
pub fn estimate_cost(char_count: usize, rate_per_million: f64) -> f64 {
    round_cost(char_count as f64 / 1_000_000.0 * rate_per_million)
}
