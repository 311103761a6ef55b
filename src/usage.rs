use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::models::UsageRecord;

/// Destination for per-request usage records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: &UsageRecord) -> Result<()>;
}

/// Record usage without letting a sink failure reach the caller.
///
/// The outcome is logged and dropped here so every call site stays explicit
/// about usage being best-effort.
pub async fn record_best_effort(sink: &dyn UsageSink, record: &UsageRecord) {
    if let Err(e) = sink.record(record).await {
        warn!(
            tenant_id = %record.tenant_id,
            request_id = %record.request_id,
            "Usage tracking failed: {}", e
        );
    }
}

/// Emits each record as a structured tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUsageSink;

#[async_trait]
impl UsageSink for LogUsageSink {
    async fn record(&self, record: &UsageRecord) -> Result<()> {
        info!(
            target: "textgate::usage",
            tenant_id = %record.tenant_id,
            request_id = %record.request_id,
            record_id = %record.record_id,
            record_type = %record.record_type,
            source_lang = %record.source_lang,
            target_lang = %record.target_lang,
            char_count = record.char_count,
            provider = %record.provider,
            "usage"
        );
        Ok(())
    }
}

/// Appends one JSON object per line
pub struct JsonlUsageSink {
    path: PathBuf,
    // serializes appends so lines from concurrent requests never interleave
    lock: Mutex<()>,
}

impl JsonlUsageSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl UsageSink for JsonlUsageSink {
    async fn record(&self, record: &UsageRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| GatewayError::Usage(format!("cannot open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordType;
    use chrono::Utc;

    fn record(record_id: &str) -> UsageRecord {
        UsageRecord {
            tenant_id: "t1".to_string(),
            request_id: "req-1".to_string(),
            record_id: record_id.to_string(),
            record_type: RecordType::EmailBody,
            source_lang: "es".to_string(),
            target_lang: "en".to_string(),
            char_count: 10,
            provider: "google".to_string(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage").join("usage.jsonl");
        let sink = JsonlUsageSink::new(&path);

        sink.record(&record("r1")).await.unwrap();
        sink.record(&record("r2")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<UsageRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].record_id, "r1");
        assert_eq!(lines[1].provider, "google");
    }

    #[tokio::test]
    async fn best_effort_swallows_sink_errors() {
        let mut sink = MockUsageSink::new();
        sink.expect_record()
            .times(1)
            .returning(|_| Err(GatewayError::Usage("disk full".to_string())));

        record_best_effort(&sink, &record("r1")).await;
    }

    #[tokio::test]
    async fn log_sink_never_fails() {
        tokio_test::assert_ok!(LogUsageSink.record(&record("r1")).await);
    }
}
