use crate::config::RestConfig;
use crate::db::models::SinkRow;
use crate::db::BatchSink;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// PostgREST-style sink (e.g. a hosted Supabase table).
///
/// Posts each batch as a JSON array and asks for the inserted rows back;
/// an empty array counts as a rejection.
pub struct RestSink {
    client: Client,
    endpoint: String,
    api_key: String,
    table: String,
}

impl RestSink {
    pub fn new(config: &RestConfig, table: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("aq-etl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{}", config.url.trim_end_matches('/'), table),
            api_key: config.api_key.clone(),
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl BatchSink for RestSink {
    async fn insert_batch(&self, rows: &[SinkRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        debug!("Posting {} rows to {}", rows.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .json(rows)
            .send()
            .await
            .map_err(|e| AppError::SinkRejected(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::SinkRejected(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let inserted: Vec<Value> = response
            .json()
            .await
            .map_err(|e| AppError::SinkRejected(format!("unreadable response: {}", e)))?;

        if inserted.is_empty() {
            return Err(AppError::SinkRejected(
                "sink returned no inserted rows".to_string(),
            ));
        }

        Ok(inserted.len())
    }

    fn describe(&self) -> String {
        format!("rest table {}", self.table)
    }
}
