use crate::config::SourceConfig;
use crate::error::{AppError, Result};
use crate::models::{Location, RawPayload};
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Source client for the hourly air-quality forecast API.
///
/// Issues exactly one request per call. Retrying is layered on top by the
/// caller through [`crate::retry`].
pub struct Fetcher {
    client: Client,
    base_url: String,
    hourly_fields: String,
    forecast_days: u32,
}

impl Fetcher {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("aq-etl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            hourly_fields: config.pollutants.join(","),
            forecast_days: config.forecast_days,
        })
    }

    pub async fn fetch(&self, location: &Location) -> Result<RawPayload> {
        debug!(
            "Fetching {} ({}, {}) from {}",
            location.name, location.latitude, location.longitude, self.base_url
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("hourly", self.hourly_fields.clone()),
                ("timeformat", "iso8601".to_string()),
                ("forecast_days", self.forecast_days.to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::SourceRejected {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AppError::SourceTimeout(e.to_string())
            } else {
                AppError::MalformedPayload(format!("Response is not JSON: {}", e))
            }
        })?;

        validate_shape(&payload)?;

        Ok(RawPayload {
            location: location.name.clone(),
            fetched_at: Utc::now(),
            payload,
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::SourceTimeout(e.to_string())
    } else {
        AppError::SourceUnavailable(e.to_string())
    }
}

/// Checks the response carries an `hourly` object with a `time` array.
pub fn validate_shape(payload: &Value) -> Result<()> {
    let hourly = payload
        .get("hourly")
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::MalformedPayload("missing 'hourly' object".to_string()))?;

    if !hourly.get("time").map(Value::is_array).unwrap_or(false) {
        return Err(AppError::MalformedPayload(
            "missing 'hourly.time' array".to_string(),
        ));
    }

    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
