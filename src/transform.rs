use crate::error::{AppError, Result};
use crate::models::{severity_score, AqiCategory, Pollutant, RawPayload, Reading, RiskLabel, SeverityPolicy};
use crate::raw_store::RawStore;
use chrono::{NaiveDateTime, Timelike};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub payloads_seen: usize,
    pub payloads_skipped: usize,
    pub rows_seen: usize,
    pub rows_dropped: usize,
    pub rows_kept: usize,
}

impl TransformStats {
    fn absorb(&mut self, other: &TransformStats) {
        self.payloads_seen += other.payloads_seen;
        self.payloads_skipped += other.payloads_skipped;
        self.rows_seen += other.rows_seen;
        self.rows_dropped += other.rows_dropped;
        self.rows_kept += other.rows_kept;
    }
}

/// Flattens raw hourly series into feature-engineered readings.
///
/// Deterministic: the same payloads always produce the same readings, in the
/// same order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    policy: SeverityPolicy,
}

impl Transformer {
    pub fn new(policy: SeverityPolicy) -> Self {
        Self { policy }
    }

    /// Transform every artifact in the store. Unreadable or malformed
    /// artifacts are logged and skipped.
    pub fn transform_store(&self, store: &RawStore) -> Result<(Vec<Reading>, TransformStats)> {
        let handles = store.list_all()?;
        let mut payloads = Vec::with_capacity(handles.len());
        let mut unreadable = TransformStats::default();

        for handle in &handles {
            match store.load(handle) {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    error!("Skipping raw artifact {}: {}", handle.path.display(), e);
                    unreadable.payloads_seen += 1;
                    unreadable.payloads_skipped += 1;
                }
            }
        }

        let (readings, mut stats) = self.transform(&payloads);
        stats.absorb(&unreadable);
        Ok((readings, stats))
    }

    pub fn transform(&self, payloads: &[RawPayload]) -> (Vec<Reading>, TransformStats) {
        let mut readings = Vec::new();
        let mut stats = TransformStats::default();

        for payload in payloads {
            stats.payloads_seen += 1;

            match self.transform_payload(payload) {
                Ok((rows, seen)) => {
                    stats.rows_seen += seen;
                    stats.rows_dropped += seen - rows.len();
                    stats.rows_kept += rows.len();
                    debug!(
                        "{} @ {}: kept {}/{} rows",
                        payload.location,
                        payload.fetched_at,
                        rows.len(),
                        seen
                    );
                    readings.extend(rows);
                }
                Err(e) => {
                    stats.payloads_skipped += 1;
                    warn!(
                        "Skipping payload for {} fetched at {}: {}",
                        payload.location, payload.fetched_at, e
                    );
                }
            }
        }

        (readings, stats)
    }

    /// Returns the kept readings and the number of timestamps seen.
    ///
    /// A row with an unparseable timestamp is dropped on its own; the rest of
    /// the payload is kept.
    pub fn transform_payload(&self, payload: &RawPayload) -> Result<(Vec<Reading>, usize)> {
        let hourly = payload
            .payload
            .get("hourly")
            .and_then(Value::as_object)
            .ok_or_else(|| AppError::MalformedPayload("missing 'hourly' object".to_string()))?;

        let times = series(hourly, "time")?;
        let columns = Pollutant::ALL
            .iter()
            .map(|p| {
                let values = series(hourly, p.field())?;
                if values.len() != times.len() {
                    return Err(AppError::MalformedPayload(format!(
                        "series '{}' has {} values for {} timestamps",
                        p.field(),
                        values.len(),
                        times.len()
                    )));
                }
                Ok((*p, values))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut readings = Vec::with_capacity(times.len());
        for (idx, raw_time) in times.iter().enumerate() {
            let time = match parse_time(raw_time) {
                Ok(time) => time,
                Err(e) => {
                    warn!("{}: dropping row {}: {}", payload.location, idx, e);
                    continue;
                }
            };

            let mut reading = Reading {
                city: payload.location.clone(),
                time,
                hour: time.hour(),
                pm10: None,
                pm2_5: None,
                nitrogen_dioxide: None,
                sulphur_dioxide: None,
                ozone: None,
                carbon_monoxide: None,
                uv_index: None,
                aqi_category: AqiCategory::Unknown,
                severity_score: None,
                risk_label: RiskLabel::Unknown,
            };

            for (pollutant, values) in &columns {
                reading.set_value(*pollutant, coerce_numeric(&values[idx]));
            }

            if reading.all_core_absent() {
                continue;
            }

            reading.aqi_category = AqiCategory::from_pm2_5(reading.pm2_5);
            reading.severity_score = severity_score(&reading, self.policy);
            reading.risk_label = RiskLabel::from_severity(reading.severity_score);
            readings.push(reading);
        }

        Ok((readings, times.len()))
    }
}

fn series<'a>(hourly: &'a Map<String, Value>, field: &str) -> Result<&'a Vec<Value>> {
    hourly
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::MalformedPayload(format!("missing 'hourly.{}' series", field)))
}

/// Numbers and numeric strings become values; anything else is absent, never zero.
fn coerce_numeric(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

fn parse_time(value: &Value) -> Result<NaiveDateTime> {
    let s = value
        .as_str()
        .ok_or_else(|| AppError::MalformedPayload(format!("timestamp {} is not a string", value)))?;

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| AppError::MalformedPayload(format!("invalid timestamp '{}': {}", s, e)))
}
