//! The staged artifact: one CSV row per transformed reading.
//!
//! Columns follow [`Reading`]'s field order (see [`STAGED_COLUMNS`]).
//! Absent values are empty cells. The header is always present, even when
//! no readings survived the transform.

use crate::error::{AppError, Result};
use crate::models::Reading;
use std::path::Path;
use tracing::info;

pub const STAGED_COLUMNS: [&str; 13] = [
    "city",
    "time",
    "hour",
    "pm10",
    "pm2_5",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "ozone",
    "carbon_monoxide",
    "uv_index",
    "aqi_category",
    "severity_score",
    "risk_label",
];

/// Write readings to `path`, replacing any previous staged file.
///
/// The file is written next to its destination and renamed into place so a
/// crash never leaves a half-written artifact behind.
pub fn write_readings(path: &Path, readings: &[Reading]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        // serde only emits the header alongside the first record
        if readings.is_empty() {
            writer.write_record(STAGED_COLUMNS)?;
        }
        for reading in readings {
            writer.serialize(reading)?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;

    info!("Staged {} readings to {}", readings.len(), path.display());
    Ok(readings.len())
}

pub fn read_readings(path: &Path) -> Result<Vec<Reading>> {
    if !path.exists() {
        return Err(AppError::InputMissing(format!(
            "staged file not found: {}",
            path.display()
        )));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let readings = reader
        .deserialize::<Reading>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(readings)
}
