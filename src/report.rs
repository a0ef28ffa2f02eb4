//! Read-only aggregation over staged readings.

use crate::error::Result;
use crate::models::{Reading, RiskLabel};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SUMMARY_FILE: &str = "summary_metrics.csv";
pub const DISTRIBUTION_FILE: &str = "city_risk_distribution.csv";
pub const TRENDS_FILE: &str = "pollution_trends.csv";

const DISTRIBUTION_COLUMNS: [&str; 3] = ["city", "risk_flag", "count"];
const TREND_COLUMNS: [&str; 5] = ["city", "time", "pm2_5", "pm10", "ozone"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kpis {
    pub highest_avg_pm2_5: Option<(String, f64)>,
    pub highest_severity: Option<(String, f64)>,
    pub worst_hour: Option<(u32, f64)>,
    /// Share of readings per risk label, in percent.
    pub risk_breakdown: Vec<(RiskLabel, f64)>,
}

#[derive(Debug, Serialize)]
struct MetricRow {
    metric: String,
    value: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DistributionRow {
    pub city: String,
    pub risk_flag: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
struct TrendRow<'a> {
    city: &'a str,
    time: NaiveDateTime,
    pm2_5: Option<f64>,
    pm10: Option<f64>,
    ozone: Option<f64>,
}

#[derive(Debug, Default)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.n += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

/// Pick the entry with the largest value; ties keep the first in key order.
fn max_by_value<K>(entries: impl Iterator<Item = (K, Option<f64>)>) -> Option<(K, f64)> {
    entries.fold(None, |best: Option<(K, f64)>, (key, value)| {
        let Some(v) = value else {
            return best;
        };
        match best {
            Some((_, b)) if b >= v => best,
            _ => Some((key, v)),
        }
    })
}

pub fn compute_kpis(readings: &[Reading]) -> Kpis {
    let mut by_city: BTreeMap<&str, Mean> = BTreeMap::new();
    let mut by_hour: BTreeMap<u32, Mean> = BTreeMap::new();
    let mut by_risk: BTreeMap<RiskLabel, usize> = BTreeMap::new();

    for r in readings {
        by_city.entry(r.city.as_str()).or_default().push(r.pm2_5);
        by_hour.entry(r.hour).or_default().push(r.pm2_5);
        *by_risk.entry(r.risk_label).or_default() += 1;
    }

    let highest_avg_pm2_5 = max_by_value(by_city.iter().map(|(city, m)| (city.to_string(), m.value())));
    let worst_hour = max_by_value(by_hour.iter().map(|(hour, m)| (*hour, m.value())));
    let highest_severity = max_by_value(readings.iter().map(|r| (r.city.clone(), r.severity_score)));

    let total = readings.len() as f64;
    let risk_breakdown = by_risk
        .into_iter()
        .map(|(label, count)| (label, count as f64 * 100.0 / total))
        .collect();

    Kpis {
        highest_avg_pm2_5,
        highest_severity,
        worst_hour,
        risk_breakdown,
    }
}

pub fn city_risk_distribution(readings: &[Reading]) -> Vec<DistributionRow> {
    let mut counts: BTreeMap<(&str, RiskLabel), usize> = BTreeMap::new();
    for r in readings {
        *counts.entry((r.city.as_str(), r.risk_label)).or_default() += 1;
    }

    counts
        .into_iter()
        .map(|((city, label), count)| DistributionRow {
            city: city.to_string(),
            risk_flag: label.to_string(),
            count,
        })
        .collect()
}

/// Write the three report CSVs into `dir`; returns the paths written.
pub fn write_reports(dir: &Path, readings: &[Reading]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let kpis = compute_kpis(readings);
    log_kpis(&kpis);

    let summary_path = dir.join(SUMMARY_FILE);
    let mut writer = csv::Writer::from_path(&summary_path)?;
    for row in metric_rows(&kpis) {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let distribution_path = dir.join(DISTRIBUTION_FILE);
    let mut writer = csv::Writer::from_path(&distribution_path)?;
    if readings.is_empty() {
        writer.write_record(DISTRIBUTION_COLUMNS)?;
    }
    for row in city_risk_distribution(readings) {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let trends_path = dir.join(TRENDS_FILE);
    let mut writer = csv::Writer::from_path(&trends_path)?;
    if readings.is_empty() {
        writer.write_record(TREND_COLUMNS)?;
    }
    for r in readings {
        writer.serialize(TrendRow {
            city: &r.city,
            time: r.time,
            pm2_5: r.pm2_5,
            pm10: r.pm10,
            ozone: r.ozone,
        })?;
    }
    writer.flush()?;

    info!("Reports written to {}", dir.display());
    Ok(vec![summary_path, distribution_path, trends_path])
}

fn metric_rows(kpis: &Kpis) -> Vec<MetricRow> {
    let mut rows = Vec::new();
    let or_na = |v: Option<String>| v.unwrap_or_else(|| "n/a".to_string());

    rows.push(MetricRow {
        metric: "Highest Avg PM2.5".to_string(),
        value: or_na(
            kpis.highest_avg_pm2_5
                .as_ref()
                .map(|(city, v)| format!("{} ({:.2})", city, v)),
        ),
    });
    rows.push(MetricRow {
        metric: "Highest Severity".to_string(),
        value: or_na(
            kpis.highest_severity
                .as_ref()
                .map(|(city, v)| format!("{} ({:.2})", city, v)),
        ),
    });
    rows.push(MetricRow {
        metric: "Worst Hour".to_string(),
        value: or_na(kpis.worst_hour.map(|(hour, _)| format!("{}:00", hour))),
    });
    for (label, pct) in &kpis.risk_breakdown {
        rows.push(MetricRow {
            metric: format!("Share {}", label),
            value: format!("{:.2}%", pct),
        });
    }

    rows
}

fn log_kpis(kpis: &Kpis) {
    if let Some((city, v)) = &kpis.highest_avg_pm2_5 {
        info!("Highest avg PM2.5: {} ({:.2})", city, v);
    }
    if let Some((city, v)) = &kpis.highest_severity {
        info!("Highest severity: {} ({:.2})", city, v);
    }
    if let Some((hour, _)) = kpis.worst_hour {
        info!("Worst AQI hour: {}:00", hour);
    }
    for (label, pct) in &kpis.risk_breakdown {
        info!("Risk share {}: {:.2}%", label, pct);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AqiCategory;
    use chrono::NaiveDate;

    fn reading(city: &str, hour: u32, pm2_5: Option<f64>, severity: Option<f64>) -> Reading {
        Reading {
            city: city.to_string(),
            time: NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            hour,
            pm10: None,
            pm2_5,
            nitrogen_dioxide: None,
            sulphur_dioxide: None,
            ozone: None,
            carbon_monoxide: None,
            uv_index: None,
            aqi_category: AqiCategory::from_pm2_5(pm2_5),
            severity_score: severity,
            risk_label: RiskLabel::from_severity(severity),
        }
    }

    fn sample() -> Vec<Reading> {
        vec![
            reading("Delhi", 0, Some(200.0), Some(900.0)),
            reading("Delhi", 1, Some(100.0), Some(300.0)),
            reading("Mumbai", 0, Some(40.0), Some(150.0)),
            reading("Mumbai", 1, None, None),
        ]
    }

    #[test]
    fn test_kpis() {
        let kpis = compute_kpis(&sample());
        assert_eq!(kpis.highest_avg_pm2_5, Some(("Delhi".to_string(), 150.0)));
        assert_eq!(kpis.highest_severity, Some(("Delhi".to_string(), 900.0)));
        assert_eq!(kpis.worst_hour, Some((0, 120.0)));
        assert_eq!(
            kpis.risk_breakdown,
            vec![
                (RiskLabel::Low, 25.0),
                (RiskLabel::Moderate, 25.0),
                (RiskLabel::High, 25.0),
                (RiskLabel::Unknown, 25.0),
            ]
        );
    }

    #[test]
    fn test_kpis_on_empty_input() {
        let kpis = compute_kpis(&[]);
        assert_eq!(kpis, Kpis::default());
    }

    #[test]
    fn test_city_risk_distribution_sorted() {
        let rows = city_risk_distribution(&sample());
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0],
            DistributionRow {
                city: "Delhi".to_string(),
                risk_flag: "Moderate Risk".to_string(),
                count: 1,
            }
        );
        assert_eq!(rows[3].risk_flag, "Unknown");
    }

    #[test]
    fn test_write_reports_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_reports(dir.path(), &sample()).unwrap();
        assert_eq!(paths.len(), 3);

        let summary = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert!(summary.starts_with("metric,value\n"));
        assert!(summary.contains("Highest Avg PM2.5,Delhi (150.00)"));
        assert!(summary.contains("Worst Hour,0:00"));

        let trends = std::fs::read_to_string(dir.path().join(TRENDS_FILE)).unwrap();
        assert_eq!(trends.lines().next().unwrap(), "city,time,pm2_5,pm10,ozone");
        assert_eq!(trends.lines().count(), 5);

        let distribution = std::fs::read_to_string(dir.path().join(DISTRIBUTION_FILE)).unwrap();
        assert_eq!(distribution.lines().next().unwrap(), DISTRIBUTION_COLUMNS.join(","));
    }

    #[test]
    fn test_write_reports_without_readings_keeps_headers() {
        let dir = tempfile::tempdir().unwrap();
        write_reports(dir.path(), &[]).unwrap();

        let distribution = std::fs::read_to_string(dir.path().join(DISTRIBUTION_FILE)).unwrap();
        assert_eq!(distribution, "city,risk_flag,count\n");

        let trends = std::fs::read_to_string(dir.path().join(TRENDS_FILE)).unwrap();
        assert_eq!(trends, "city,time,pm2_5,pm10,ozone\n");

        let summary = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert!(summary.contains("Highest Avg PM2.5,n/a"));
    }
}
