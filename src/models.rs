use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monitored city with fixed coordinates.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
        }
    }

    /// Lowercase, underscore-separated form used in artifact file names.
    pub fn slug(&self) -> String {
        self.name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

/// Unmodified API response for one location and one fetch.
///
/// The location name travels with the payload so downstream stages never
/// have to recover it from storage naming.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawPayload {
    pub location: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm10,
    Pm2_5,
    CarbonMonoxide,
    NitrogenDioxide,
    Ozone,
    SulphurDioxide,
    UvIndex,
}

impl Pollutant {
    pub const ALL: [Pollutant; 7] = [
        Pollutant::Pm10,
        Pollutant::Pm2_5,
        Pollutant::CarbonMonoxide,
        Pollutant::NitrogenDioxide,
        Pollutant::Ozone,
        Pollutant::SulphurDioxide,
        Pollutant::UvIndex,
    ];

    /// The six pollutants that carry signal and feed the severity score.
    pub const CORE: [Pollutant; 6] = [
        Pollutant::Pm10,
        Pollutant::Pm2_5,
        Pollutant::CarbonMonoxide,
        Pollutant::NitrogenDioxide,
        Pollutant::Ozone,
        Pollutant::SulphurDioxide,
    ];

    /// Field name used by the source API and the staged schema.
    pub fn field(&self) -> &'static str {
        match self {
            Pollutant::Pm10 => "pm10",
            Pollutant::Pm2_5 => "pm2_5",
            Pollutant::CarbonMonoxide => "carbon_monoxide",
            Pollutant::NitrogenDioxide => "nitrogen_dioxide",
            Pollutant::Ozone => "ozone",
            Pollutant::SulphurDioxide => "sulphur_dioxide",
            Pollutant::UvIndex => "uv_index",
        }
    }

    pub fn severity_weight(&self) -> f64 {
        match self {
            Pollutant::Pm2_5 => 5.0,
            Pollutant::Pm10 => 3.0,
            Pollutant::NitrogenDioxide => 4.0,
            Pollutant::SulphurDioxide => 4.0,
            Pollutant::CarbonMonoxide => 2.0,
            Pollutant::Ozone => 3.0,
            Pollutant::UvIndex => 0.0,
        }
    }
}

/// AQI band derived from pm2.5 alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
    Hazardous,
    Unknown,
}

impl AqiCategory {
    pub fn from_pm2_5(pm2_5: Option<f64>) -> Self {
        match pm2_5 {
            None => AqiCategory::Unknown,
            Some(v) if v.is_nan() => AqiCategory::Unknown,
            Some(v) if v <= 50.0 => AqiCategory::Good,
            Some(v) if v <= 100.0 => AqiCategory::Moderate,
            Some(v) if v <= 200.0 => AqiCategory::Unhealthy,
            Some(v) if v <= 300.0 => AqiCategory::VeryUnhealthy,
            Some(_) => AqiCategory::Hazardous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
            AqiCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum RiskLabel {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Moderate Risk")]
    Moderate,
    #[serde(rename = "High Risk")]
    High,
    Unknown,
}

impl RiskLabel {
    const HIGH_THRESHOLD: f64 = 400.0;
    const MODERATE_THRESHOLD: f64 = 200.0;

    pub fn from_severity(score: Option<f64>) -> Self {
        match score {
            None => RiskLabel::Unknown,
            Some(s) if s.is_nan() => RiskLabel::Unknown,
            Some(s) if s > Self::HIGH_THRESHOLD => RiskLabel::High,
            Some(s) if s > Self::MODERATE_THRESHOLD => RiskLabel::Moderate,
            Some(_) => RiskLabel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Low => "Low Risk",
            RiskLabel::Moderate => "Moderate Risk",
            RiskLabel::High => "High Risk",
            RiskLabel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the severity score treats absent pollutants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityPolicy {
    /// The score is absent if any contributing pollutant is absent.
    #[default]
    Strict,
    /// Absent pollutants contribute zero.
    ZeroFill,
}

/// One location/timestamp row. Field order is the staged CSV column order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Reading {
    pub city: String,
    pub time: NaiveDateTime,
    pub hour: u32,
    pub pm10: Option<f64>,
    pub pm2_5: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub uv_index: Option<f64>,
    pub aqi_category: AqiCategory,
    pub severity_score: Option<f64>,
    pub risk_label: RiskLabel,
}

impl Reading {
    pub fn value(&self, pollutant: Pollutant) -> Option<f64> {
        match pollutant {
            Pollutant::Pm10 => self.pm10,
            Pollutant::Pm2_5 => self.pm2_5,
            Pollutant::CarbonMonoxide => self.carbon_monoxide,
            Pollutant::NitrogenDioxide => self.nitrogen_dioxide,
            Pollutant::Ozone => self.ozone,
            Pollutant::SulphurDioxide => self.sulphur_dioxide,
            Pollutant::UvIndex => self.uv_index,
        }
    }

    pub fn set_value(&mut self, pollutant: Pollutant, value: Option<f64>) {
        let slot = match pollutant {
            Pollutant::Pm10 => &mut self.pm10,
            Pollutant::Pm2_5 => &mut self.pm2_5,
            Pollutant::CarbonMonoxide => &mut self.carbon_monoxide,
            Pollutant::NitrogenDioxide => &mut self.nitrogen_dioxide,
            Pollutant::Ozone => &mut self.ozone,
            Pollutant::SulphurDioxide => &mut self.sulphur_dioxide,
            Pollutant::UvIndex => &mut self.uv_index,
        };
        *slot = value;
    }

    pub fn all_core_absent(&self) -> bool {
        Pollutant::CORE.iter().all(|p| self.value(*p).is_none())
    }
}

pub fn severity_score(reading: &Reading, policy: SeverityPolicy) -> Option<f64> {
    let mut total = 0.0;
    for pollutant in Pollutant::CORE {
        match (reading.value(pollutant), policy) {
            (Some(v), _) => total += v * pollutant.severity_weight(),
            (None, SeverityPolicy::ZeroFill) => {}
            (None, SeverityPolicy::Strict) => return None,
        }
    }
    Some(total)
}
