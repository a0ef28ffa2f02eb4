use crate::models::Reading;
use serde::Serialize;

/// Timestamp layout expected by the sink's `time` column.
pub const SINK_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A reading normalised for insertion.
///
/// `risk_label` is stored under the sink's `risk_flag` column, timestamps
/// are fixed-format text and absent values serialise as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkRow {
    pub city: String,
    pub time: String,
    pub hour: i32,
    pub pm10: Option<f64>,
    pub pm2_5: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub uv_index: Option<f64>,
    pub aqi_category: String,
    pub severity_score: Option<f64>,
    pub risk_flag: String,
}

impl From<&Reading> for SinkRow {
    fn from(r: &Reading) -> Self {
        Self {
            city: r.city.clone(),
            time: r.time.format(SINK_TIME_FORMAT).to_string(),
            hour: r.hour as i32,
            pm10: r.pm10,
            pm2_5: r.pm2_5,
            nitrogen_dioxide: r.nitrogen_dioxide,
            sulphur_dioxide: r.sulphur_dioxide,
            ozone: r.ozone,
            carbon_monoxide: r.carbon_monoxide,
            uv_index: r.uv_index,
            aqi_category: r.aqi_category.to_string(),
            severity_score: r.severity_score,
            risk_flag: r.risk_label.to_string(),
        }
    }
}
