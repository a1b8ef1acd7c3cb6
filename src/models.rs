//! Data models for readings, snapshots and forecasts.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---

/// Timestamp rendering used for every row served over HTTP.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Configured operating bounds for one sensor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SensorRange {
    // ---
    #[serde(rename = "id")]
    pub sensor_id: String,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// One sensor's measurement, produced by the generator for a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    // ---
    pub sensor_id: String,
    pub value: f64,
}

/// One row of a line's readings table.
///
/// `readings` keep the line's configured sensor order, which is also the
/// column order of the insert.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSnapshot {
    // ---
    pub line_id: String,
    pub timestamp: NaiveDateTime,
    pub timezone: &'static str,
    pub readings: Vec<Reading>,
}

/// Point forecast with its interval, as returned by an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Prediction {
    // ---
    #[serde(rename = "yhat")]
    pub value: f64,
    #[serde(rename = "yhat_lower")]
    pub lower_bound: f64,
    #[serde(rename = "yhat_upper")]
    pub upper_bound: f64,
}

/// One stored row of a line's forecast table.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    // ---
    pub sensor_id: String,
    pub forecast_time: NaiveDateTime,
    pub forecast_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl ForecastPoint {
    // ---
    pub fn new(sensor_id: &str, at: NaiveDateTime, p: Prediction) -> Self {
        // ---
        ForecastPoint {
            sensor_id: sensor_id.to_string(),
            forecast_time: at,
            forecast_value: p.value,
            lower_bound: p.lower_bound,
            upper_bound: p.upper_bound,
        }
    }
}

/// Forecast row as served by `/api/forecasted-data/{line}`.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ForecastRow {
    // ---
    pub id: i32,
    pub sensor: String,
    #[serde(with = "display_timestamp")]
    pub forecast_time: NaiveDateTime,
    pub forecast_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Single-sensor sample as served by the historical and sensor endpoints.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SensorSample {
    // ---
    #[serde(with = "display_timestamp")]
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// Audit log entry from the `logs` table.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct LogEntry {
    // ---
    pub id: i32,
    #[serde(with = "display_timestamp")]
    pub timestamp: NaiveDateTime,
    pub level: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Serialize `NaiveDateTime` as `YYYY-MM-DD HH:MM:SS`.
pub mod display_timestamp {
    // ---
    use chrono::NaiveDateTime;
    use serde::Serializer;

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_prediction_reads_prophet_column_names() {
        // ---
        let p: Prediction =
            serde_json::from_str(r#"{"yhat": 130.5, "yhat_lower": 120.0, "yhat_upper": 141.25}"#)
                .unwrap();

        assert_eq!(p.value, 130.5);
        assert_eq!(p.lower_bound, 120.0);
        assert_eq!(p.upper_bound, 141.25);
    }

    #[test]
    fn test_forecast_point_carries_prediction() {
        // ---
        let p = Prediction {
            value: 1.0,
            lower_bound: 0.5,
            upper_bound: 1.5,
        };
        let point = ForecastPoint::new("r03", at(14, 28, 30), p);

        assert_eq!(point.sensor_id, "r03");
        assert_eq!(point.forecast_time, at(14, 28, 30));
        assert_eq!(point.forecast_value, 1.0);
        assert_eq!(point.lower_bound, 0.5);
        assert_eq!(point.upper_bound, 1.5);
    }

    #[test]
    fn test_samples_render_second_precision_timestamps() {
        // ---
        let sample = SensorSample {
            timestamp: at(9, 5, 7),
            value: 129.3,
        };
        let json = serde_json::to_value(&sample).unwrap();

        assert_eq!(json["timestamp"], "2025-04-07 09:05:07");
        assert_eq!(json["value"], 129.3);
    }

    #[test]
    fn test_log_entry_uses_type_key() {
        // ---
        let entry = LogEntry {
            id: 1,
            timestamp: at(0, 0, 0),
            level: "admin".to_string(),
            kind: "INFO".to_string(),
            message: "Temperature simulation started".to_string(),
        };
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["type"], "INFO");
        assert_eq!(json["timestamp"], "2025-04-07 00:00:00");
    }
}
