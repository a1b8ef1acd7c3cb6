use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::get,
    Router,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::debug;

use super::{ok, ApiError, AppState};
use crate::store::HistoryFilter;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/live-data/{line}", get(live_data))
        .route("/api/sensor-data/{line}/{sensor}", get(sensor_data))
        .route("/api/historical/{line}/{sensor}", get(historical))
}

/// Latest full row of a line.
async fn live_data(
    Path(line): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    // ---
    debug!("GET /api/live-data/{}", line);
    match state.store.latest_row(&line).await? {
        Some(row) => Ok(ok(row)),
        None => Err(ApiError::NotFound("No live data available")),
    }
}

/// Latest sample of one sensor.
async fn sensor_data(
    Path((line, sensor)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    // ---
    debug!("GET /api/sensor-data/{}/{}", line, sensor);
    let filter = HistoryFilter {
        length: Some(1),
        ..HistoryFilter::default()
    };
    match state.store.sensor_history(&line, &sensor, &filter).await?.pop() {
        Some(sample) => Ok(ok(sample)),
        None => Err(ApiError::NotFound("No data available for this sensor")),
    }
}

/// Query parameters for `/api/historical/{line}/{sensor}`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    length: Option<i64>,
    /// Calendar day, `YYYY-MM-DD`.
    date: Option<String>,
    /// Inclusive range bounds, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DDTHH:MM:SS`.
    start: Option<String>,
    end: Option<String>,
}

impl HistoryQuery {
    // ---
    fn to_filter(&self) -> Result<HistoryFilter, ApiError> {
        // ---
        let date = self
            .date
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| ApiError::BadRequest(format!("invalid date '{d}': {e}")))
            })
            .transpose()?;

        Ok(HistoryFilter {
            length: self.length,
            date,
            start: parse_bound("start", self.start.as_deref())?,
            end: parse_bound("end", self.end.as_deref())?,
        })
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<NaiveDateTime>, ApiError> {
    // ---
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map(Some)
        .map_err(|e| ApiError::BadRequest(format!("invalid {name} '{raw}': {e}")))
}

/// Newest-first history of one sensor.
async fn historical(
    Path((line, sensor)): Path<(String, String)>,
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    // ---
    debug!("GET /api/historical/{}/{} {:?}", line, sensor, params);
    let filter = params.to_filter()?;
    let samples = state.store.sensor_history(&line, &sensor, &filter).await?;
    Ok(ok(samples))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_history_query_parsing() {
        // ---
        let q = HistoryQuery {
            length: Some(10),
            date: Some("2025-04-07".into()),
            start: Some("2025-04-07 08:00:00".into()),
            end: Some("2025-04-07T09:30:00".into()),
        };
        let f = q.to_filter().unwrap();

        assert_eq!(f.length, Some(10));
        assert_eq!(f.date, NaiveDate::from_ymd_opt(2025, 4, 7));
        assert_eq!(f.start.unwrap().to_string(), "2025-04-07 08:00:00");
        assert_eq!(f.end.unwrap().to_string(), "2025-04-07 09:30:00");
    }

    #[test]
    fn test_empty_and_invalid_params() {
        // ---
        let empty = HistoryQuery {
            date: Some(String::new()),
            ..HistoryQuery::default()
        };
        let f = empty.to_filter().unwrap();
        assert!(f.date.is_none() && f.start.is_none() && f.end.is_none());

        let bad = HistoryQuery {
            start: Some("07/04/2025".into()),
            ..HistoryQuery::default()
        };
        assert!(matches!(bad.to_filter(), Err(ApiError::BadRequest(_))));
    }
}
