//! Read-only HTTP surface over the readings, forecast and log tables, plus
//! the manual forecast trigger.
//!
//! Every `{line}` / `{sensor}` path segment is resolved through the sensor
//! range table before any SQL is built; unknown identifiers answer `400`.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use crate::error::PersistenceError;
use crate::forecast::ForecastBatchJob;
use crate::simulator::TemperatureSimulator;
use crate::store::PgStore;

mod forecast;
mod health;
mod logs;
mod readings;

// ---

#[derive(Clone)]
pub struct AppState {
    pub store: PgStore,
    pub job: Arc<ForecastBatchJob<PgStore>>,
    pub simulator: Option<Arc<TemperatureSimulator<PgStore>>>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(forecast::router())
        .merge(logs::router())
        .merge(health::router())
        .with_state(state)
}

/// `{"success": true, "data": ...}`
fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response()
}

/// Handler failure, rendered as `{"success": false, "error": ...}`.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Persistence(PersistenceError),
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Config(c) => Self::BadRequest(c.to_string()),
            other => Self::Persistence(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.to_string()),
            Self::Persistence(e) => {
                tracing::error!("Database request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database request failed".to_string())
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}
