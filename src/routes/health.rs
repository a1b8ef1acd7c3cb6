// src/routes/health.rs
//! Liveness endpoint for the linewatch backend.
//!
//! Used by container orchestrators and CI to check that the service answers
//! HTTP requests. It also reports whether the background simulator task is
//! still alive, without touching the database.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    simulator: &'static str,
}

/// Handle `GET /health`.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // ---
    let simulator = match &state.simulator {
        None => "disabled",
        Some(sim) if sim.is_running() => "running",
        Some(_) => "stopped",
    };
    Json(HealthResponse {
        status: "ok",
        simulator,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
