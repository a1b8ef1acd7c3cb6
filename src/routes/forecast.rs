use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use tracing::{debug, info};

use super::{ok, ApiError, AppState};
use crate::store::{EventKind, EventLog};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/forecasted-data/{line}", get(forecasted_data))
        .route("/api/forecast", post(trigger))
}

async fn forecasted_data(
    Path(line): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    // ---
    debug!("GET /api/forecasted-data/{}", line);
    let rows = state.store.forecasts(&line).await?;
    if rows.is_empty() {
        return Err(ApiError::NotFound("No forecasted data available"));
    }
    state
        .store
        .log_event(EventKind::Info, &format!("Forecasted data retrieved for {line}"))
        .await;
    Ok(ok(rows))
}

/// Run the forecast job to completion and report per-line outcomes.
async fn trigger(State(state): State<AppState>) -> Response {
    // ---
    info!("POST /api/forecast - regenerating forecasts");
    let report = state.job.generate_and_store_forecasts().await;
    ok(report)
}
