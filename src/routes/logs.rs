use axum::{
    extract::{Query, State},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use super::{ok, ApiError, AppState};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/logs", get(recent_logs))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<i64>,
}

async fn recent_logs(
    Query(params): Query<LogsQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    // ---
    let entries = state.store.recent_logs(params.limit.unwrap_or(100)).await?;
    Ok(ok(entries))
}
