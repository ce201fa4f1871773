use axum::{extract::State, http::StatusCode};

use crate::api_state::ApiState;

/// Ready when the backing store answers a trivial query.
pub async fn ready(State(state): State<ApiState>) -> StatusCode {
    match state.db.client.query("RETURN 1;").await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
