use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Duration;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{empty_success, success};

#[derive(Deserialize)]
pub struct HoldRequest {
    pub showtime_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    /// Overrides the configured default hold length.
    #[serde(default)]
    pub hold_seconds: Option<i64>,
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    pub session: Uuid,
    pub seat_ids: Vec<Uuid>,
}

pub async fn hold_seats(
    State(state): State<AppState>,
    Json(request): Json<HoldRequest>,
) -> Result<Response, AppError> {
    let duration = request.hold_seconds.map(Duration::seconds);
    let result = state
        .holds
        .hold(request.showtime_id, &request.seat_ids, duration)
        .await?;
    Ok(success(result, "Seats held").into_response())
}

pub async fn release_seats(
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Response, AppError> {
    state
        .holds
        .release(request.session, &request.seat_ids)
        .await?;
    Ok(empty_success("Seats released").into_response())
}
