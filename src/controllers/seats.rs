use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::BookingError;
use crate::models::Zone;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/zones", get(get_zones))
        .route("/seats", get(get_seats))
}

// GET /api/zones
async fn get_zones(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, BookingError> {
    let zones: Vec<Zone> = sqlx::query_as(
        "SELECT id, name, row_count, col_count, active FROM zones WHERE active ORDER BY id",
    )
    .fetch_all(&state.db.pool)
    .await?;

    Ok((StatusCode::OK, Json(zones)))
}

#[derive(Debug, Deserialize)]
struct SeatsQuery {
    zone_id: i64,
    show_date: NaiveDate,
}

// GET /api/seats?zone_id=1&show_date=2025-08-20
//
// Cache-backed read of the zone's seat map with per-show-date
// statuses merged in from the booking ledger.
async fn get_seats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeatsQuery>,
) -> Result<impl IntoResponse, BookingError> {
    if params.zone_id <= 0 {
        return Err(BookingError::Validation("zone_id must be > 0".to_string()));
    }

    let seats = state.cache.get_seats(params.zone_id, params.show_date).await;
    if seats.is_empty() {
        // Distinguish an unknown zone from a zone with no seats.
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM zones WHERE id = $1)")
                .bind(params.zone_id)
                .fetch_one(&state.db.pool)
                .await?;
        if !exists {
            return Err(BookingError::NotFound("zone"));
        }
    }

    Ok((StatusCode::OK, Json(seats)))
}
