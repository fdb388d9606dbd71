use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;
use validator::Validate;

use crate::error::BookingError;
use crate::middleware::AuthUser;
use crate::services::orchestrator::CreateOrderRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders", get(get_user_orders))
        .route("/orders/{order_id}/seats", patch(change_seats))
        .route("/orders/{order_id}/cancel", patch(cancel_order))
        .route("/guard/stats", get(guard_stats))
}

/* ---------- ORDERS ---------- */

#[derive(Debug, Deserialize, Validate)]
struct CreateOrderBody {
    #[validate(length(min = 1, max = 10, message = "between 1 and 10 seats per order"))]
    seat_ids: Vec<i64>,
    show_date: NaiveDate,
    #[validate(length(min = 1, message = "ticket_type must not be empty"))]
    ticket_type: String,
    #[validate(range(min = 0.0, message = "total_amount must not be negative"))]
    total_amount: f64,
    referrer_code: Option<String>,
    commission_rate: Option<f64>,
}

// POST /api/orders
async fn create_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateOrderBody>,
) -> Result<impl IntoResponse, BookingError> {
    body.validate()
        .map_err(|e| BookingError::Validation(e.to_string()))?;

    let order = state
        .orders
        .create_order(
            user.actor(),
            CreateOrderRequest {
                ticket_type: body.ticket_type,
                show_date: body.show_date,
                seat_ids: body.seat_ids,
                total_amount: body.total_amount,
                referrer_code: body.referrer_code,
                commission_rate: body.commission_rate,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

// GET /api/orders
#[derive(Debug, Serialize)]
struct OrderSeat {
    id: i64,
    status: String,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    id: i64,
    status: String,
    show_date: NaiveDate,
    seats: Vec<OrderSeat>,
}

async fn get_user_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, BookingError> {
    let rows = sqlx::query(
        r#"
        SELECT o.id as oid, o.status as ostatus, o.show_date as show_date,
               b.seat_id as sid, b.status as bstatus
        FROM orders o
        LEFT JOIN bookings b ON b.order_id = o.id AND b.status <> 'cancelled'
        WHERE o.user_id = $1
        ORDER BY o.id DESC, b.seat_id
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.db.pool)
    .await?;

    use std::collections::BTreeMap;
    let mut map: BTreeMap<i64, OrderResponse> = BTreeMap::new();
    for r in rows {
        let oid: i64 = r.get("oid");
        let entry = map.entry(oid).or_insert_with(|| OrderResponse {
            id: oid,
            status: r.get("ostatus"),
            show_date: r.get("show_date"),
            seats: Vec::new(),
        });
        if let Ok(Some(sid)) = r.try_get::<Option<i64>, _>("sid") {
            entry.seats.push(OrderSeat {
                id: sid,
                status: r.get("bstatus"),
            });
        }
    }

    let orders: Vec<OrderResponse> = map.into_values().rev().collect();
    Ok((StatusCode::OK, Json(orders)))
}

// PATCH /api/orders/{order_id}/seats
#[derive(Debug, Deserialize, Validate)]
struct ChangeSeatsBody {
    #[validate(length(min = 1, max = 10, message = "between 1 and 10 seats per order"))]
    seat_ids: Vec<i64>,
}

async fn change_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<i64>,
    Json(body): Json<ChangeSeatsBody>,
) -> Result<impl IntoResponse, BookingError> {
    body.validate()
        .map_err(|e| BookingError::Validation(e.to_string()))?;

    let order = state
        .orders
        .change_seats(order_id, &body.seat_ids, user.actor())
        .await?;
    Ok((StatusCode::OK, Json(order)))
}

// PATCH /api/orders/{order_id}/cancel
async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<i64>,
) -> Result<impl IntoResponse, BookingError> {
    let order = state.orders.cancel_order(order_id, user.actor()).await?;
    Ok((StatusCode::OK, Json(order)))
}

/* ---------- OPERATIONAL ---------- */

// GET /api/guard/stats
async fn guard_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orders.guard().stats())
}
