use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::error::BookingError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/payment", post(payment_webhook))
}

/// POST /api/webhook/payment
///
/// Confirmation events from the external payment subsystem. A
/// confirmed payment drives the pending/booked → paid transition;
/// anything else is acknowledged and logged, never retried here.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let order_id = payload["orderId"].as_i64().unwrap_or_default();
    let status = payload["status"].as_str().unwrap_or_default().to_string();

    tracing::info!(order_id, status, "payment webhook received");

    if order_id <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"received": false, "message": "orderId must be > 0"})),
        );
    }

    match status.as_str() {
        "CONFIRMED" | "completed" => match state.orders.confirm_payment(order_id).await {
            Ok(_) => (StatusCode::OK, Json(json!({"received": true}))),
            Err(BookingError::NotFound(_)) => {
                tracing::warn!(order_id, "payment confirmation for unknown order");
                (StatusCode::OK, Json(json!({"received": true})))
            }
            Err(e) => {
                tracing::error!(order_id, "payment confirmation failed: {}", e);
                let status_code = e.status_code();
                (status_code, Json(json!({"received": false, "message": e.to_string()})))
            }
        },
        "CANCELLED" | "FAILED" | "REJECTED" => {
            // Failed payments leave the order booked; expiry cleanup is
            // the payment subsystem's and sweeper's concern.
            tracing::info!(order_id, status, "payment not completed");
            (StatusCode::OK, Json(json!({"received": true})))
        }
        other => {
            tracing::debug!(order_id, status = other, "unknown payment status ignored");
            (StatusCode::OK, Json(json!({"received": true})))
        }
    }
}
