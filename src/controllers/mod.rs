pub mod orders;
pub mod payment;
pub mod seats;
pub mod ws;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(orders::routes())
        .merge(seats::routes())
        .merge(payment::routes())
        .merge(ws::routes())
}
