use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named venue section holding a grid of seats sold under one
/// configuration. Seats are owned by their zone; deleting a zone
/// cascades to its seats.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    pub row_count: i32,
    pub col_count: i32,
    pub active: bool,
}
