use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub mod status {
    pub const AVAILABLE: &str = "available";
    pub const BOOKED: &str = "booked";
    pub const PAID: &str = "paid";
    pub const LOCKED: &str = "locked";
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub zone_id: i64,
    pub row: i32,
    pub col: i32,
    /// Printed seat number, if the zone uses one.
    pub seat_number: Option<String>,
    pub status: String,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl Seat {
    /// Human-readable label for conflict messages: the printed number
    /// when present, otherwise the grid position.
    pub fn label(&self) -> String {
        match &self.seat_number {
            Some(n) => n.clone(),
            None => format!("r{}c{}", self.row, self.col),
        }
    }
}
