use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub mod status {
    pub const BOOKED: &str = "booked";
    pub const CONFIRMED: &str = "confirmed";
    pub const PAID: &str = "paid";
    pub const CANCELLED: &str = "cancelled";
    pub const AVAILABLE: &str = "available";

    /// Statuses that occupy a (seat, show date) slot. At most one row
    /// in this set may exist per pair; the partial unique index on the
    /// bookings table enforces it at the store level.
    pub const ACTIVE: [&str; 3] = [BOOKED, CONFIRMED, PAID];
}

/// Ledger row linking a seat, a show date and an order.
///
/// The seat is a plain foreign key here. Call sites that need seat
/// details fetch them explicitly; the ledger row never drags the seat
/// along implicitly.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub seat_id: i64,
    pub order_id: i64,
    pub show_date: NaiveDate,
    pub status: String,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        status::ACTIVE.contains(&self.status.as_str())
    }
}
