use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub mod status {
    pub const PENDING: &str = "pending";
    pub const BOOKED: &str = "booked";
    pub const PAID: &str = "paid";
    pub const CANCELLED: &str = "cancelled";
    pub const PARTIAL: &str = "partial";
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: Option<i64>,
    pub status: String,
    pub total_amount: f64,
    pub referrer_code: Option<String>,
    pub commission_rate: Option<f64>,
    pub show_date: NaiveDate,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Forward-only order state machine.
///
/// pending/booked/partial may be paid or cancelled; paid is terminal
/// with respect to cancellation. Everything else is rejected outright.
pub fn can_transition(from: &str, to: &str) -> bool {
    match to {
        status::PAID => matches!(from, status::PENDING | status::BOOKED | status::PARTIAL),
        status::CANCELLED => matches!(
            from,
            status::PENDING | status::BOOKED | status::PARTIAL
        ),
        status::BOOKED => from == status::PENDING,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_booked_orders_can_be_paid() {
        assert!(can_transition(status::PENDING, status::PAID));
        assert!(can_transition(status::BOOKED, status::PAID));
    }

    #[test]
    fn paid_order_cannot_be_cancelled() {
        assert!(!can_transition(status::PAID, status::CANCELLED));
    }

    #[test]
    fn cancelled_is_terminal() {
        assert!(!can_transition(status::CANCELLED, status::PAID));
        assert!(!can_transition(status::CANCELLED, status::BOOKED));
        assert!(!can_transition(status::CANCELLED, status::CANCELLED));
    }

    #[test]
    fn no_backward_transitions() {
        assert!(!can_transition(status::PAID, status::PENDING));
        assert!(!can_transition(status::BOOKED, status::PENDING));
    }
}
