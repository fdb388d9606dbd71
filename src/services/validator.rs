use chrono::NaiveDate;
use sqlx::{Pool, Postgres, Row};

use crate::error::{BookingError, BookingResult};
use crate::models::booking::status as booking_status;

/// Read-only conflict check against the booking ledger.
///
/// Looks up active rows for the requested seats and show date; rows
/// owned by `exclude_order_id` are ignored so a seat change does not
/// conflict with the order being changed. This is read-then-decide,
/// not a lock: it must run after guard acquisition and immediately
/// before the ledger write. The partial unique index on bookings
/// closes the remaining window.
pub async fn validate(
    pool: &Pool<Postgres>,
    seat_ids: &[i64],
    show_date: NaiveDate,
    exclude_order_id: Option<i64>,
) -> BookingResult<()> {
    if seat_ids.is_empty() {
        return Err(BookingError::Validation(
            "at least one seat must be selected".to_string(),
        ));
    }

    let rows = sqlx::query(
        r#"
        SELECT s.seat_number, s."row", s.col
        FROM bookings b
        JOIN seats s ON s.id = b.seat_id
        WHERE b.seat_id = ANY($1)
          AND b.show_date = $2
          AND b.status = ANY($3)
          AND ($4::BIGINT IS NULL OR b.order_id <> $4)
        ORDER BY s."row", s.col
        "#,
    )
    .bind(seat_ids)
    .bind(show_date)
    .bind(&booking_status::ACTIVE[..])
    .bind(exclude_order_id)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(());
    }

    // Resolve conflicts to human-readable labels for the error.
    let taken: Vec<String> = rows
        .iter()
        .map(|r| {
            let number: Option<String> = r.get("seat_number");
            number.unwrap_or_else(|| {
                format!("r{}c{}", r.get::<i32, _>("row"), r.get::<i32, _>("col"))
            })
        })
        .collect();

    Err(BookingError::SeatsUnavailable(taken))
}

/// Confirms every requested seat id exists and sits in an active zone.
pub async fn ensure_seats_exist(
    pool: &Pool<Postgres>,
    seat_ids: &[i64],
) -> BookingResult<()> {
    let found: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM seats s
        JOIN zones z ON z.id = s.zone_id
        WHERE s.id = ANY($1) AND z.active
        "#,
    )
    .bind(seat_ids)
    .fetch_one(pool)
    .await?;

    if found as usize != seat_ids.len() {
        return Err(BookingError::NotFound("seat"));
    }
    Ok(())
}
