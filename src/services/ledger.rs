use chrono::NaiveDate;
use sqlx::{Pool, Postgres, Transaction};

use crate::error::{BookingError, BookingResult};
use crate::models::booking::status as booking_status;
use crate::models::order::status as order_status;
use crate::models::seat::status as seat_status;
use crate::models::{Booking, Order};

/// Writer for the booking ledger.
///
/// Every function here takes the caller's transaction, so ledger rows,
/// seat statuses and the order row commit or roll back as one unit.
/// The orchestrator owns the transaction boundaries.

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub async fn insert_order(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Option<i64>,
    show_date: NaiveDate,
    total_amount: f64,
    referrer_code: Option<&str>,
    commission_rate: Option<f64>,
) -> BookingResult<Order> {
    let order: Order = sqlx::query_as(
        r#"
        INSERT INTO orders (user_id, status, total_amount, referrer_code, commission_rate, show_date, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW() + interval '15 minutes')
        RETURNING id, user_id, status, total_amount::FLOAT8 as total_amount,
                  referrer_code, commission_rate, show_date, expires_at
        "#,
    )
    .bind(user_id)
    .bind(order_status::BOOKED)
    .bind(total_amount)
    .bind(referrer_code)
    .bind(commission_rate)
    .bind(show_date)
    .fetch_one(&mut **tx)
    .await?;

    Ok(order)
}

/// Inserts one ledger row per seat and flips the seats to match.
///
/// A unique-violation on the active-booking index means another
/// transaction won the race for one of the seats; it surfaces as
/// `SeatsUnavailable` (labels resolved by the caller, since the
/// transaction is already aborted at that point).
pub async fn insert_bookings(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    seat_ids: &[i64],
    show_date: NaiveDate,
    status: &str,
) -> BookingResult<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO bookings (seat_id, order_id, show_date, status)
        SELECT t.seat_id, $1, $2, $3
        FROM UNNEST($4::BIGINT[]) AS t(seat_id)
        "#,
    )
    .bind(order_id)
    .bind(show_date)
    .bind(status)
    .bind(seat_ids)
    .execute(&mut **tx)
    .await;

    if let Err(e) = result {
        if is_unique_violation(&e) {
            return Err(BookingError::SeatsUnavailable(Vec::new()));
        }
        return Err(e.into());
    }

    let seat_state = if status == booking_status::PAID {
        seat_status::PAID
    } else {
        seat_status::BOOKED
    };
    sqlx::query("UPDATE seats SET status = $1 WHERE id = ANY($2)")
        .bind(seat_state)
        .bind(seat_ids)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Cancels the order's active rows and reverts their seats. Returns
/// the freed seat ids so the caller can notify and invalidate caches.
pub async fn cancel_active_bookings(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
) -> BookingResult<Vec<i64>> {
    let freed: Vec<i64> = sqlx::query_scalar(
        r#"
        UPDATE bookings
        SET status = $1
        WHERE order_id = $2 AND status = ANY($3)
        RETURNING seat_id
        "#,
    )
    .bind(booking_status::CANCELLED)
    .bind(order_id)
    .bind(&booking_status::ACTIVE[..])
    .fetch_all(&mut **tx)
    .await?;

    if !freed.is_empty() {
        sqlx::query("UPDATE seats SET status = $1 WHERE id = ANY($2)")
            .bind(seat_status::AVAILABLE)
            .bind(&freed)
            .execute(&mut **tx)
            .await?;
    }

    Ok(freed)
}

/// Replaces the order's seats. Old active rows are cancelled and
/// their seats freed; replacement rows inherit the order's booking
/// status, so a seat change on a paid order produces paid rows.
pub async fn replace_seats(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
    new_seat_ids: &[i64],
) -> BookingResult<Vec<i64>> {
    let freed = cancel_active_bookings(tx, order.id).await?;

    let row_status = if order.status == order_status::PAID {
        booking_status::PAID
    } else {
        booking_status::BOOKED
    };
    insert_bookings(tx, order.id, new_seat_ids, order.show_date, row_status).await?;

    Ok(freed)
}

/// Payment confirmation: active ledger rows and their seats move to
/// paid together with the order row.
pub async fn mark_paid(tx: &mut Transaction<'_, Postgres>, order_id: i64) -> BookingResult<()> {
    let paid_seats: Vec<i64> = sqlx::query_scalar(
        r#"
        UPDATE bookings
        SET status = $1
        WHERE order_id = $2 AND status = ANY($3)
        RETURNING seat_id
        "#,
    )
    .bind(booking_status::PAID)
    .bind(order_id)
    .bind(&booking_status::ACTIVE[..])
    .fetch_all(&mut **tx)
    .await?;

    if !paid_seats.is_empty() {
        sqlx::query("UPDATE seats SET status = $1 WHERE id = ANY($2)")
            .bind(seat_status::PAID)
            .bind(&paid_seats)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

pub async fn update_order_status(
    tx: &mut Transaction<'_, Postgres>,
    order_id: i64,
    status: &str,
) -> BookingResult<Order> {
    let order: Option<Order> = sqlx::query_as(
        r#"
        UPDATE orders SET status = $1 WHERE id = $2
        RETURNING id, user_id, status, total_amount::FLOAT8 as total_amount,
                  referrer_code, commission_rate, show_date, expires_at
        "#,
    )
    .bind(status)
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await?;

    order.ok_or(BookingError::NotFound("order"))
}

pub async fn fetch_order(pool: &Pool<Postgres>, order_id: i64) -> BookingResult<Order> {
    let order: Option<Order> = sqlx::query_as(
        r#"
        SELECT id, user_id, status, total_amount::FLOAT8 as total_amount,
               referrer_code, commission_rate, show_date, expires_at
        FROM orders
        WHERE id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;

    order.ok_or(BookingError::NotFound("order"))
}

/// Active ledger rows currently held by the order.
pub async fn active_bookings(
    pool: &Pool<Postgres>,
    order_id: i64,
) -> BookingResult<Vec<Booking>> {
    let rows: Vec<Booking> = sqlx::query_as(
        r#"
        SELECT id, seat_id, order_id, show_date, status
        FROM bookings
        WHERE order_id = $1 AND status = ANY($2)
        ORDER BY seat_id
        "#,
    )
    .bind(order_id)
    .bind(&booking_status::ACTIVE[..])
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Zone ids touched by the given seats, for cache invalidation.
pub async fn zone_ids_for_seats(
    pool: &Pool<Postgres>,
    seat_ids: &[i64],
) -> BookingResult<Vec<i64>> {
    let zones: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT zone_id FROM seats WHERE id = ANY($1)",
    )
    .bind(seat_ids)
    .fetch_all(pool)
    .await?;
    Ok(zones)
}
