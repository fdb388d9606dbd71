use chrono::NaiveDate;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::database::Database;
use crate::models::booking::status as booking_status;
use crate::models::Seat;
use crate::redis_client::RedisClient;

const SEAT_CACHE_TTL_SECS: u64 = 60;

/// Read-side cache of a zone's seat map for one show date.
///
/// The authoritative per-date availability lives in the booking
/// ledger; this caches the joined view. Redis being unreachable
/// degrades to a direct database read, never to an error.
#[derive(Clone)]
pub struct SeatCache {
    redis: RedisClient,
    db: Database,
}

impl SeatCache {
    pub fn new(redis: RedisClient, db: Database) -> Self {
        SeatCache { redis, db }
    }

    /// Seats of a zone with their effective status for the show date:
    /// a seat is reported through its active ledger row if one exists,
    /// otherwise as available.
    pub async fn get_seats(&self, zone_id: i64, show_date: NaiveDate) -> Vec<Seat> {
        if let Some(seats) = self.read_cache(zone_id, show_date).await {
            return seats;
        }

        match self.load_seats_from_db(zone_id, show_date).await {
            Ok(seats) => {
                self.write_cache(zone_id, show_date, &seats).await;
                seats
            }
            Err(e) => {
                warn!(zone_id, "seat load failed: {:?}", e);
                vec![]
            }
        }
    }

    pub async fn invalidate_seats(&self, zone_id: i64, show_date: NaiveDate) {
        let key = cache_key(zone_id, show_date);
        let mut conn = self.redis.conn.clone();
        let result: Result<(), redis::RedisError> = conn.del(&key).await;
        if result.is_ok() {
            debug!(zone_id, %show_date, "seat cache invalidated");
        }
    }

    async fn load_seats_from_db(
        &self,
        zone_id: i64,
        show_date: NaiveDate,
    ) -> Result<Vec<Seat>, sqlx::Error> {
        sqlx::query_as::<_, Seat>(
            r#"
            SELECT s.id, s.zone_id, s."row", s.col, s.seat_number,
                   COALESCE(b.status, 'available') as status,
                   s.lock_expires_at
            FROM seats s
            LEFT JOIN bookings b
              ON b.seat_id = s.id
             AND b.show_date = $2
             AND b.status = ANY($3)
            WHERE s.zone_id = $1
            ORDER BY s."row", s.col
            "#,
        )
        .bind(zone_id)
        .bind(show_date)
        .bind(&booking_status::ACTIVE[..])
        .fetch_all(&self.db.pool)
        .await
    }

    async fn read_cache(&self, zone_id: i64, show_date: NaiveDate) -> Option<Vec<Seat>> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(cache_key(zone_id, show_date)).await.ok()?;
        serde_json::from_str(&data).ok()
    }

    async fn write_cache(&self, zone_id: i64, show_date: NaiveDate, seats: &[Seat]) {
        let Ok(data) = serde_json::to_string(seats) else {
            return;
        };
        let mut conn = self.redis.conn.clone();
        let result: Result<(), redis::RedisError> = conn
            .set_ex(cache_key(zone_id, show_date), data, SEAT_CACHE_TTL_SECS)
            .await;
        if let Err(e) = result {
            debug!(zone_id, "seat cache write skipped: {:?}", e);
        }
    }
}

fn cache_key(zone_id: i64, show_date: NaiveDate) -> String {
    format!("seats:{}:{}", zone_id, show_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_includes_zone_and_date() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 20).unwrap();
        assert_eq!(cache_key(7, date), "seats:7:2025-08-20");
    }
}
