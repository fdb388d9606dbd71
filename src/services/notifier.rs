use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Seat and order state events pushed to subscribed clients.
///
/// Delivery is at-most-once with no acknowledgement: a client that
/// misses an event re-fetches state instead of the notifier retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    SeatLocked {
        seat_id: i64,
        zone: Option<String>,
        show_date: NaiveDate,
    },
    SeatUnlocked {
        seat_id: i64,
        zone: Option<String>,
        show_date: NaiveDate,
    },
    OrderCreated {
        order_id: i64,
        show_date: NaiveDate,
        seat_ids: Vec<i64>,
    },
    OrderUpdated {
        order_id: i64,
        status: String,
        show_date: NaiveDate,
    },
    OrderCancelled {
        order_id: i64,
        show_date: NaiveDate,
        seat_ids: Vec<i64>,
    },
    SeatAvailabilityChanged {
        show_date: NaiveDate,
        seat_ids: Vec<i64>,
    },
    ConcurrencyError {
        show_date: NaiveDate,
        message: String,
    },
}

const CHANNEL_CAPACITY: usize = 256;

/// Best-effort broadcaster with one channel per show date.
///
/// Publishing is fire-and-forget: `broadcast::Sender::send` never
/// waits, slow subscribers lag and drop messages, and a topic with no
/// subscribers discards the event. Nothing here can stall the order
/// write path.
pub struct Notifier {
    channels: Mutex<HashMap<NaiveDate, broadcast::Sender<BookingEvent>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, show_date: NaiveDate) -> broadcast::Receiver<BookingEvent> {
        let mut channels = self.lock_channels();
        channels
            .entry(show_date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, show_date: NaiveDate, event: BookingEvent) {
        let mut channels = self.lock_channels();
        let dead = match channels.get(&show_date) {
            Some(sender) => sender.send(event).is_err(),
            None => {
                debug!(%show_date, "event dropped, no subscribers for show date");
                false
            }
        };
        if dead {
            // Last subscriber left; drop the idle channel.
            channels.remove(&show_date);
        }
    }

    /// Publishes a seat lock/unlock event enriched with the zone name.
    /// Enrichment is read-only and best-effort: a failed lookup
    /// downgrades to an event without the zone rather than an error.
    pub async fn publish_seat_event(
        &self,
        pool: &Pool<Postgres>,
        seat_id: i64,
        show_date: NaiveDate,
        locked: bool,
    ) {
        let zone = self.zone_name(pool, seat_id).await;
        let event = if locked {
            BookingEvent::SeatLocked {
                seat_id,
                zone,
                show_date,
            }
        } else {
            BookingEvent::SeatUnlocked {
                seat_id,
                zone,
                show_date,
            }
        };
        self.publish(show_date, event);
    }

    pub fn subscriber_count(&self, show_date: NaiveDate) -> usize {
        let channels = self.lock_channels();
        channels
            .get(&show_date)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    async fn zone_name(&self, pool: &Pool<Postgres>, seat_id: i64) -> Option<String> {
        let result: Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
            "SELECT z.name FROM seats s JOIN zones z ON z.id = s.zone_id WHERE s.id = $1",
        )
        .bind(seat_id)
        .fetch_optional(pool)
        .await;

        match result {
            Ok(name) => name,
            Err(e) => {
                warn!(seat_id, "zone enrichment lookup failed: {:?}", e);
                None
            }
        }
    }

    fn lock_channels(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<NaiveDate, broadcast::Sender<BookingEvent>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, day).unwrap()
    }

    #[tokio::test]
    async fn subscriber_receives_events_for_its_show_date() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe(date(20));

        notifier.publish(
            date(20),
            BookingEvent::OrderCreated {
                order_id: 1,
                show_date: date(20),
                seat_ids: vec![1, 2],
            },
        );

        match rx.recv().await.unwrap() {
            BookingEvent::OrderCreated { order_id, .. } => assert_eq!(order_id, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn events_are_scoped_to_their_topic() {
        let notifier = Notifier::new();
        let mut rx_a = notifier.subscribe(date(20));
        let _rx_b = notifier.subscribe(date(21));

        notifier.publish(
            date(21),
            BookingEvent::SeatAvailabilityChanged {
                show_date: date(21),
                seat_ids: vec![7],
            },
        );
        notifier.publish(
            date(20),
            BookingEvent::SeatAvailabilityChanged {
                show_date: date(20),
                seat_ids: vec![3],
            },
        );

        // The date-20 subscriber sees only the date-20 event.
        match rx_a.recv().await.unwrap() {
            BookingEvent::SeatAvailabilityChanged { seat_ids, .. } => {
                assert_eq!(seat_ids, vec![3]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let notifier = Notifier::new();
        notifier.publish(
            date(20),
            BookingEvent::ConcurrencyError {
                show_date: date(20),
                message: "duplicate".to_string(),
            },
        );
        assert_eq!(notifier.subscriber_count(date(20)), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_cleans_up_its_channel() {
        let notifier = Notifier::new();
        let rx = notifier.subscribe(date(20));
        drop(rx);

        // First publish after the last receiver left removes the channel.
        notifier.publish(
            date(20),
            BookingEvent::SeatAvailabilityChanged {
                show_date: date(20),
                seat_ids: vec![],
            },
        );
        assert_eq!(notifier.subscriber_count(date(20)), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe(date(20));

        // Overrun the channel capacity without ever awaiting the receiver.
        for i in 0..(CHANNEL_CAPACITY + 10) {
            notifier.publish(
                date(20),
                BookingEvent::SeatAvailabilityChanged {
                    show_date: date(20),
                    seat_ids: vec![i as i64],
                },
            );
        }

        // Oldest messages were dropped; the receiver reports the lag.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed >= 10),
            other => panic!("expected lag, got {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_snake_case_type_tag() {
        let event = BookingEvent::SeatLocked {
            seat_id: 5,
            zone: Some("Balcony".to_string()),
            show_date: date(20),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "seat_locked");
        assert_eq!(json["zone"], "Balcony");
    }
}
