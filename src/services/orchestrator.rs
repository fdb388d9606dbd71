use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::SeatCache;
use crate::database::Database;
use crate::error::{BookingError, BookingResult};
use crate::models::booking::status as booking_status;
use crate::models::order::{can_transition, status as order_status};
use crate::models::Order;
use crate::services::audit::AuditLog;
use crate::services::guard::{OrderGuard, OrderSignature};
use crate::services::ledger;
use crate::services::notifier::{BookingEvent, Notifier};
use crate::services::validator;

/// Identity acting on an order, resolved by the auth seam.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: i64,
    pub admin: bool,
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub ticket_type: String,
    pub show_date: NaiveDate,
    pub seat_ids: Vec<i64>,
    pub total_amount: f64,
    pub referrer_code: Option<String>,
    pub commission_rate: Option<f64>,
}

/// Owns the order state machine and sequences every transition as
/// guard → validate → write ledger + order → notify → release.
///
/// The guard lease releases on drop, so an early `?` return after
/// acquisition cannot leak a lock. Notifications and audit rows run on
/// their own tasks and never hold up the write path.
pub struct OrderService {
    db: Database,
    guard: Arc<OrderGuard>,
    notifier: Arc<Notifier>,
    audit: AuditLog,
    cache: SeatCache,
}

impl OrderService {
    pub fn new(
        db: Database,
        guard: Arc<OrderGuard>,
        notifier: Arc<Notifier>,
        audit: AuditLog,
        cache: SeatCache,
    ) -> Self {
        OrderService {
            db,
            guard,
            notifier,
            audit,
            cache,
        }
    }

    pub fn guard(&self) -> &Arc<OrderGuard> {
        &self.guard
    }

    pub async fn create_order(
        &self,
        actor: Actor,
        req: CreateOrderRequest,
    ) -> BookingResult<Order> {
        let seat_ids = normalized_seat_ids(&req.seat_ids)?;
        validator::ensure_seats_exist(&self.db.pool, &seat_ids).await?;

        let signature = OrderSignature::for_seats(
            actor.user_id,
            &req.ticket_type,
            req.show_date,
            &seat_ids,
        );
        let lease = self.acquire_or_report(actor.user_id, &signature, req.show_date)?;

        validator::validate(&self.db.pool, &seat_ids, req.show_date, None).await?;

        let mut tx = self.db.begin_tx().await?;
        let order = ledger::insert_order(
            &mut tx,
            Some(actor.user_id),
            req.show_date,
            req.total_amount,
            req.referrer_code.as_deref(),
            req.commission_rate,
        )
        .await?;

        if let Err(e) =
            ledger::insert_bookings(
                &mut tx,
                order.id,
                &seat_ids,
                req.show_date,
                booking_status::BOOKED,
            )
            .await
        {
            drop(tx);
            return Err(self.resolve_seat_conflict(e, &seat_ids, req.show_date, None).await);
        }
        tx.commit().await?;

        info!(
            order_id = order.id,
            user_id = actor.user_id,
            seats = seat_ids.len(),
            "order created"
        );

        self.audit.record(
            "order.create",
            "order",
            order.id,
            Some(actor.user_id),
            None,
            serde_json::to_value(&order).ok(),
        );
        self.invalidate_zones(&seat_ids, req.show_date).await;
        self.notify_seats(&seat_ids, req.show_date, true);
        self.spawn_publish(
            req.show_date,
            BookingEvent::OrderCreated {
                order_id: order.id,
                show_date: req.show_date,
                seat_ids: seat_ids.clone(),
            },
        );

        lease.release();
        Ok(order)
    }

    pub async fn change_seats(
        &self,
        order_id: i64,
        new_seat_ids: &[i64],
        actor: Actor,
    ) -> BookingResult<Order> {
        let order = self.load_owned_order(order_id, actor).await?;
        let seat_ids = normalized_seat_ids(new_seat_ids)?;

        if order.status == order_status::CANCELLED {
            return Err(BookingError::InvariantViolation(
                "cannot change seats on a cancelled order".to_string(),
            ));
        }
        let current = ledger::active_bookings(&self.db.pool, order.id).await?;
        if order.status == order_status::PAID && seat_ids.len() > current.len() {
            return Err(BookingError::InvariantViolation(format!(
                "paid order holds {} seats, cannot grow to {}",
                current.len(),
                seat_ids.len()
            )));
        }

        validator::ensure_seats_exist(&self.db.pool, &seat_ids).await?;

        let signature = OrderSignature::for_seats(
            actor.user_id,
            "seat-change",
            order.show_date,
            &seat_ids,
        );
        let lease = self.acquire_or_report(actor.user_id, &signature, order.show_date)?;

        validator::validate(&self.db.pool, &seat_ids, order.show_date, Some(order.id)).await?;

        let mut tx = self.db.begin_tx().await?;
        let freed = match ledger::replace_seats(&mut tx, &order, &seat_ids).await {
            Ok(freed) => freed,
            Err(e) => {
                drop(tx);
                return Err(self
                    .resolve_seat_conflict(e, &seat_ids, order.show_date, Some(order.id))
                    .await);
            }
        };
        tx.commit().await?;

        info!(order_id, freed = freed.len(), taken = seat_ids.len(), "seats changed");

        self.audit.record(
            "order.change_seats",
            "order",
            order.id,
            Some(actor.user_id),
            serde_json::to_value(&current).ok(),
            serde_json::to_value(&seat_ids).ok(),
        );

        let mut touched = freed.clone();
        touched.extend_from_slice(&seat_ids);
        self.invalidate_zones(&touched, order.show_date).await;
        self.notify_seats(&freed, order.show_date, false);
        self.notify_seats(&seat_ids, order.show_date, true);
        self.spawn_publish(
            order.show_date,
            BookingEvent::OrderUpdated {
                order_id: order.id,
                status: order.status.clone(),
                show_date: order.show_date,
            },
        );

        lease.release();
        ledger::fetch_order(&self.db.pool, order.id).await
    }

    pub async fn cancel_order(&self, order_id: i64, actor: Actor) -> BookingResult<Order> {
        let order = self.load_owned_order(order_id, actor).await?;

        if !can_transition(&order.status, order_status::CANCELLED) {
            // Cancelling a paid order is an invariant violation, not a
            // retryable conflict.
            return Err(BookingError::InvariantViolation(format!(
                "cannot cancel an order in status '{}'",
                order.status
            )));
        }

        let signature = OrderSignature::for_seats(
            actor.user_id,
            "cancel",
            order.show_date,
            &[order.id],
        );
        let lease = self.acquire_or_report(actor.user_id, &signature, order.show_date)?;

        let mut tx = self.db.begin_tx().await?;
        let freed = ledger::cancel_active_bookings(&mut tx, order.id).await?;
        let cancelled = ledger::update_order_status(&mut tx, order.id, order_status::CANCELLED).await?;
        tx.commit().await?;

        info!(order_id, freed = freed.len(), "order cancelled");

        self.audit.record(
            "order.cancel",
            "order",
            order.id,
            Some(actor.user_id),
            serde_json::to_value(&order).ok(),
            serde_json::to_value(&cancelled).ok(),
        );
        self.invalidate_zones(&freed, order.show_date).await;
        self.notify_seats(&freed, order.show_date, false);
        self.spawn_publish(
            order.show_date,
            BookingEvent::OrderCancelled {
                order_id: order.id,
                show_date: order.show_date,
                seat_ids: freed,
            },
        );

        lease.release();
        Ok(cancelled)
    }

    /// Driven by the payment subsystem's confirmation webhook.
    pub async fn confirm_payment(&self, order_id: i64) -> BookingResult<Order> {
        let order = ledger::fetch_order(&self.db.pool, order_id).await?;

        if !can_transition(&order.status, order_status::PAID) {
            return Err(BookingError::InvariantViolation(format!(
                "cannot mark an order in status '{}' as paid",
                order.status
            )));
        }

        let user_id = order.user_id.unwrap_or(0);
        let signature =
            OrderSignature::for_seats(user_id, "payment", order.show_date, &[order.id]);
        let lease = self.acquire_or_report(user_id, &signature, order.show_date)?;

        let mut tx = self.db.begin_tx().await?;
        ledger::mark_paid(&mut tx, order.id).await?;
        let paid = ledger::update_order_status(&mut tx, order.id, order_status::PAID).await?;
        tx.commit().await?;

        info!(order_id, "payment confirmed");

        self.audit.record(
            "order.paid",
            "order",
            order.id,
            order.user_id,
            serde_json::to_value(&order).ok(),
            serde_json::to_value(&paid).ok(),
        );
        self.spawn_publish(
            order.show_date,
            BookingEvent::OrderUpdated {
                order_id: order.id,
                status: order_status::PAID.to_string(),
                show_date: order.show_date,
            },
        );

        lease.release();
        Ok(paid)
    }

    fn acquire_or_report(
        &self,
        user_id: i64,
        signature: &OrderSignature,
        show_date: NaiveDate,
    ) -> BookingResult<crate::services::guard::GuardLease> {
        match self.guard.acquire(user_id, signature) {
            Ok(lease) => Ok(lease),
            Err(e) => {
                warn!(user_id, "duplicate submission rejected by guard");
                self.spawn_publish(
                    show_date,
                    BookingEvent::ConcurrencyError {
                        show_date,
                        message: "previous request still processing".to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn load_owned_order(&self, order_id: i64, actor: Actor) -> BookingResult<Order> {
        let order = ledger::fetch_order(&self.db.pool, order_id).await?;
        let owned = order.user_id == Some(actor.user_id);
        if !owned && !actor.admin {
            // Hide other users' orders rather than acknowledging them.
            return Err(BookingError::NotFound("order"));
        }
        Ok(order)
    }

    /// A unique-index violation arrives without seat labels because
    /// the transaction is already aborted; re-run the read-only check
    /// on the pool to name the losing seats.
    async fn resolve_seat_conflict(
        &self,
        err: BookingError,
        seat_ids: &[i64],
        show_date: NaiveDate,
        exclude_order_id: Option<i64>,
    ) -> BookingError {
        let BookingError::SeatsUnavailable(labels) = &err else {
            return err;
        };
        if !labels.is_empty() {
            return err;
        }
        self.spawn_publish(
            show_date,
            BookingEvent::ConcurrencyError {
                show_date,
                message: "seat was taken by a concurrent request".to_string(),
            },
        );
        match validator::validate(&self.db.pool, seat_ids, show_date, exclude_order_id).await {
            Err(conflict @ BookingError::SeatsUnavailable(_)) => conflict,
            _ => err,
        }
    }

    async fn invalidate_zones(&self, seat_ids: &[i64], show_date: NaiveDate) {
        if seat_ids.is_empty() {
            return;
        }
        match ledger::zone_ids_for_seats(&self.db.pool, seat_ids).await {
            Ok(zones) => {
                for zone_id in zones {
                    self.cache.invalidate_seats(zone_id, show_date).await;
                }
            }
            Err(e) => warn!("zone lookup for cache invalidation failed: {:?}", e),
        }
    }

    fn notify_seats(&self, seat_ids: &[i64], show_date: NaiveDate, locked: bool) {
        if seat_ids.is_empty() {
            return;
        }
        let notifier = Arc::clone(&self.notifier);
        let pool = self.db.pool.clone();
        let seat_ids = seat_ids.to_vec();
        tokio::spawn(async move {
            for seat_id in &seat_ids {
                notifier
                    .publish_seat_event(&pool, *seat_id, show_date, locked)
                    .await;
            }
            notifier.publish(
                show_date,
                BookingEvent::SeatAvailabilityChanged {
                    show_date,
                    seat_ids,
                },
            );
        });
    }

    fn spawn_publish(&self, show_date: NaiveDate, event: BookingEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.publish(show_date, event);
        });
    }
}

/// Rejects empty or duplicate-bearing selections and returns a sorted
/// copy, which also keeps the order signature deterministic.
fn normalized_seat_ids(seat_ids: &[i64]) -> BookingResult<Vec<i64>> {
    if seat_ids.is_empty() {
        return Err(BookingError::Validation(
            "at least one seat must be selected".to_string(),
        ));
    }
    let mut sorted = seat_ids.to_vec();
    sorted.sort_unstable();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(BookingError::Validation(
            "duplicate seat ids in selection".to_string(),
        ));
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_seat_ids_sorts_and_rejects_duplicates() {
        assert_eq!(normalized_seat_ids(&[3, 1, 2]).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            normalized_seat_ids(&[1, 2, 1]),
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            normalized_seat_ids(&[]),
            Err(BookingError::Validation(_))
        ));
    }
}
