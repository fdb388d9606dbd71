use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::GuardConfig;
use crate::error::{BookingError, BookingResult};

/// Deterministic signature of one booking attempt.
///
/// Two submissions of the same selection by the same user hash to the
/// same key regardless of the order seats were picked in, so a
/// double-click or an impatient resubmit collides in the guard table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderSignature(String);

impl OrderSignature {
    pub fn for_seats(
        user_id: i64,
        ticket_type: &str,
        show_date: NaiveDate,
        seat_ids: &[i64],
    ) -> Self {
        let mut sorted = seat_ids.to_vec();
        sorted.sort_unstable();
        let seats = sorted
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self::digest(&format!("{}|{}|{}|{}", user_id, ticket_type, show_date, seats))
    }

    /// Signature for general-admission requests where only a quantity
    /// is chosen, not concrete seats.
    pub fn for_quantity(
        user_id: i64,
        ticket_type: &str,
        show_date: NaiveDate,
        quantity: u32,
    ) -> Self {
        Self::digest(&format!(
            "{}|{}|{}|qty:{}",
            user_id, ticket_type, show_date, quantity
        ))
    }

    fn digest(raw: &str) -> Self {
        let hash = Sha256::digest(raw.as_bytes());
        OrderSignature(format!("{:x}", hash))
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct LockEntry {
    user_id: i64,
    created_at: Instant,
    // Distinguishes successive holders of one key, so a stale lease
    // dropping after a TTL takeover cannot release the new holder.
    generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    /// Entries whose TTL has not elapsed.
    pub active_locks: usize,
    /// All entries currently in the table, including expired ones the
    /// sweeper has not collected yet.
    pub recent_locks: usize,
    pub max_locks: usize,
}

/// In-memory duplicate-order lock table.
///
/// One mutex around the whole map gives the atomic
/// check-absence-then-insert the booking path depends on: two
/// concurrent requests with the same signature can never both observe
/// "no lock" inside the critical section.
///
/// The table is a fast-fail optimization, not the correctness
/// boundary; the partial unique index on the bookings table is what
/// actually prevents double-booking across processes.
pub struct OrderGuard {
    entries: Mutex<HashMap<String, LockEntry>>,
    ttl: Duration,
    max_entries: usize,
    generations: std::sync::atomic::AtomicU64,
}

impl OrderGuard {
    pub fn new(config: &GuardConfig) -> Arc<Self> {
        Arc::new(OrderGuard {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_seconds),
            max_entries: config.max_entries,
            generations: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Atomically claims the signature for this request.
    ///
    /// A non-expired entry under the same key rejects immediately with
    /// `DuplicateRequest`; callers surface that to the user instead of
    /// queueing or retrying. An expired entry is replaced in place.
    pub fn acquire(
        self: &Arc<Self>,
        user_id: i64,
        signature: &OrderSignature,
    ) -> BookingResult<GuardLease> {
        let key = signature.key().to_string();
        let mut map = self.lock_table();

        if let Some(existing) = map.get(&key) {
            if existing.created_at.elapsed() < self.ttl {
                debug!(
                    user_id,
                    holder = existing.user_id,
                    "guard rejected duplicate submission"
                );
                return Err(BookingError::DuplicateRequest);
            }
            // Expired holder; the new request takes over the key.
        } else if map.len() >= self.max_entries {
            self.evict_locked(&mut map);
        }

        let generation = self
            .generations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        map.insert(
            key.clone(),
            LockEntry {
                user_id,
                created_at: Instant::now(),
                generation,
            },
        );

        Ok(GuardLease {
            guard: Arc::clone(self),
            key: Some(key),
            generation,
        })
    }

    /// Idempotent: releasing an unknown, expired or already-released
    /// key is a no-op.
    pub fn release(&self, key: &str) {
        let mut map = self.lock_table();
        map.remove(key);
    }

    // Lease-scoped release: only removes the entry the lease actually
    // holds, leaving a successor that took the key over after expiry.
    fn release_generation(&self, key: &str, generation: u64) {
        let mut map = self.lock_table();
        if map.get(key).map(|e| e.generation) == Some(generation) {
            map.remove(key);
        }
    }

    /// Removes entries older than the TTL. Called inline on overflow
    /// and periodically by the sweeper.
    pub fn sweep_expired(&self) -> usize {
        let mut map = self.lock_table();
        let before = map.len();
        map.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        before - map.len()
    }

    pub fn stats(&self) -> GuardStats {
        let map = self.lock_table();
        let active = map
            .values()
            .filter(|e| e.created_at.elapsed() < self.ttl)
            .count();
        GuardStats {
            active_locks: active,
            recent_locks: map.len(),
            max_locks: self.max_entries,
        }
    }

    // Overflow path, called with the table lock held. First purges
    // expired entries; if the table is still full, clears it entirely.
    // Dropping live locks can let a duplicate through, which we accept
    // over rejecting every new booking until the sweeper catches up.
    fn evict_locked(&self, map: &mut HashMap<String, LockEntry>) {
        let before = map.len();
        map.retain(|_, entry| entry.created_at.elapsed() < self.ttl);

        if map.len() >= self.max_entries {
            warn!(
                size = map.len(),
                max = self.max_entries,
                "guard table still full after sweeping expired entries, clearing it"
            );
            map.clear();
        } else {
            debug!(
                swept = before - map.len(),
                "guard table overflow resolved by inline sweep"
            );
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, LockEntry>> {
        // A poisoned table only means a panic elsewhere mid-mutation;
        // every mutation leaves the map structurally valid.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holder of an acquired guard key.
///
/// The key is released on drop, so every exit path out of the
/// orchestrator, including early `?` returns after acquisition, frees
/// the lock without explicit bookkeeping.
pub struct GuardLease {
    guard: Arc<OrderGuard>,
    key: Option<String>,
    generation: u64,
}

impl GuardLease {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Explicit early release; dropping the lease does the same.
    pub fn release(mut self) {
        if let Some(key) = self.key.take() {
            self.guard.release_generation(&key, self.generation);
        }
    }
}

impl Drop for GuardLease {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.guard.release_generation(&key, self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(ttl_seconds: u64, max_entries: usize) -> GuardConfig {
        GuardConfig {
            ttl_seconds,
            max_entries,
            sweep_interval_seconds: 1,
        }
    }

    fn show_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 20).unwrap()
    }

    #[test]
    fn signature_ignores_seat_order() {
        let a = OrderSignature::for_seats(7, "standard", show_date(), &[3, 1, 2]);
        let b = OrderSignature::for_seats(7, "standard", show_date(), &[1, 2, 3]);
        assert_eq!(a, b);
    }

    #[test]
    fn signature_differs_by_user_and_date() {
        let base = OrderSignature::for_seats(7, "standard", show_date(), &[1, 2]);
        let other_user = OrderSignature::for_seats(8, "standard", show_date(), &[1, 2]);
        let other_date = OrderSignature::for_seats(
            7,
            "standard",
            NaiveDate::from_ymd_opt(2025, 8, 21).unwrap(),
            &[1, 2],
        );
        assert_ne!(base, other_user);
        assert_ne!(base, other_date);
    }

    #[test]
    fn second_acquire_with_same_signature_conflicts() {
        let guard = OrderGuard::new(&config(30, 100));
        let sig = OrderSignature::for_seats(1, "standard", show_date(), &[10, 11]);

        let lease = guard.acquire(1, &sig).expect("first acquire");
        let second = guard.acquire(1, &sig);
        assert!(matches!(second, Err(BookingError::DuplicateRequest)));

        lease.release();
        assert!(guard.acquire(1, &sig).is_ok());
    }

    #[test]
    fn concurrent_acquires_grant_exactly_one_lease() {
        let guard = OrderGuard::new(&config(30, 1000));
        let sig = OrderSignature::for_seats(42, "standard", show_date(), &[1, 2]);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let sig = sig.clone();
                // Return the lease so no thread releases before all
                // fifty have attempted the acquire.
                std::thread::spawn(move || guard.acquire(42, &sig).ok())
            })
            .collect();

        let leases: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let granted = leases.iter().filter(|l| l.is_some()).count();
        assert_eq!(granted, 1);
    }

    #[test]
    fn release_is_idempotent() {
        let guard = OrderGuard::new(&config(30, 100));
        let sig = OrderSignature::for_seats(1, "standard", show_date(), &[5]);

        let lease = guard.acquire(1, &sig).unwrap();
        let key = lease.key().unwrap().to_string();
        lease.release();

        // Unknown, already-released and never-acquired keys are no-ops.
        guard.release(&key);
        guard.release(&key);
        guard.release("not-a-real-key");
        assert_eq!(guard.stats().recent_locks, 0);
    }

    #[test]
    fn expired_lock_is_reacquirable_without_release() {
        let guard = OrderGuard::new(&config(0, 100));
        let sig = OrderSignature::for_seats(1, "standard", show_date(), &[5]);

        let first = guard.acquire(1, &sig).unwrap();
        // TTL of zero: the entry is expired the moment it lands, so a
        // new request takes the key over even though it was never
        // explicitly released.
        let second = guard.acquire(2, &sig);
        assert!(second.is_ok());
        drop(first);
        drop(second);
    }

    #[test]
    fn stale_lease_drop_does_not_release_the_successor() {
        let guard = OrderGuard::new(&config(0, 100));
        let sig = OrderSignature::for_seats(1, "standard", show_date(), &[5]);

        let first = guard.acquire(1, &sig).unwrap();
        let second = guard.acquire(2, &sig).unwrap();

        // The first holder expired and was taken over; its release
        // must not evict the second holder's entry.
        drop(first);
        assert_eq!(guard.stats().recent_locks, 1);
        drop(second);
        assert_eq!(guard.stats().recent_locks, 0);
    }

    #[test]
    fn dropping_lease_releases_the_key() {
        let guard = OrderGuard::new(&config(30, 100));
        let sig = OrderSignature::for_seats(1, "standard", show_date(), &[9]);

        {
            let _lease = guard.acquire(1, &sig).unwrap();
            assert_eq!(guard.stats().active_locks, 1);
        }
        assert_eq!(guard.stats().active_locks, 0);
    }

    #[test]
    fn overflow_clears_table_when_nothing_is_expired() {
        let guard = OrderGuard::new(&config(30, 4));
        let mut leases = Vec::new();
        for seat in 0..4 {
            let sig = OrderSignature::for_seats(seat, "standard", show_date(), &[seat]);
            leases.push(guard.acquire(seat, &sig).unwrap());
        }
        assert_eq!(guard.stats().recent_locks, 4);

        // Table is full of live locks; the safety valve wipes it so
        // the new request still succeeds.
        let sig = OrderSignature::for_seats(99, "standard", show_date(), &[99]);
        let lease = guard.acquire(99, &sig).unwrap();
        assert_eq!(guard.stats().recent_locks, 1);
        drop(lease);
        drop(leases);
    }

    #[test]
    fn overflow_prefers_sweeping_expired_entries() {
        let guard = OrderGuard::new(&config(0, 4));
        for seat in 0..4 {
            let sig = OrderSignature::for_seats(seat, "standard", show_date(), &[seat]);
            // Leak the lease on purpose; TTL zero expires it at once.
            std::mem::forget(guard.acquire(seat, &sig).unwrap());
        }

        let sig = OrderSignature::for_seats(99, "standard", show_date(), &[99]);
        let _lease = guard.acquire(99, &sig).unwrap();
        // All four expired entries swept, only the new one remains.
        assert_eq!(guard.stats().recent_locks, 1);
    }

    #[test]
    fn sweep_expired_reports_removed_count() {
        let guard = OrderGuard::new(&config(0, 100));
        for seat in 0..3 {
            let sig = OrderSignature::for_seats(seat, "standard", show_date(), &[seat]);
            std::mem::forget(guard.acquire(seat, &sig).unwrap());
        }
        assert_eq!(guard.sweep_expired(), 3);
        assert_eq!(guard.sweep_expired(), 0);
    }

    proptest! {
        /// Any interleaving of acquires, releases and sweeps keeps the
        /// table within its configured bound.
        #[test]
        fn table_never_exceeds_max_entries(ops in prop::collection::vec((0u8..3, 0i64..64), 1..200)) {
            let max = 16;
            let guard = OrderGuard::new(&config(30, max));
            let mut leases: Vec<GuardLease> = Vec::new();

            for (op, seat) in ops {
                match op {
                    0 => {
                        let sig = OrderSignature::for_seats(seat, "standard", show_date(), &[seat]);
                        if let Ok(lease) = guard.acquire(seat, &sig) {
                            leases.push(lease);
                        }
                    }
                    1 => {
                        if !leases.is_empty() {
                            let lease = leases.remove(0);
                            lease.release();
                        }
                    }
                    _ => {
                        guard.sweep_expired();
                    }
                }
                prop_assert!(guard.stats().recent_locks <= max);
            }
        }
    }
}
