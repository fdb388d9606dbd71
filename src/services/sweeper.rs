use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::services::guard::OrderGuard;

/// Background sweeper bounding the guard table's memory.
///
/// Runs on a fixed interval independent of the request path. Owns its
/// task handle and a shutdown channel so tests and restarts stop the
/// timer deterministically instead of leaking it.
pub struct LockSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl LockSweeper {
    pub fn start(guard: Arc<OrderGuard>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so startup is
            // not counted as a sweep.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = guard.sweep_expired();
                        if swept > 0 {
                            debug!(swept, "lock sweeper removed expired guard entries");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("lock sweeper stopping");
                            break;
                        }
                    }
                }
            }
        });

        LockSweeper { shutdown_tx, handle }
    }

    /// Stops the sweeper and waits for its task to finish.
    pub async fn shutdown(self) {
        // A send error means the task already exited; join it anyway.
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("lock sweeper task failed to join: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::services::guard::OrderSignature;
    use chrono::NaiveDate;

    fn expired_guard() -> Arc<OrderGuard> {
        OrderGuard::new(&GuardConfig {
            ttl_seconds: 0,
            max_entries: 100,
            sweep_interval_seconds: 1,
        })
    }

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let guard = expired_guard();
        let date = NaiveDate::from_ymd_opt(2025, 8, 20).unwrap();
        for seat in 0..5 {
            let sig = OrderSignature::for_seats(seat, "standard", date, &[seat]);
            std::mem::forget(guard.acquire(seat, &sig).unwrap());
        }
        assert_eq!(guard.stats().recent_locks, 5);

        let sweeper = LockSweeper::start(Arc::clone(&guard), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(guard.stats().recent_locks, 0);
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let guard = expired_guard();
        let sweeper = LockSweeper::start(guard, Duration::from_millis(5));
        // Must return rather than hang on the interval loop.
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn two_instances_do_not_interfere() {
        let guard_a = expired_guard();
        let guard_b = expired_guard();
        let sweeper_a = LockSweeper::start(Arc::clone(&guard_a), Duration::from_millis(10));
        let sweeper_b = LockSweeper::start(Arc::clone(&guard_b), Duration::from_millis(10));

        sweeper_a.shutdown().await;
        // B keeps sweeping after A is gone.
        let date = NaiveDate::from_ymd_opt(2025, 8, 20).unwrap();
        let sig = OrderSignature::for_seats(1, "standard", date, &[1]);
        std::mem::forget(guard_b.acquire(1, &sig).unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(guard_b.stats().recent_locks, 0);

        sweeper_b.shutdown().await;
    }
}
