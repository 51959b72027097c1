//! # Timeout Guard
//!
//! Bounded wait for one transition per ride (driver assignment). Arming starts
//! a timer task; disarming cancels it. Each arm cycle has a generation number,
//! and whichever of fire or disarm removes that generation from the table
//! first wins, so `on_timeout` never runs after a disarm and runs at most once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::RideId;

struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
}

/// Per-ride one-shot timers.
#[derive(Clone, Default)]
pub struct TimeoutGuard {
    timers: Arc<Mutex<HashMap<RideId, ArmedTimer>>>,
    next_generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for TimeoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutGuard")
            .field("armed", &self.lock().len())
            .finish()
    }
}

impl TimeoutGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RideId, ArmedTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm the guard for `ride_id`.
    ///
    /// Returns `false` without arming when a timer is already armed for the
    /// ride. Must be called from within a Tokio runtime.
    pub fn arm<F, Fut>(&self, ride_id: &RideId, duration: Duration, on_timeout: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut timers = self.lock();
            if timers.contains_key(ride_id) {
                debug!(ride_id = %ride_id, "Timeout guard already armed");
                return false;
            }
            timers.insert(
                ride_id.clone(),
                ArmedTimer {
                    generation,
                    cancel: cancel.clone(),
                },
            );
        }

        debug!(
            ride_id = %ride_id,
            timeout_ms = duration.as_millis() as u64,
            "Timeout guard armed"
        );

        let guard = self.clone();
        let ride_id = ride_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(duration) => {}
            }

            if !guard.claim(&ride_id, generation) {
                debug!(ride_id = %ride_id, "Timeout guard disarmed before firing");
                return;
            }

            info!(ride_id = %ride_id, "Timeout guard fired");
            on_timeout().await;
        });

        true
    }

    /// Cancel the armed timer for `ride_id`. Returns `false` when nothing was
    /// armed (never armed, already fired, or already disarmed).
    pub fn disarm(&self, ride_id: &RideId) -> bool {
        match self.lock().remove(ride_id) {
            Some(timer) => {
                timer.cancel.cancel();
                debug!(ride_id = %ride_id, "Timeout guard disarmed");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, ride_id: &RideId) -> bool {
        self.lock().contains_key(ride_id)
    }

    /// Cancel every armed timer.
    pub fn disarm_all(&self) {
        for (_, timer) in self.lock().drain() {
            timer.cancel.cancel();
        }
    }

    /// Remove this arm cycle if it is still current.
    fn claim(&self, ride_id: &RideId, generation: u64) -> bool {
        let mut timers = self.lock();
        match timers.get(ride_id) {
            Some(timer) if timer.generation == generation => {
                timers.remove(ride_id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() -> std::future::Ready<()> + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&fired);
        (fired, move || {
            handle.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_duration() {
        let guard = TimeoutGuard::new();
        let ride = RideId::from("ride_123");
        let (fired, on_timeout) = counter();

        assert!(guard.arm(&ride, Duration::from_millis(5000), on_timeout));

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!guard.is_armed(&ride));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_firing() {
        let guard = TimeoutGuard::new();
        let ride = RideId::from("ride_123");
        let (fired, on_timeout) = counter();

        guard.arm(&ride, Duration::from_millis(5000), on_timeout);
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert!(guard.disarm(&ride));
        assert!(!guard.disarm(&ride));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_is_once_per_cycle() {
        let guard = TimeoutGuard::new();
        let ride = RideId::from("ride_123");
        let (first, on_first) = counter();
        let (second, on_second) = counter();

        assert!(guard.arm(&ride, Duration::from_secs(1), on_first));
        assert!(!guard.arm(&ride, Duration::from_secs(1), on_second));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_disarm_ignores_stale_timer() {
        let guard = TimeoutGuard::new();
        let ride = RideId::from("ride_123");
        let (stale, on_stale) = counter();
        let (fresh, on_fresh) = counter();

        guard.arm(&ride, Duration::from_secs(1), on_stale);
        guard.disarm(&ride);
        guard.arm(&ride, Duration::from_secs(3), on_fresh);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert!(guard.is_armed(&ride));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fresh.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_all() {
        let guard = TimeoutGuard::new();
        let (fired, on_timeout) = counter();
        let (other_fired, on_other) = counter();

        guard.arm(&RideId::from("a"), Duration::from_secs(1), on_timeout);
        guard.arm(&RideId::from("b"), Duration::from_secs(1), on_other);
        guard.disarm_all();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(other_fired.load(Ordering::SeqCst), 0);
    }
}
