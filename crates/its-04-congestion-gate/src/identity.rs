//! Pseudonym rotation.
//!
//! A change fires once the configured interval has elapsed and the host has
//! travelled the configured distance since the last change. Changes are
//! blocked while locked, and the mode controller holds the lock for the
//! whole of critical mode.

use crate::domain::{CriticalState, IdentityChangePolicy};
use crate::ports::IdentityService;
use parking_lot::Mutex;
use shared_types::entities::{PseudonymId, Timestamp};
use shared_types::errors::SecurityError;
use shared_types::geo::{distance_m, GeoPoint};
use shared_types::time::TimeSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Anchor {
    changed_at_ms: Option<Timestamp>,
    position: Option<GeoPoint>,
}

pub struct IdentityChangeScheduler {
    service: Arc<dyn IdentityService>,
    critical: Arc<CriticalState>,
    clock: Arc<dyn TimeSource>,
    policy: IdentityChangePolicy,
    anchor: Mutex<Anchor>,
    locked: AtomicBool,
    changes: AtomicU64,
}

impl IdentityChangeScheduler {
    pub fn new(
        service: Arc<dyn IdentityService>,
        critical: Arc<CriticalState>,
        clock: Arc<dyn TimeSource>,
        policy: IdentityChangePolicy,
    ) -> Self {
        Self {
            service,
            critical,
            clock,
            policy,
            anchor: Mutex::new(Anchor::default()),
            locked: AtomicBool::new(false),
            changes: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) -> Result<(), SecurityError> {
        self.locked.store(true, Ordering::Release);
        self.service.lock_identity()
    }

    pub fn unlock(&self) -> Result<(), SecurityError> {
        self.locked.store(false, Ordering::Release);
        self.service.unlock_identity()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Rotates the pseudonym if a trigger has fired.
    ///
    /// Returns the new pseudonym when a change happened.
    pub fn maybe_change(&self, position: GeoPoint) -> Result<Option<PseudonymId>, SecurityError> {
        let Some(interval) = self.policy.interval else {
            return Ok(None);
        };
        if self.is_locked() || self.critical.is_critical() {
            debug!("Identity change blocked");
            return Ok(None);
        }

        let now = self.clock.now_ms();
        let mut anchor = self.anchor.lock();
        let (Some(changed_at), Some(origin)) = (anchor.changed_at_ms, anchor.position) else {
            anchor.changed_at_ms = Some(now);
            anchor.position = Some(position);
            return Ok(None);
        };

        let elapsed_ms = now.saturating_sub(changed_at);
        let travelled_m = distance_m(origin, position);
        if elapsed_ms < interval.as_millis() as u64 || travelled_m < self.policy.distance_m {
            return Ok(None);
        }

        let id = self.service.change_identity()?;
        anchor.changed_at_ms = Some(now);
        anchor.position = Some(position);
        let changes = self.changes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            pseudonym = id,
            changes, elapsed_ms, travelled_m, "Host pseudonym changed"
        );
        Ok(Some(id))
    }

    #[must_use]
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::time::ManualClock;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingIdentity {
        next: AtomicU64,
        locks: AtomicU64,
        unlocks: AtomicU64,
    }

    impl IdentityService for CountingIdentity {
        fn change_identity(&self) -> Result<PseudonymId, SecurityError> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst) as PseudonymId + 100)
        }
        fn lock_identity(&self) -> Result<(), SecurityError> {
            self.locks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn unlock_identity(&self) -> Result<(), SecurityError> {
            self.unlocks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scheduler(
        policy: IdentityChangePolicy,
    ) -> (IdentityChangeScheduler, Arc<ManualClock>, Arc<CriticalState>, Arc<CountingIdentity>) {
        let clock = Arc::new(ManualClock::new(0));
        let critical = Arc::new(CriticalState::new());
        let service = Arc::new(CountingIdentity::default());
        (
            IdentityChangeScheduler::new(service.clone(), critical.clone(), clock.clone(), policy),
            clock,
            critical,
            service,
        )
    }

    const ORIGIN: GeoPoint = GeoPoint {
        lat_deg: 42.0,
        lon_deg: -83.0,
    };

    /// Test: with no distance floor the interval alone rotates the pseudonym
    #[test]
    fn test_interval_trigger() {
        let (s, clock, _, _) = scheduler(IdentityChangePolicy {
            interval: Some(Duration::from_secs(60)),
            distance_m: 0.0,
        });
        assert_eq!(s.maybe_change(ORIGIN).unwrap(), None);
        clock.advance(59_999);
        assert_eq!(s.maybe_change(ORIGIN).unwrap(), None);
        clock.advance(1);
        assert_eq!(s.maybe_change(ORIGIN).unwrap(), Some(100));
        assert_eq!(s.changes(), 1);
    }

    /// Test: a change waits for both the interval and the distance
    #[test]
    fn test_interval_and_distance_both_required() {
        let (s, clock, _, _) = scheduler(IdentityChangePolicy {
            interval: Some(Duration::from_secs(10)),
            distance_m: 500.0,
        });
        s.maybe_change(ORIGIN).unwrap();
        let far = GeoPoint {
            lat_deg: 42.01,
            ..ORIGIN
        };
        // far enough, too soon
        assert_eq!(s.maybe_change(far).unwrap(), None);

        clock.advance(10_000);
        let near = GeoPoint {
            lat_deg: 42.001,
            ..ORIGIN
        };
        assert_eq!(s.maybe_change(near).unwrap(), None);
        assert!(s.maybe_change(far).unwrap().is_some());
    }

    /// Test: without an interval rotation never happens
    #[test]
    fn test_disabled_policy() {
        let (s, clock, _, service) = scheduler(IdentityChangePolicy::default());
        s.maybe_change(ORIGIN).unwrap();
        clock.advance(1_000_000);
        assert_eq!(s.maybe_change(ORIGIN).unwrap(), None);
        assert_eq!(service.next.load(Ordering::SeqCst), 0);
    }

    /// Test: lock and critical mode both block a due change
    #[test]
    fn test_lock_and_critical_block_change() {
        let (s, clock, critical, service) = scheduler(IdentityChangePolicy {
            interval: Some(Duration::from_secs(1)),
            distance_m: 0.0,
        });
        s.maybe_change(ORIGIN).unwrap();
        clock.advance(5_000);

        s.lock().unwrap();
        assert_eq!(s.maybe_change(ORIGIN).unwrap(), None);
        s.unlock().unwrap();
        assert_eq!(service.locks.load(Ordering::SeqCst), 1);
        assert_eq!(service.unlocks.load(Ordering::SeqCst), 1);

        critical.enter_critical();
        assert_eq!(s.maybe_change(ORIGIN).unwrap(), None);
        critical.exit_critical();
        assert!(s.maybe_change(ORIGIN).unwrap().is_some());
    }
}
