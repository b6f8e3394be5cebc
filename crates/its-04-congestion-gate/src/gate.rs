//! # Congestion Gate
//!
//! A counting semaphore that starts at zero. Congestion control posts one
//! permit per transmit opportunity; each send consumes one.
//!
//! | Gate | Kind | Mode | Waits for permit |
//! |------|------|------|------------------|
//! | ungated | any | any | no |
//! | gated | `Event` | `Critical` | no |
//! | gated | any other | any | yes |

use crate::domain::{CongestionError, CriticalState, TransmitError};
use crate::ports::{CongestionControl, PermitListener};
use serde::Serialize;
use shared_types::entities::TransmitType;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GateStats {
    pub posted: u64,
    pub granted: u64,
    pub bypassed: u64,
    pub available: usize,
}

pub struct CongestionGate {
    permits: Semaphore,
    gated: AtomicBool,
    critical: Arc<CriticalState>,
    posted: AtomicU64,
    granted: AtomicU64,
    bypassed: AtomicU64,
}

impl CongestionGate {
    /// An ungated gate; [`CongestionGate::start`] arms it.
    #[must_use]
    pub fn new(critical: Arc<CriticalState>) -> Self {
        Self {
            permits: Semaphore::new(0),
            gated: AtomicBool::new(false),
            critical,
            posted: AtomicU64::new(0),
            granted: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
        }
    }

    /// Registers with congestion control and gates transmissions.
    ///
    /// When `enabled` is false, or congestion control does not start, the
    /// gate stays open.
    pub fn start(
        self: &Arc<Self>,
        control: &dyn CongestionControl,
        enabled: bool,
    ) -> Result<bool, CongestionError> {
        if !enabled {
            info!("Congestion control disabled, transmissions ungated");
            return Ok(false);
        }

        let listener: Arc<dyn PermitListener> = Arc::clone(self) as Arc<dyn PermitListener>;
        match control.start(listener) {
            Ok(()) => {
                self.gated.store(true, Ordering::Release);
                info!("Congestion control started, transmissions gated");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Congestion control failed to start, transmissions ungated");
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn is_gated(&self) -> bool {
        self.gated.load(Ordering::Acquire)
    }

    /// Waits for a transmit permit for `kind`.
    pub async fn acquire(&self, kind: TransmitType) -> Result<(), TransmitError> {
        if !self.is_gated() || (kind == TransmitType::Event && self.critical.is_critical()) {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransmitError::GateClosed)?;
        permit.forget();
        self.granted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Adds one permit.
    pub fn post(&self) {
        if self.permits.is_closed() {
            return;
        }
        self.permits.add_permits(1);
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    /// Fails every current and future waiter with [`TransmitError::GateClosed`].
    pub fn close(&self) {
        self.permits.close();
    }

    #[must_use]
    pub fn stats(&self) -> GateStats {
        GateStats {
            posted: self.posted.load(Ordering::Relaxed),
            granted: self.granted.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            available: self.permits.available_permits(),
        }
    }
}

impl PermitListener for CongestionGate {
    fn on_transmit_opportunity(&self) {
        self.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct FakeControl {
        fail: bool,
        listener: Mutex<Option<Arc<dyn PermitListener>>>,
    }

    impl FakeControl {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                listener: Mutex::new(None),
            }
        }

        fn tick(&self) {
            if let Some(l) = self.listener.lock().as_ref() {
                l.on_transmit_opportunity();
            }
        }
    }

    impl CongestionControl for FakeControl {
        fn start(&self, listener: Arc<dyn PermitListener>) -> Result<(), CongestionError> {
            if self.fail {
                return Err(CongestionError::StartFailed("no channel".into()));
            }
            *self.listener.lock() = Some(listener);
            Ok(())
        }
        fn notify_critical_event(&self) {}
        fn disable_critical_event(&self) {}
        fn stop(&self) {}
    }

    fn gate() -> (Arc<CongestionGate>, Arc<CriticalState>) {
        let critical = Arc::new(CriticalState::new());
        (Arc::new(CongestionGate::new(critical.clone())), critical)
    }

    /// Test: a disabled gate never waits
    #[tokio::test]
    async fn test_disabled_gate_is_open() {
        let (gate, _) = gate();
        assert!(!gate.start(&FakeControl::new(false), false).unwrap());
        gate.acquire(TransmitType::Sps).await.unwrap();
        assert_eq!(gate.stats().bypassed, 1);
    }

    /// Test: a failed start leaves the gate open
    #[tokio::test]
    async fn test_failed_start_leaves_gate_open() {
        let (gate, _) = gate();
        assert!(gate.start(&FakeControl::new(true), true).is_err());
        assert!(!gate.is_gated());
        gate.acquire(TransmitType::Sps).await.unwrap();
    }

    /// Test: one posted permit releases exactly one waiter
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_permit_one_sender() {
        let (gate, _) = gate();
        let control = FakeControl::new(false);
        assert!(gate.start(&control, true).unwrap());

        let a = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(TransmitType::Sps).await }
        });
        let b = tokio::spawn({
            let gate = gate.clone();
            async move { gate.acquire(TransmitType::Sps).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!a.is_finished() && !b.is_finished());

        control.tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let finished = [a.is_finished(), b.is_finished()]
            .iter()
            .filter(|f| **f)
            .count();
        assert_eq!(finished, 1);
        assert_eq!(gate.stats().granted, 1);

        gate.close();
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(TransmitError::GateClosed)));
    }

    /// Test: event messages bypass the gate in critical mode only
    #[tokio::test]
    async fn test_event_bypass_in_critical() {
        let (gate, critical) = gate();
        gate.start(&FakeControl::new(false), true).unwrap();

        let pending =
            tokio::time::timeout(Duration::from_millis(20), gate.acquire(TransmitType::Event)).await;
        assert!(pending.is_err());

        critical.enter_critical();
        gate.acquire(TransmitType::Event).await.unwrap();
        let sps =
            tokio::time::timeout(Duration::from_millis(20), gate.acquire(TransmitType::Sps)).await;
        assert!(sps.is_err());
    }

    /// Test: permits accumulate when nobody is waiting
    #[tokio::test]
    async fn test_permits_accumulate() {
        let (gate, _) = gate();
        let control = FakeControl::new(false);
        gate.start(&control, true).unwrap();
        control.tick();
        control.tick();
        assert_eq!(gate.stats().available, 2);
        gate.acquire(TransmitType::Sps).await.unwrap();
        gate.acquire(TransmitType::Sps).await.unwrap();
        assert_eq!(gate.stats().available, 0);
    }
}
