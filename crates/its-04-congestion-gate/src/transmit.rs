//! # Transmit Scheduler
//!
//! Two loops share one send path:
//!
//! ```text
//! periodic loop:  tick ─→ [critical? park until normal] ─→ send(Sps)
//! event loop:     wait for emergency ─→ while critical { tick ─→ send(Event) }
//!
//! send(kind): acquire permit ─→ mode check ─→ identity check ─→ encode ─→ sign ─→ radio
//! ```
//!
//! A periodic beacon goes out only in `Normal` mode and an event message
//! only in `Critical` mode; the other combination is suppressed after the
//! permit is taken.

use crate::domain::{CriticalState, SendOutcome, TransmitError};
use crate::gate::CongestionGate;
use crate::identity::IdentityChangeScheduler;
use crate::ports::{HostVehicle, MessageEncoder, MessageSigner, RadioTransmitter, SignMode};
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::audit::AuditLog;
use shared_types::entities::{PseudonymId, TransmitType};
use shared_types::geo::GeoPoint;
use shared_types::time::TimeSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransmitStats {
    pub sps_sent: u64,
    pub events_sent: u64,
    pub suppressed: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sps_sent: AtomicU64,
    events_sent: AtomicU64,
    suppressed: AtomicU64,
    failures: AtomicU64,
}

/// Collaborators of the send path.
pub struct TransmitPorts {
    pub host: Arc<dyn HostVehicle>,
    pub encoder: Arc<dyn MessageEncoder>,
    pub signer: Arc<dyn MessageSigner>,
    pub radio: Arc<dyn RadioTransmitter>,
}

pub struct TransmitScheduler {
    gate: Arc<CongestionGate>,
    critical: Arc<CriticalState>,
    identity: Arc<IdentityChangeScheduler>,
    ports: TransmitPorts,
    interval: Duration,
    sign_log: Arc<AuditLog>,
    clock: Arc<dyn TimeSource>,
    pseudonym: Mutex<Option<PseudonymId>>,
    counters: Counters,
}

impl TransmitScheduler {
    pub fn new(
        gate: Arc<CongestionGate>,
        critical: Arc<CriticalState>,
        identity: Arc<IdentityChangeScheduler>,
        ports: TransmitPorts,
        interval: Duration,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            gate,
            critical,
            identity,
            ports,
            interval,
            sign_log: Arc::new(AuditLog::disabled()),
            clock,
            pseudonym: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn with_sign_log(mut self, log: Arc<AuditLog>) -> Self {
        self.sign_log = log;
        self
    }

    /// Sends one message of `kind` if the current mode allows it.
    pub async fn send(&self, kind: TransmitType) -> Result<SendOutcome, TransmitError> {
        self.gate.acquire(kind).await?;

        let mode = self.critical.mode();
        let allowed = match kind {
            TransmitType::Event => self.critical.is_critical(),
            TransmitType::Sps => !self.critical.is_critical(),
        };
        if !allowed {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(?kind, ?mode, "Message kind not sent in current mode");
            return Ok(SendOutcome::Suppressed { mode });
        }

        match self.build_and_send(kind).await {
            Ok(outcome) => {
                let counter = match kind {
                    TransmitType::Sps => &self.counters.sps_sent,
                    TransmitType::Event => &self.counters.events_sent,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(outcome)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn build_and_send(&self, kind: TransmitType) -> Result<SendOutcome, TransmitError> {
        let mut state = self.ports.host.snapshot();

        let mut identity_changed = false;
        if kind == TransmitType::Sps {
            match self
                .identity
                .maybe_change(GeoPoint::from(&state.kinematics))
            {
                Ok(Some(id)) => {
                    *self.pseudonym.lock() = Some(id);
                    identity_changed = true;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Pseudonym change failed, keeping current"),
            }
        }
        if let Some(id) = *self.pseudonym.lock() {
            state.kinematics.id = id;
        }

        let payload = self.ports.encoder.encode(&state, kind)?;
        let sign_mode = match kind {
            TransmitType::Event => SignMode::Certificate,
            TransmitType::Sps => SignMode::Auto,
        };
        let started = Instant::now();
        let frame = self.ports.signer.sign(&payload, sign_mode)?;
        if let Err(e) = self
            .sign_log
            .record(self.clock.now_ms(), started.elapsed().as_secs_f64() * 1000.0)
        {
            warn!(error = %e, "Signing audit line dropped");
        }

        let bytes = self.ports.radio.transmit(&frame, kind).await?;
        Ok(SendOutcome::Transmitted {
            bytes,
            identity_changed,
        })
    }

    /// Periodic beacon loop. Parks while critical.
    pub async fn run_periodic(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            if self.critical.is_critical() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    normal = self.critical.wait_until_normal() => {
                        if !normal {
                            break;
                        }
                    }
                }
                ticker.reset();
                continue;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.send(TransmitType::Sps) => self.log_failure(TransmitType::Sps, result),
            }
        }
        debug!("Periodic transmit loop stopped");
    }

    /// Event message loop. Sends at the transmit interval for as long as
    /// the mode stays critical.
    pub async fn run_events(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                woke = self.critical.wait_for_emergency() => {
                    if !woke {
                        break;
                    }
                }
            }

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            while self.critical.is_critical() {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {}
                }
                if !self.critical.is_critical() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => return,
                    result = self.send(TransmitType::Event) => self.log_failure(TransmitType::Event, result),
                }
            }
        }
        debug!("Event transmit loop stopped");
    }

    fn log_failure(&self, kind: TransmitType, result: Result<SendOutcome, TransmitError>) {
        if let Err(e) = result {
            warn!(?kind, error = %e, "Transmission failed");
        }
    }

    #[must_use]
    pub fn stats(&self) -> TransmitStats {
        TransmitStats {
            sps_sent: self.counters.sps_sent.load(Ordering::Relaxed),
            events_sent: self.counters.events_sent.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Pseudonym stamped on outgoing messages, once one has been assigned.
    #[must_use]
    pub fn pseudonym(&self) -> Option<PseudonymId> {
        *self.pseudonym.lock()
    }
}
