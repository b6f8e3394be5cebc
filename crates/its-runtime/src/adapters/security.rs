//! # Simulated Security Service
//!
//! Accept-all stand-in for the V2X security collaborator. A message
//! verifies when its envelope and payload decode. Async requests are
//! completed by a fixed pool of blocking worker threads after the
//! configured verification latency, which also sets the service capacity.

use crate::adapters::codec::SignedEnvelope;
use crate::container::config::SecuritySettings;
use its_03_verification::{SecurityVerifier, VerificationTicket};
use its_04_congestion_gate::{IdentityService, MessageSigner, SignMode};
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::entities::{Kinematics, PseudonymId, SafetyMessage};
use shared_types::errors::SecurityError;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Speed above which kinematics are implausible (m/s).
const MAX_PLAUSIBLE_SPEED_MPS: f64 = 70.0;

/// Longitudinal acceleration magnitude above which kinematics are
/// implausible (0.01 m/s²).
const MAX_PLAUSIBLE_ACCEL: i16 = 1_500;

struct Job {
    envelope: Vec<u8>,
    ticket: VerificationTicket,
}

type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SecurityStats {
    pub verified: u64,
    pub rejected: u64,
    pub signed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    verified: AtomicU64,
    rejected: AtomicU64,
    signed: AtomicU64,
}

pub struct SimulatedSecurity {
    settings: SecuritySettings,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pseudonym: AtomicU32,
    identity_locked: AtomicBool,
    counters: Arc<Counters>,
}

impl SimulatedSecurity {
    /// Starts the worker pool.
    pub fn open(settings: SecuritySettings) -> Result<Self, SecurityError> {
        if settings.workers == 0 {
            return Err(SecurityError::Unavailable("no verification workers".into()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let mut workers = Vec::with_capacity(settings.workers);
        for index in 0..settings.workers {
            let queue = Arc::clone(&queue);
            let counters = Arc::clone(&counters);
            let latency = settings.verify_latency;
            let handle = std::thread::Builder::new()
                .name(format!("its-verify-{index}"))
                .spawn(move || worker(queue, counters, latency))
                .map_err(|e| SecurityError::Unavailable(e.to_string()))?;
            workers.push(handle);
        }

        info!(
            workers = settings.workers,
            latency_us = settings.verify_latency.as_micros() as u64,
            "Simulated security service opened"
        );
        Ok(Self {
            settings,
            jobs: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            pseudonym: AtomicU32::new(rand::random::<PseudonymId>().max(1)),
            identity_locked: AtomicBool::new(false),
            counters,
        })
    }

    /// Verifications per second the pool sustains, if latency is non-zero.
    #[must_use]
    pub fn capacity(&self) -> Option<f64> {
        let latency = self.settings.verify_latency.as_secs_f64();
        (latency > 0.0).then(|| self.settings.workers as f64 / latency)
    }

    #[must_use]
    pub fn pseudonym(&self) -> PseudonymId {
        self.pseudonym.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> SecurityStats {
        SecurityStats {
            verified: self.counters.verified.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            signed: self.counters.signed.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting requests and joins the workers once the queue drains.
    pub fn close(&self) {
        drop(self.jobs.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                warn!("Verification worker panicked");
            }
        }
        debug!("Simulated security service closed");
    }
}

impl Drop for SimulatedSecurity {
    fn drop(&mut self) {
        self.jobs.get_mut().take();
    }
}

fn check(envelope: &[u8]) -> bool {
    SignedEnvelope::from_bytes(envelope)
        .and_then(|e| e.open())
        .is_ok()
}

fn worker(queue: JobQueue, counters: Arc<Counters>, latency: Duration) {
    loop {
        let job = queue.lock().blocking_recv();
        let Some(Job { envelope, ticket }) = job else {
            break;
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let ok = check(&envelope);
        let counter = if ok { &counters.verified } else { &counters.rejected };
        counter.fetch_add(1, Ordering::Relaxed);
        ticket.complete(ok);
    }
}

impl SecurityVerifier for SimulatedSecurity {
    fn verify_sync(&self, message: &SafetyMessage) -> Result<bool, SecurityError> {
        if !self.settings.verify_latency.is_zero() {
            std::thread::sleep(self.settings.verify_latency);
        }
        let ok = check(&message.signed_payload);
        let counter = if ok {
            &self.counters.verified
        } else {
            &self.counters.rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(ok)
    }

    fn verify_async(
        &self,
        message: &SafetyMessage,
        _priority: u8,
        ticket: VerificationTicket,
    ) -> Result<(), SecurityError> {
        let jobs = self.jobs.lock();
        let Some(sender) = jobs.as_ref() else {
            return Err(SecurityError::Unavailable("service closed".into()));
        };
        sender
            .send(Job {
                envelope: message.signed_payload.clone(),
                ticket,
            })
            .map_err(|_| SecurityError::Unavailable("verification workers stopped".into()))
    }

    fn misbehavior_check(&self, kinematics: &Kinematics) -> Result<bool, SecurityError> {
        Ok(kinematics.speed_mps() > MAX_PLAUSIBLE_SPEED_MPS
            || kinematics.long_accel.unsigned_abs() > MAX_PLAUSIBLE_ACCEL as u16)
    }
}

impl IdentityService for SimulatedSecurity {
    fn change_identity(&self) -> Result<PseudonymId, SecurityError> {
        if self.identity_locked.load(Ordering::Acquire) {
            return Err(SecurityError::IdentityChange("identity locked".into()));
        }
        let id = rand::random::<PseudonymId>().max(1);
        self.pseudonym.store(id, Ordering::Release);
        Ok(id)
    }

    fn lock_identity(&self) -> Result<(), SecurityError> {
        self.identity_locked.store(true, Ordering::Release);
        Ok(())
    }

    fn unlock_identity(&self) -> Result<(), SecurityError> {
        self.identity_locked.store(false, Ordering::Release);
        Ok(())
    }
}

impl MessageSigner for SimulatedSecurity {
    fn sign(&self, payload: &[u8], mode: SignMode) -> Result<Vec<u8>, SecurityError> {
        let signer = self.pseudonym();
        let envelope = SignedEnvelope {
            certificate: mode == SignMode::Certificate,
            signer,
            signature: signer.to_be_bytes().to_vec(),
            payload: payload.to_vec(),
        };
        let bytes = envelope
            .to_bytes()
            .map_err(|e| SecurityError::Signing(e.to_string()))?;
        self.counters.signed.fetch_add(1, Ordering::Relaxed);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::codec::WireCodec;
    use its_04_congestion_gate::MessageEncoder;
    use shared_types::entities::{TransmitType, VehicleState};
    use shared_types::time::ManualClock;

    fn security(latency_us: u64) -> SimulatedSecurity {
        SimulatedSecurity::open(SecuritySettings {
            verify_latency: Duration::from_micros(latency_us),
            workers: 2,
        })
        .unwrap()
    }

    fn signed_message(security: &SimulatedSecurity) -> SafetyMessage {
        let codec = WireCodec::new(Arc::new(ManualClock::new(1_000)));
        let payload = codec
            .encode(&VehicleState::default(), TransmitType::Sps)
            .unwrap();
        let envelope = security.sign(&payload, SignMode::Auto).unwrap();
        codec.decode(3, &envelope, 1_000).unwrap()
    }

    /// Test: a signed message verifies inline and garbage does not
    #[test]
    fn test_verify_sync() {
        let s = security(0);
        let message = signed_message(&s);
        assert!(s.verify_sync(&message).unwrap());

        let garbage = SafetyMessage {
            signed_payload: vec![0xFF, 0x00],
            ..message
        };
        assert!(!s.verify_sync(&garbage).unwrap());
        let stats = s.stats();
        assert_eq!((stats.verified, stats.rejected, stats.signed), (1, 1, 1));
    }

    /// Test: capacity follows worker count and latency
    #[test]
    fn test_capacity() {
        let capacity = security(500).capacity().unwrap();
        assert!((capacity - 4_000.0).abs() < 1e-6);
        assert_eq!(security(0).capacity(), None);
    }

    /// Test: zero workers cannot open
    #[test]
    fn test_open_requires_workers() {
        let result = SimulatedSecurity::open(SecuritySettings {
            verify_latency: Duration::ZERO,
            workers: 0,
        });
        assert!(matches!(result, Err(SecurityError::Unavailable(_))));
    }

    /// Test: identity changes are refused while locked
    #[test]
    fn test_identity_lock() {
        let s = security(0);
        let before = s.pseudonym();
        s.lock_identity().unwrap();
        assert!(matches!(
            s.change_identity(),
            Err(SecurityError::IdentityChange(_))
        ));
        assert_eq!(s.pseudonym(), before);
        s.unlock_identity().unwrap();
        let id = s.change_identity().unwrap();
        assert_eq!(s.pseudonym(), id);
    }

    /// Test: the sign mode is carried in the envelope
    #[test]
    fn test_sign_mode_in_envelope() {
        let s = security(0);
        let bytes = s.sign(b"payload", SignMode::Certificate).unwrap();
        let envelope = SignedEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.mode(), SignMode::Certificate);
        assert_eq!(envelope.signer, s.pseudonym());
    }

    /// Test: implausible kinematics are flagged
    #[test]
    fn test_misbehavior_check() {
        let s = security(0);
        let normal = Kinematics {
            speed: 1_000,
            ..Default::default()
        };
        assert!(!s.misbehavior_check(&normal).unwrap());
        let too_fast = Kinematics {
            speed: 4_000,
            ..Default::default()
        };
        assert!(s.misbehavior_check(&too_fast).unwrap());
        let hard_accel = Kinematics {
            long_accel: -2_000,
            ..Default::default()
        };
        assert!(s.misbehavior_check(&hard_accel).unwrap());
    }
}
