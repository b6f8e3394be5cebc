//! # Paced Congestion Control
//!
//! Posts transmit opportunities at a density-dependent inter-transmit time:
//!
//! ```text
//! itt = clamp(min_itt * density / density_coefficient, min_itt, max_itt)
//! ```
//!
//! `density` is an exponentially weighted count of distinct remote vehicles
//! heard per window, fed from every verified beacon. While a critical event
//! is active the schedule runs at `min_itt`.

use its_03_verification::CongestionFeed;
use its_04_congestion_gate::{CongestionControl, CongestionError, PermitListener};
use parking_lot::Mutex;
use shared_types::entities::{CongestionSample, PseudonymId, Timestamp};
use shared_types::time::TimeSource;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct PacingSettings {
    pub min_itt: Duration,
    pub max_itt: Duration,
    /// Vehicles per window at which the interval starts to stretch.
    pub density_coefficient: f64,
    /// Weight of the newest window in the smoothed density.
    pub density_weight: f64,
    pub density_window: Duration,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            min_itt: Duration::from_millis(100),
            max_itt: Duration::from_millis(600),
            density_coefficient: 25.0,
            density_weight: 0.05,
            density_window: Duration::from_secs(1),
        }
    }
}

impl PacingSettings {
    /// Defaults with the minimum interval set to the transmit interval.
    #[must_use]
    pub fn with_min_itt(min_itt: Duration) -> Self {
        let defaults = Self::default();
        Self {
            min_itt,
            max_itt: defaults.max_itt.max(min_itt),
            ..defaults
        }
    }
}

#[derive(Debug, Default)]
struct Density {
    heard: HashSet<PseudonymId>,
    window_start_ms: Option<Timestamp>,
    smoothed: f64,
}

struct Inner {
    settings: PacingSettings,
    clock: Arc<dyn TimeSource>,
    critical: AtomicBool,
    density: Mutex<Density>,
    retime: Notify,
    opportunities: AtomicU64,
}

impl Inner {
    fn interval(&self) -> Duration {
        if self.critical.load(Ordering::Acquire) {
            return self.settings.min_itt;
        }
        let density = self.density.lock().smoothed;
        let scale = (density / self.settings.density_coefficient).max(1.0);
        self.settings
            .min_itt
            .mul_f64(scale)
            .min(self.settings.max_itt)
    }
}

struct PacingTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct PacedCongestionControl {
    inner: Arc<Inner>,
    task: Mutex<Option<PacingTask>>,
}

impl PacedCongestionControl {
    pub fn new(settings: PacingSettings, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                clock,
                critical: AtomicBool::new(false),
                density: Mutex::new(Density::default()),
                retime: Notify::new(),
                opportunities: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Current inter-transmit time.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval()
    }

    /// Smoothed vehicles heard per window.
    #[must_use]
    pub fn density(&self) -> f64 {
        self.inner.density.lock().smoothed
    }

    #[must_use]
    pub fn opportunities(&self) -> u64 {
        self.inner.opportunities.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl CongestionControl for PacedCongestionControl {
    fn start(&self, listener: Arc<dyn PermitListener>) -> Result<(), CongestionError> {
        let runtime = Handle::try_current().map_err(|e| CongestionError::StartFailed(e.to_string()))?;
        let mut guard = self.task.lock();
        if guard.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Err(CongestionError::StartFailed("pacing already running".into()));
        }

        let (shutdown, mut stop) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = inner.retime.notified() => continue,
                    _ = tokio::time::sleep(inner.interval()) => {
                        inner.opportunities.fetch_add(1, Ordering::Relaxed);
                        listener.on_transmit_opportunity();
                    }
                }
            }
            debug!("Pacing task exited");
        });

        info!(
            min_itt_ms = self.inner.settings.min_itt.as_millis() as u64,
            max_itt_ms = self.inner.settings.max_itt.as_millis() as u64,
            "Congestion control pacing started"
        );
        *guard = Some(PacingTask { shutdown, handle });
        Ok(())
    }

    fn notify_critical_event(&self) {
        self.inner.critical.store(true, Ordering::Release);
        self.inner.retime.notify_waiters();
    }

    fn disable_critical_event(&self) {
        self.inner.critical.store(false, Ordering::Release);
        self.inner.retime.notify_waiters();
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            let _ = task.shutdown.send(true);
            info!("Congestion control pacing stopped");
        }
    }
}

impl CongestionFeed for PacedCongestionControl {
    fn add_data(&self, sample: &CongestionSample) {
        let now = self.inner.clock.now_ms();
        let window_ms = self.inner.settings.density_window.as_millis() as u64;
        let weight = self.inner.settings.density_weight;

        let mut density = self.inner.density.lock();
        match density.window_start_ms {
            None => density.window_start_ms = Some(now),
            Some(start) if now.saturating_sub(start) >= window_ms => {
                let heard = density.heard.len() as f64;
                density.smoothed = (1.0 - weight) * density.smoothed + weight * heard;
                density.heard.clear();
                density.window_start_ms = Some(now);
            }
            Some(_) => {}
        }
        density.heard.insert(sample.sender);
    }
}

impl Drop for PacedCongestionControl {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.shutdown.send(true);
        }
    }
}
