//! # Eviction Task
//!
//! Background task that periodically calls [`Ldm::evict_stale`].
//!
//! The task holds only a weak reference to the map, so dropping the last
//! `Arc<Ldm>` also ends it. A running scan is never interrupted: the stop
//! signal is observed between passes.

use crate::ldm::Ldm;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub(crate) struct EvictionTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ldm {
    /// Starts the eviction task. Must be called within a tokio runtime.
    ///
    /// Returns `false` without side effects when a task is already running
    /// or `period` is zero.
    pub fn start_eviction(self: &Arc<Self>, period: Duration, age_threshold: Duration) -> bool {
        if period.is_zero() {
            warn!("LDM eviction period is zero, not starting");
            return false;
        }
        let mut guard = self.eviction.lock();
        if guard.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!("LDM eviction already started");
            return false;
        }

        let (shutdown, mut stop) = watch::channel(false);
        let ldm = Arc::downgrade(self);
        let first_pass = Instant::now() + period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_pass, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(ldm) = ldm.upgrade() else { break };
                        let evicted = ldm.evict_stale(age_threshold);
                        if evicted > 0 {
                            debug!(evicted, "LDM eviction pass");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("LDM eviction task exited");
        });

        info!(
            period_ms = period.as_millis() as u64,
            age_threshold_ms = age_threshold.as_millis() as u64,
            "LDM eviction started"
        );
        *guard = Some(EvictionTask { shutdown, handle });
        true
    }

    /// Starts eviction with the configured period and threshold, unless the
    /// configured period is zero.
    pub fn start_configured_eviction(self: &Arc<Self>) -> bool {
        let config = self.config();
        if !config.eviction_enabled() {
            return false;
        }
        let (period, threshold) = (config.eviction_period, config.age_threshold);
        self.start_eviction(period, threshold)
    }

    /// Signals the task to exit after its current pass.
    ///
    /// Returns `false` when no task was running.
    pub fn stop_eviction(&self) -> bool {
        match self.eviction.lock().take() {
            Some(task) => {
                let _ = task.shutdown.send(true);
                info!("LDM eviction stopped");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_evicting(&self) -> bool {
        self.eviction
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

impl Drop for Ldm {
    fn drop(&mut self) {
        if let Some(task) = self.eviction.get_mut().take() {
            let _ = task.shutdown.send(true);
        }
    }
}
