//! # Critical Mode State
//!
//! ```text
//! [NORMAL] ──critical vehicle event──→ [CRITICAL]
//!    ↑                                      │
//!    └──────── non-critical event ──────────┘
//! ```
//!
//! In `Normal` only periodic beacons go out; in `Critical` only event
//! messages do. The periodic loop parks in [`CriticalState::wait_until_normal`]
//! and the event loop in [`CriticalState::wait_for_emergency`].

use parking_lot::Mutex;
use shared_types::entities::{vehicle_events, OperatingMode, VehicleState};
use tokio::sync::Notify;

/// Vehicle events that switch transmission into critical mode.
pub const CRITICAL_EVENT_MASK: u16 = vehicle_events::HARD_BRAKING
    | vehicle_events::AIRBAG_DEPLOYMENT
    | vehicle_events::ABS_ACTIVATED
    | vehicle_events::STABILITY_CONTROL_ACTIVATED
    | vehicle_events::TRACTION_CONTROL_LOSS;

#[must_use]
pub fn is_critical_event(state: &VehicleState) -> bool {
    state.has_event(CRITICAL_EVENT_MASK)
}

#[derive(Debug, Default)]
struct Flags {
    critical: bool,
    /// Set on every critical event, consumed by the event loop.
    new_event: bool,
    shutdown: bool,
}

/// Shared mode flag with wakeups for both transmit loops.
#[derive(Debug, Default)]
pub struct CriticalState {
    flags: Mutex<Flags>,
    changed: Notify,
}

impl CriticalState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a critical event. Returns true on the `Normal → Critical`
    /// transition.
    pub fn enter_critical(&self) -> bool {
        let entered = {
            let mut flags = self.flags.lock();
            let entered = !flags.critical;
            flags.critical = true;
            flags.new_event = true;
            entered
        };
        self.changed.notify_waiters();
        entered
    }

    /// Returns true on the `Critical → Normal` transition.
    pub fn exit_critical(&self) -> bool {
        let exited = {
            let mut flags = self.flags.lock();
            let exited = flags.critical;
            flags.critical = false;
            flags.new_event = false;
            exited
        };
        if exited {
            self.changed.notify_waiters();
        }
        exited
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.flags.lock().critical
    }

    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        if self.is_critical() {
            OperatingMode::Critical
        } else {
            OperatingMode::Normal
        }
    }

    /// Waits for a pending critical event and consumes it.
    ///
    /// Returns false once [`CriticalState::shutdown`] has been called.
    pub async fn wait_for_emergency(&self) -> bool {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut flags = self.flags.lock();
                if flags.shutdown {
                    return false;
                }
                if flags.new_event {
                    flags.new_event = false;
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Waits until the mode is `Normal`. Returns false on shutdown.
    pub async fn wait_until_normal(&self) -> bool {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let flags = self.flags.lock();
                if flags.shutdown {
                    return false;
                }
                if !flags.critical {
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Releases every waiter permanently.
    pub fn shutdown(&self) {
        self.flags.lock().shutdown = true;
        self.changed.notify_waiters();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.flags.lock().shutdown
    }
}
