//! # Mode Controller
//!
//! Subscribes to vehicle-state events and switches the transmit mode.
//!
//! On entering critical mode the controller locks pseudonym changes,
//! switches congestion control to the event schedule and announces the new
//! mode. Leaving critical mode undoes all three.

use crate::domain::{CriticalState, HostState};
use crate::identity::IdentityChangeScheduler;
use crate::ports::CongestionControl;
use shared_bus::{EventPublisher, ItsEvent, Subscription};
use shared_types::entities::OperatingMode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct ModeController {
    critical: Arc<CriticalState>,
    host: Arc<HostState>,
    identity: Arc<IdentityChangeScheduler>,
    control: Option<Arc<dyn CongestionControl>>,
    publisher: Arc<dyn EventPublisher>,
}

impl ModeController {
    pub fn new(
        critical: Arc<CriticalState>,
        host: Arc<HostState>,
        identity: Arc<IdentityChangeScheduler>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            critical,
            host,
            identity,
            control: None,
            publisher,
        }
    }

    /// Congestion control to switch between schedules.
    #[must_use]
    pub fn with_congestion_control(mut self, control: Arc<dyn CongestionControl>) -> Self {
        self.control = Some(control);
        self
    }

    /// Applies one event. Returns the new mode on a transition.
    pub async fn handle(&self, event: &ItsEvent) -> Option<OperatingMode> {
        let ItsEvent::VehicleStateChanged { critical, state } = event else {
            return None;
        };
        self.host.update(*state);

        if *critical {
            if !self.critical.enter_critical() {
                debug!("Further critical event while critical");
                return None;
            }
            if let Err(e) = self.identity.lock() {
                warn!(error = %e, "Could not lock pseudonym changes");
            }
            if let Some(control) = &self.control {
                control.notify_critical_event();
            }
            warn!(flags = state.event_flags, "Critical vehicle event, event messages only");
            self.publisher
                .publish(ItsEvent::ModeChanged {
                    mode: OperatingMode::Critical,
                })
                .await;
            Some(OperatingMode::Critical)
        } else {
            if !self.critical.exit_critical() {
                return None;
            }
            if let Err(e) = self.identity.unlock() {
                warn!(error = %e, "Could not unlock pseudonym changes");
            }
            if let Some(control) = &self.control {
                control.disable_critical_event();
            }
            info!("Critical event cleared, periodic beacons resumed");
            self.publisher
                .publish(ItsEvent::ModeChanged {
                    mode: OperatingMode::Normal,
                })
                .await;
            Some(OperatingMode::Normal)
        }
    }

    /// Handles events until shutdown or the bus closes.
    pub async fn run(&self, mut events: Subscription, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = events.recv() => match next {
                    Some(event) => {
                        self.handle(&event).await;
                    }
                    None => break,
                },
            }
        }
        debug!("Mode controller stopped");
    }
}
