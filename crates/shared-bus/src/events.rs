//! # Stack Events
//!
//! Every event type that flows through the shared bus.

use serde::{Deserialize, Serialize};
use shared_types::entities::{L2FilterEntry, OperatingMode, VehicleState};

/// All events that can be published to the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItsEvent {
    // =========================================================================
    // HOST VEHICLE
    // =========================================================================
    /// The host vehicle reported a state change.
    /// Source: vehicle bus collaborator | Target: mode controller
    VehicleStateChanged {
        /// Whether the change is a safety-critical event.
        critical: bool,
        /// Host state at the time of the change.
        state: VehicleState,
    },

    // =========================================================================
    // TRANSMISSION
    // =========================================================================
    /// The transmission mode switched.
    /// Source: mode controller | Target: diagnostics
    ModeChanged {
        mode: OperatingMode,
    },

    /// The host station switched to a new pseudonym.
    IdentityChanged {
        /// Total number of changes since start.
        changes: u64,
    },

    // =========================================================================
    // FLOW FILTER
    // =========================================================================
    /// Senders to drop at the link layer.
    /// Source: flood detector | Target: radio
    FloodMitigation {
        entries: Vec<L2FilterEntry>,
    },
}

impl ItsEvent {
    /// Get the topic for this event.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::VehicleStateChanged { .. } => EventTopic::Vehicle,
            Self::ModeChanged { .. } | Self::IdentityChanged { .. } => EventTopic::Transmission,
            Self::FloodMitigation { .. } => EventTopic::FlowFilter,
        }
    }

    /// Name of the component that emits this event.
    #[must_use]
    pub fn source_component(&self) -> &'static str {
        match self {
            Self::VehicleStateChanged { .. } => "vehicle-bus",
            Self::ModeChanged { .. } => "mode-controller",
            Self::IdentityChanged { .. } => "identity-scheduler",
            Self::FloodMitigation { .. } => "flood-detector",
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Host vehicle state changes.
    Vehicle,
    /// Mode and identity changes.
    Transmission,
    /// Flood mitigation decisions.
    FlowFilter,
    /// Every topic.
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &ItsEvent) -> bool {
        self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topic() {
        let event = ItsEvent::VehicleStateChanged {
            critical: true,
            state: VehicleState::default(),
        };
        assert_eq!(event.topic(), EventTopic::Vehicle);
        assert_eq!(event.source_component(), "vehicle-bus");
    }

    #[test]
    fn test_filter_all() {
        let filter = EventFilter::all();
        let event = ItsEvent::ModeChanged {
            mode: OperatingMode::Critical,
        };
        assert!(filter.matches(&event));
    }

    #[test]
    fn test_filter_by_topic() {
        let filter = EventFilter::topics(vec![EventTopic::FlowFilter]);

        let flood = ItsEvent::FloodMitigation { entries: vec![] };
        assert!(filter.matches(&flood));

        let mode = ItsEvent::ModeChanged {
            mode: OperatingMode::Normal,
        };
        assert!(!filter.matches(&mode));
    }

    #[test]
    fn test_filter_all_topic_wildcard() {
        let filter = EventFilter::topics(vec![EventTopic::All]);
        let event = ItsEvent::IdentityChanged { changes: 3 };
        assert!(filter.matches(&event));
    }
}
