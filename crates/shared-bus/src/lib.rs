//! # Shared Bus - Vehicle Event Bus
//!
//! Carries state-change notifications between pipeline components.
//!
//! ## Choreography
//!
//! ```text
//! ┌──────────────┐  VehicleStateChanged   ┌─────────────────┐
//! │ Vehicle bus  │ ─────────────────────→ │ Mode controller │
//! └──────────────┘                        └────────┬────────┘
//!                                                  │ ModeChanged
//!                        ┌──────────────┐          ▼
//!                        │  Event Bus   │ ←────────┘
//!                        └──────┬───────┘
//!        FloodMitigation ↑      │ subscribe()
//! ┌────────────────┐     │      ▼
//! │ Flood detector │ ────┘  Radio L2 filter, diagnostics
//! └────────────────┘
//! ```
//!
//! The bus is a broadcast channel: a slow subscriber loses the oldest
//! events rather than blocking publishers.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{EventFilter, EventTopic, ItsEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
