//! Simulation adapters for the outbound ports of the components.

pub mod codec;
pub mod congestion;
pub mod load;
pub mod radio;
pub mod security;

pub use codec::{frame, unframe, CodecError, SignedEnvelope, WireCodec, WirePayload};
pub use congestion::{PacedCongestionControl, PacingSettings};
pub use load::PipelineLoadMonitor;
pub use radio::{RadioStats, UdpRadio, MAX_FRAME_BYTES};
pub use security::{SecurityStats, SimulatedSecurity};
