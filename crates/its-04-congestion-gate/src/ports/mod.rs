//! Ports of the transmit side.

pub mod outbound;

pub use outbound::{
    CongestionControl, HostVehicle, IdentityService, MessageEncoder, MessageSigner,
    PermitListener, RadioTransmitter, SignMode,
};
