//! Ports of the verification pipeline.

pub mod inbound;
pub mod outbound;

pub use inbound::VerificationApi;
pub use outbound::{CongestionFeed, SecurityVerifier};
