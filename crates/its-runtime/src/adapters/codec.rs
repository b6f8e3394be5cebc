//! # Wire Codec
//!
//! bincode framing of safety messages for the simulated radio.
//!
//! ```text
//! datagram  = source (u32, big endian) ++ envelope
//! envelope  = SignedEnvelope { mode, signer, signature, payload }
//! payload   = WirePayload { psid, kind, kinematics, event_flags }
//! ```
//!
//! The envelope is what the security service signs and verifies; the radio
//! only adds the link-layer source.

use its_04_congestion_gate::{MessageEncoder, SignMode, TransmitError};
use serde::{Deserialize, Serialize};
use shared_types::entities::{
    Kinematics, L2Address, PseudonymId, SafetyMessage, Timestamp, TransmitType, VehicleState,
    MSG_COUNT_MODULUS, PSID_BSM,
};
use shared_types::time::TimeSource;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    #[error("malformed envelope: {0}")]
    Envelope(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Unsigned message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    pub psid: u32,
    pub kind: TransmitType,
    pub kinematics: Kinematics,
    pub event_flags: u16,
}

/// Signed message as it travels over the air.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub certificate: bool,
    pub signer: PseudonymId,
    pub signature: Vec<u8>,
    pub payload: Vec<u8>,
}

impl SignedEnvelope {
    #[must_use]
    pub fn mode(&self) -> SignMode {
        if self.certificate {
            SignMode::Certificate
        } else {
            SignMode::Auto
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Envelope(e.to_string()))
    }

    pub fn open(&self) -> Result<WirePayload, CodecError> {
        bincode::deserialize(&self.payload).map_err(|e| CodecError::Payload(e.to_string()))
    }
}

/// Prefixes `envelope` with the link-layer source address.
#[must_use]
pub fn frame(source: L2Address, envelope: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(4 + envelope.len());
    datagram.extend_from_slice(&source.to_be_bytes());
    datagram.extend_from_slice(envelope);
    datagram
}

/// Splits a datagram into link-layer source and envelope bytes.
pub fn unframe(datagram: &[u8]) -> Result<(L2Address, &[u8]), CodecError> {
    match datagram.split_first_chunk::<4>() {
        Some((source, rest)) if !rest.is_empty() => Ok((L2Address::from_be_bytes(*source), rest)),
        _ => Err(CodecError::Truncated(datagram.len())),
    }
}

/// Encodes host state for transmission and decodes received frames.
///
/// Each encoded beacon gets a fresh generation time and the next message
/// count, so receivers do not take repeated beacons for replays.
pub struct WireCodec {
    clock: Arc<dyn TimeSource>,
    msg_count: AtomicU8,
}

impl WireCodec {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            msg_count: AtomicU8::new(0),
        }
    }

    fn next_msg_count(&self) -> u8 {
        let modulus = MSG_COUNT_MODULUS as u8;
        self.msg_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some((c + 1) % modulus)
            })
            .unwrap_or_default()
    }

    /// Decodes envelope bytes from `source` into a message ready for
    /// verification.
    pub fn decode(
        &self,
        source: L2Address,
        envelope: &[u8],
        received_at_ms: Timestamp,
    ) -> Result<SafetyMessage, CodecError> {
        let payload = SignedEnvelope::from_bytes(envelope)?.open()?;
        Ok(SafetyMessage {
            source,
            psid: payload.psid,
            kinematics: payload.kinematics,
            signed_payload: envelope.to_vec(),
            received_at_ms,
        })
    }

    /// Decodes a whole datagram.
    pub fn decode_datagram(&self, datagram: &[u8]) -> Result<SafetyMessage, CodecError> {
        let (source, envelope) = unframe(datagram)?;
        self.decode(source, envelope, self.clock.now_ms())
    }
}

impl MessageEncoder for WireCodec {
    fn encode(&self, state: &VehicleState, kind: TransmitType) -> Result<Vec<u8>, TransmitError> {
        let mut kinematics = state.kinematics;
        kinematics.timestamp_ms = self.clock.now_ms();
        kinematics.msg_count = self.next_msg_count();

        let payload = WirePayload {
            psid: PSID_BSM,
            kind,
            kinematics,
            event_flags: state.event_flags,
        };
        bincode::serialize(&payload).map_err(|e| TransmitError::Encode(e.to_string()))
    }
}
