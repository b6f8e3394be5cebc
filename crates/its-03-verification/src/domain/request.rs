//! Requests held by the window and the results handed back to submitters.

use serde::Serialize;
use shared_types::entities::{
    Kinematics, L2Address, SafetyMessage, SlotIndex, Timestamp, PSID_BSM,
};
use std::time::Duration;

/// Result of a signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Verified,
    Rejected,
}

impl Verdict {
    #[must_use]
    pub fn is_verified(self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl From<bool> for Verdict {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Verified
        } else {
            Self::Rejected
        }
    }
}

/// Safety-relevant copy of a submitted message.
///
/// The signed payload stays with the verifier; the window only keeps what
/// post-processing needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationRequest {
    pub source: L2Address,
    pub psid: u32,
    pub kinematics: Kinematics,
    pub received_at_ms: Timestamp,
}

impl VerificationRequest {
    #[must_use]
    pub fn is_bsm(&self) -> bool {
        self.psid == PSID_BSM
    }
}

impl From<&SafetyMessage> for VerificationRequest {
    fn from(message: &SafetyMessage) -> Self {
        Self {
            source: message.source,
            psid: message.psid,
            kinematics: message.kinematics,
            received_at_ms: message.received_at_ms,
        }
    }
}

/// Outcome of post-processing one completed verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Processed {
    pub verdict: Verdict,
    /// Submission to callback.
    pub latency: Duration,
    /// The beacon repeated the cached generation timestamp.
    pub replay: bool,
    /// Misbehavior check result, when the check ran.
    pub misbehavior: Option<bool>,
    /// LDM slot the record was cached in.
    pub cached_slot: Option<SlotIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_from_bool() {
        assert_eq!(Verdict::from(true), Verdict::Verified);
        assert_eq!(Verdict::from(false), Verdict::Rejected);
        assert!(!Verdict::Rejected.is_verified());
    }

    #[test]
    fn test_request_copies_message_fields() {
        let message = SafetyMessage {
            source: 9,
            psid: PSID_BSM,
            kinematics: Kinematics {
                id: 3,
                ..Default::default()
            },
            signed_payload: vec![1, 2, 3],
            received_at_ms: 77,
        };
        let request = VerificationRequest::from(&message);
        assert_eq!(request.source, 9);
        assert_eq!(request.kinematics.id, 3);
        assert_eq!(request.received_at_ms, 77);
        assert!(request.is_bsm());
    }
}
