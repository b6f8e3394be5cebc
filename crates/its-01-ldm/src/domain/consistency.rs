//! Consistency of an incoming beacon against the cached copy.

use shared_types::entities::{Kinematics, MSG_COUNT_MODULUS};

/// Result of comparing an incoming beacon with the cached record of the
/// same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Assessment {
    /// The id had a live cached record.
    pub known: bool,
    /// Same generation timestamp as the cached record.
    pub duplicate_timestamp: bool,
    /// Beacons missing between the cached and incoming sequence numbers.
    pub packets_lost: u32,
    /// Age of the cached record.
    pub cached_age_ms: Option<u64>,
}

impl Assessment {
    /// A repeated generation timestamp indicates a replayed beacon.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.duplicate_timestamp
    }
}

/// Number of beacons missing between `previous` and `incoming`.
///
/// The message count wraps at 128. A gap of one is the next beacon; gaps of
/// 127 or more are treated as reordering rather than loss.
#[must_use]
pub fn sequence_gap(previous: &Kinematics, incoming: &Kinematics) -> u32 {
    let modulus = u32::from(MSG_COUNT_MODULUS);
    let prev = u32::from(previous.msg_count) % modulus;
    let next = u32::from(incoming.msg_count) % modulus;
    let diff = (next + modulus - prev) % modulus;

    if diff > 1 && diff < modulus - 1 {
        diff - 1
    } else {
        0
    }
}
