//! Per-sender flow records.

use serde::{Deserialize, Serialize};
use shared_types::entities::Timestamp;

/// Time-to-collision at or above which a sender is not an imminent threat.
pub const FAR_TTC_MS: u32 = 10_000;

/// Position of a remote vehicle relative to the host lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LanePosition {
    SameAhead,
    SameBehind,
    AdjacentLeftAhead,
    AdjacentLeftBehind,
    AdjacentRightAhead,
    AdjacentRightBehind,
    Oncoming,
    #[default]
    Unknown,
}

impl LanePosition {
    /// Behind the host in the same or an adjacent lane, same direction.
    #[must_use]
    pub fn is_behind(self) -> bool {
        matches!(
            self,
            LanePosition::SameBehind
                | LanePosition::AdjacentLeftBehind
                | LanePosition::AdjacentRightBehind
        )
    }
}

/// Zone and motion flags supplied by the threat-assessment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RvClassification {
    /// Outside the host's zone of relevance.
    pub out_of_zone: bool,
    /// Time to collision with the host.
    pub ttc_ms: u32,
    pub rapid_deceleration: bool,
    pub stopped: bool,
    pub lane: LanePosition,
}

impl RvClassification {
    /// Whether this sender can be dropped without losing a relevant threat.
    #[must_use]
    pub fn is_irrelevant(&self) -> bool {
        let far = self.ttc_ms >= FAR_TTC_MS;

        self.out_of_zone
            || (far && !self.rapid_deceleration)
            || (far && self.rapid_deceleration && self.lane.is_behind())
            || (self.stopped && self.lane != LanePosition::SameAhead)
    }

    /// Lower ranks are dropped first.
    #[must_use]
    pub fn drop_rank(&self) -> u8 {
        if self.out_of_zone {
            0
        } else if self.stopped && self.lane != LanePosition::SameAhead {
            1
        } else if !self.rapid_deceleration {
            2
        } else {
            3
        }
    }
}

/// Flow statistics of one link-layer sender.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RvFlowRecord {
    /// Messages seen since the record was created.
    pub total: u64,
    /// `total` at the previous evaluation.
    pub last_total: u64,
    pub first_seen_ms: Timestamp,
    pub last_seen_ms: Timestamp,
    /// Time of the previous evaluation (or creation).
    pub last_evaluated_ms: Timestamp,
    /// Messages per second at the previous evaluation.
    pub rate: f64,
    pub classification: Option<RvClassification>,
}

impl RvFlowRecord {
    #[must_use]
    pub fn new(now_ms: Timestamp) -> Self {
        Self {
            total: 0,
            last_total: 0,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            last_evaluated_ms: now_ms,
            rate: 0.0,
            classification: None,
        }
    }

    #[must_use]
    pub fn is_stale(&self, now_ms: Timestamp, staleness_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > staleness_ms
    }
}
