//! # Slots and Index Entries
//!
//! Tagged states for pool slots and for id-map entries.
//!
//! ```text
//! Slot:   Free ──allocate──→ Reserved ──bind──→ Occupied(id)
//!          ↑                    ↑                   │    │
//!          │                    └──allocate── StalePendingReuse ←─ rebind id elsewhere
//!          └────────────── evict ──────────────────┘
//!
//! Entry:  Invalid ──bind──→ Bound(i) ──evict──→ Dirty ──bind──→ Bound(j)
//! ```

use serde::{Deserialize, Serialize};
use shared_types::entities::{Kinematics, L2Address, PseudonymId, SlotIndex, Timestamp};

/// Lifecycle state of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotState {
    /// On the free list.
    #[default]
    Free,
    /// Handed out by `allocate_free_slot`, not yet bound.
    Reserved,
    /// Bound to a live id.
    Occupied(PseudonymId),
    /// Released because its id moved to another slot. Content is kept
    /// until the slot is allocated again so concurrent readers of the old
    /// copy see consistent data.
    StalePendingReuse,
}

/// Mapping state of one pseudonym id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexEntry {
    /// Never seen.
    Invalid,
    /// Evicted; no live slot.
    Dirty,
    /// Live binding.
    Bound(SlotIndex),
}

impl IndexEntry {
    #[must_use]
    pub fn slot(self) -> Option<SlotIndex> {
        match self {
            IndexEntry::Bound(i) => Some(i),
            IndexEntry::Invalid | IndexEntry::Dirty => None,
        }
    }
}

/// Validity tag attached by the caller when caching a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordValidity {
    /// Cached without a signature check.
    #[default]
    Unverified,
    /// Signature verified.
    Verified,
    /// Verified, but flagged by a consistency or misbehavior check.
    Suspicious,
}

/// Cached remote-vehicle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub kinematics: Kinematics,
    /// Link-layer sender the record arrived from.
    pub source: L2Address,
    pub validity: RecordValidity,
}

/// One storage unit of the pool.
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub state: SlotState,
    pub record: Option<VehicleRecord>,
    /// Local time of the last write; eviction age is measured from here.
    pub updated_at_ms: Timestamp,
    /// Sequence gaps seen for the current occupant.
    pub packets_lost: u32,
}

impl Slot {
    pub(crate) fn reserved() -> Self {
        Self {
            state: SlotState::Reserved,
            ..Self::default()
        }
    }
}
