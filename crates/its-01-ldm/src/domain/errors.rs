//! LDM error types.

use crate::domain::SlotState;
use shared_types::entities::{PseudonymId, SlotIndex};
use thiserror::Error;

/// Errors from binding or writing slots.
///
/// Allocation and lookup never fail; only misuse of a slot index does.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LdmError {
    /// The index was never handed out by this pool.
    #[error("slot {index} out of range (pool size {pool_size})")]
    SlotOutOfRange { index: SlotIndex, pool_size: usize },

    /// The slot is bound to a different live id.
    #[error("slot {index} is occupied by id {occupant:#010x}")]
    SlotOccupied {
        index: SlotIndex,
        occupant: PseudonymId,
    },

    /// The slot is not reserved for this write; it was freed, possibly by
    /// an eviction pass, since its index was read.
    #[error("slot {index} is not reserved for binding (state {state:?})")]
    SlotNotReserved { index: SlotIndex, state: SlotState },
}
