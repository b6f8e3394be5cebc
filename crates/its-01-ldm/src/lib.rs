//! # Local Dynamic Map (LDM)
//!
//! **Component:** 01
//!
//! ## Purpose
//!
//! Caches the most recent verified state of every remote vehicle, keyed by
//! its rotating pseudonym id, and drops entries that stop being refreshed.
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | Bound index names an occupied slot | `ldm.rs` - `bind()` occupancy check |
//! | Free list disjoint from bound indices | `ldm.rs` - `bind()` / `evict_stale()` |
//! | Pool never shrinks | `ldm.rs` - slots only pushed |
//! | Eviction spares entries younger than the threshold | `ldm.rs` - `evict_stale()` |
//!
//! ## Entry Lifecycle
//!
//! ```text
//! [INVALID] ──bind──→ [BOUND(i)] ──evict──→ [DIRTY] ──bind──→ [BOUND(j)]
//!                         │
//!                         └── rebind to j: slot i → free list (stale-pending-reuse)
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! domain/slot.rs         - SlotState, IndexEntry, VehicleRecord
//! domain/consistency.rs  - sequence-gap and replay assessment
//! ldm.rs                 - Ldm: allocate, bind, lookup, evict
//! eviction.rs            - background eviction task
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod eviction;
pub mod ldm;

pub use domain::{
    Assessment, IndexEntry, LdmConfig, LdmError, RecordValidity, SlotState, VehicleRecord,
};
pub use ldm::{Ldm, LdmStats};
