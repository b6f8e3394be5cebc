//! # Local Dynamic Map
//!
//! Slot pool of remote-vehicle state, an id index and a free list.
//!
//! ## Locking
//!
//! Three role-scoped locks guard the free list, the id index and the slot
//! contents. When more than one is held they are always taken in the order
//! `index → free → slots`, so allocation (`free → slots`) never contends on
//! the index and readers of one id do not block allocation of another.
//!
//! ## Invariants
//!
//! - A `Bound(i)` entry names a slot in state `Occupied(id)`.
//! - A bound index is never on the free list.
//! - The pool never shrinks.

use crate::domain::consistency::sequence_gap;
use crate::domain::{
    Assessment, IndexEntry, LdmConfig, LdmError, Slot, SlotState, VehicleRecord,
};
use crate::eviction::EvictionTask;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shared_types::entities::{Kinematics, PseudonymId, SlotIndex};
use shared_types::time::TimeSource;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Point-in-time occupancy figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LdmStats {
    pub total_slots: usize,
    pub free_slots: usize,
    pub bound_ids: usize,
    pub dirty_ids: usize,
    /// Slots added by growth beyond the initial size.
    pub grown: u64,
    /// Entries removed by age.
    pub evicted: u64,
    /// Old slots released because their id moved.
    pub released: u64,
    /// Entries removed to stay under the size cap.
    pub pressure_evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    grown: AtomicU64,
    evicted: AtomicU64,
    released: AtomicU64,
    pressure_evictions: AtomicU64,
}

/// The remote-vehicle cache.
pub struct Ldm {
    config: LdmConfig,
    clock: Arc<dyn TimeSource>,
    index: Mutex<HashMap<PseudonymId, IndexEntry>>,
    free: Mutex<VecDeque<SlotIndex>>,
    slots: RwLock<Vec<Slot>>,
    counters: Counters,
    pub(crate) eviction: Mutex<Option<EvictionTask>>,
}

impl Ldm {
    /// Creates a pool with `config.initial_size` free slots.
    pub fn new(config: LdmConfig, clock: Arc<dyn TimeSource>) -> Self {
        let slots = vec![Slot::default(); config.initial_size];
        let free = (0..config.initial_size).collect();

        Self {
            config,
            clock,
            index: Mutex::new(HashMap::new()),
            free: Mutex::new(free),
            slots: RwLock::new(slots),
            counters: Counters::default(),
            eviction: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LdmConfig {
        &self.config
    }

    /// Hands out a slot for writing.
    ///
    /// Pops the free list; when it is empty the pool grows by one. With a
    /// size cap configured and reached, the least recently written entry is
    /// evicted and its slot reused instead. Never fails.
    pub fn allocate_free_slot(&self) -> SlotIndex {
        {
            let mut free = self.free.lock();
            if let Some(index) = free.pop_front() {
                let mut slots = self.slots.write();
                slots[index] = Slot::reserved();
                return index;
            }

            let mut slots = self.slots.write();
            let under_cap = self.config.max_size.map_or(true, |cap| slots.len() < cap);
            if under_cap {
                return self.grow(&mut slots);
            }
        }

        if let Some(index) = self.evict_oldest() {
            return index;
        }

        // Every slot is reserved by an in-flight writer.
        let mut slots = self.slots.write();
        warn!(pool_size = slots.len(), "LDM cap reached with no evictable entry, growing");
        self.grow(&mut slots)
    }

    fn grow(&self, slots: &mut Vec<Slot>) -> SlotIndex {
        slots.push(Slot::reserved());
        self.counters.grown.fetch_add(1, Ordering::Relaxed);
        let index = slots.len() - 1;
        debug!(pool_size = slots.len(), "LDM pool grown");
        index
    }

    /// Records `id → index`.
    ///
    /// `index` must be freshly allocated or already occupied by `id`; a slot
    /// that went back to the free list is rejected. A different live slot
    /// previously bound to `id` is released to the free list as
    /// stale-pending-reuse. When `data` is `None` the slot is assumed to
    /// have been written in place.
    pub fn bind(
        &self,
        id: PseudonymId,
        index: SlotIndex,
        data: Option<VehicleRecord>,
    ) -> Result<(), LdmError> {
        let mut map = self.index.lock();

        {
            let slots = self.slots.read();
            let slot = slots.get(index).ok_or(LdmError::SlotOutOfRange {
                index,
                pool_size: slots.len(),
            })?;
            match slot.state {
                SlotState::Reserved => {}
                SlotState::Occupied(occupant) if occupant == id => {}
                SlotState::Occupied(occupant) => {
                    return Err(LdmError::SlotOccupied { index, occupant });
                }
                // Already back on the free list.
                state @ (SlotState::Free | SlotState::StalePendingReuse) => {
                    return Err(LdmError::SlotNotReserved { index, state });
                }
            }
        }

        if let Some(IndexEntry::Bound(old)) = map.get(&id).copied() {
            if old != index {
                self.free.lock().push_back(old);
                self.slots.write()[old].state = SlotState::StalePendingReuse;
                self.counters.released.fetch_add(1, Ordering::Relaxed);
                debug!(id, old, new = index, "Released previous slot of rebound id");
            }
        }

        map.insert(id, IndexEntry::Bound(index));

        let now = self.clock.now_ms();
        let mut slots = self.slots.write();
        let slot = &mut slots[index];
        if slot.state != SlotState::Occupied(id) {
            slot.packets_lost = 0;
        }
        slot.state = SlotState::Occupied(id);
        if let Some(record) = data {
            slot.record = Some(record);
        }
        slot.updated_at_ms = now;
        Ok(())
    }

    /// Writes a record into a slot in place, before or after `bind`.
    pub fn write_slot(&self, index: SlotIndex, record: VehicleRecord) -> Result<(), LdmError> {
        let now = self.clock.now_ms();
        let mut slots = self.slots.write();
        let pool_size = slots.len();
        let slot = slots
            .get_mut(index)
            .ok_or(LdmError::SlotOutOfRange { index, pool_size })?;
        slot.record = Some(record);
        slot.updated_at_ms = now;
        Ok(())
    }

    /// Caches `record` under its id, reusing the id's slot when it has one.
    ///
    /// A live slot is rewritten under the index lock so an eviction pass
    /// cannot free it in between. Otherwise a fresh slot is allocated and
    /// bound.
    pub fn upsert(&self, record: VehicleRecord) -> Result<SlotIndex, LdmError> {
        let id = record.kinematics.id;
        {
            let map = self.index.lock();
            if let Some(index) = map.get(&id).and_then(|e| e.slot()) {
                let now = self.clock.now_ms();
                let mut slots = self.slots.write();
                let slot = &mut slots[index];
                slot.record = Some(record);
                slot.updated_at_ms = now;
                return Ok(index);
            }
        }

        let index = self.allocate_free_slot();
        self.bind(id, index, Some(record))?;
        Ok(index)
    }

    /// Mapping state of `id`; `Invalid` if never seen.
    #[must_use]
    pub fn entry(&self, id: PseudonymId) -> IndexEntry {
        self.index
            .lock()
            .get(&id)
            .copied()
            .unwrap_or(IndexEntry::Invalid)
    }

    /// Slot bound to `id`, if live.
    #[must_use]
    pub fn lookup(&self, id: PseudonymId) -> Option<SlotIndex> {
        self.entry(id).slot()
    }

    #[must_use]
    pub fn contains(&self, id: PseudonymId) -> bool {
        self.lookup(id).is_some()
    }

    /// Copy of the record cached for `id`.
    #[must_use]
    pub fn get(&self, id: PseudonymId) -> Option<VehicleRecord> {
        let map = self.index.lock();
        let index = map.get(&id).copied()?.slot()?;
        let slots = self.slots.read();
        slots.get(index).and_then(|s| s.record)
    }

    /// Copies of every live record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(PseudonymId, VehicleRecord)> {
        let map = self.index.lock();
        let slots = self.slots.read();
        map.iter()
            .filter_map(|(id, entry)| {
                let record = slots.get(entry.slot()?)?.record?;
                Some((*id, record))
            })
            .collect()
    }

    /// Compares `incoming` with the cached record of the same id and
    /// accumulates any sequence gap on that id.
    pub fn assess(&self, incoming: &Kinematics) -> Assessment {
        let now = self.clock.now_ms();
        let map = self.index.lock();
        let Some(index) = map.get(&incoming.id).and_then(|e| e.slot()) else {
            return Assessment::default();
        };

        let mut slots = self.slots.write();
        let slot = &mut slots[index];
        let Some(cached) = slot.record else {
            return Assessment {
                known: true,
                ..Assessment::default()
            };
        };

        let lost = sequence_gap(&cached.kinematics, incoming);
        slot.packets_lost = slot.packets_lost.saturating_add(lost);

        Assessment {
            known: true,
            duplicate_timestamp: cached.kinematics.timestamp_ms == incoming.timestamp_ms,
            packets_lost: lost,
            cached_age_ms: Some(now.saturating_sub(slot.updated_at_ms)),
        }
    }

    /// Total sequence gaps seen for the current occupant of `id`'s slot.
    #[must_use]
    pub fn packets_lost(&self, id: PseudonymId) -> Option<u32> {
        let map = self.index.lock();
        let index = map.get(&id)?.slot()?;
        Some(self.slots.read()[index].packets_lost)
    }

    /// One eviction pass.
    ///
    /// Holds the index lock for the whole pass. Entries written more than
    /// `age_threshold` ago are marked `Dirty` and their slots freed.
    pub fn evict_stale(&self, age_threshold: Duration) -> usize {
        let now = self.clock.now_ms();
        let threshold_ms = age_threshold.as_millis() as u64;

        let mut map = self.index.lock();
        let mut free = self.free.lock();
        let mut slots = self.slots.write();
        let mut evicted = 0;

        for (id, entry) in map.iter_mut() {
            let IndexEntry::Bound(index) = *entry else {
                continue;
            };
            let slot = &mut slots[index];
            if slot.record.is_none() {
                continue;
            }

            let age_ms = now.saturating_sub(slot.updated_at_ms);
            if age_ms > threshold_ms {
                *slot = Slot::default();
                free.push_back(index);
                *entry = IndexEntry::Dirty;
                evicted += 1;
                debug!(id = *id, slot = index, age_ms, "LDM entry evicted");
            }
        }

        self.counters
            .evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    fn evict_oldest(&self) -> Option<SlotIndex> {
        let mut map = self.index.lock();
        let mut slots = self.slots.write();

        let (id, index) = map
            .iter()
            .filter_map(|(id, entry)| entry.slot().map(|i| (*id, i)))
            .min_by_key(|(_, i)| slots[*i].updated_at_ms)?;

        map.insert(id, IndexEntry::Dirty);
        slots[index] = Slot::reserved();
        self.counters
            .pressure_evictions
            .fetch_add(1, Ordering::Relaxed);
        debug!(id, slot = index, "LDM at cap, evicted oldest entry");
        Some(index)
    }

    /// Current number of slots.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.slots.read().len()
    }

    #[must_use]
    pub fn stats(&self) -> LdmStats {
        let map = self.index.lock();
        let free_slots = self.free.lock().len();
        let total_slots = self.slots.read().len();
        let bound_ids = map
            .values()
            .filter(|e| matches!(e, IndexEntry::Bound(_)))
            .count();

        LdmStats {
            total_slots,
            free_slots,
            bound_ids,
            dirty_ids: map.len() - bound_ids,
            grown: self.counters.grown.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
            pressure_evictions: self.counters.pressure_evictions.load(Ordering::Relaxed),
        }
    }

    /// Indices currently on the free list, front first.
    #[must_use]
    pub fn free_indices(&self) -> Vec<SlotIndex> {
        self.free.lock().iter().copied().collect()
    }

    /// State of slot `index`.
    #[must_use]
    pub fn slot_state(&self, index: SlotIndex) -> Option<SlotState> {
        self.slots.read().get(index).map(|s| s.state)
    }
}

impl std::fmt::Debug for Ldm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldm").field("stats", &self.stats()).finish()
    }
}
