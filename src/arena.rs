//! Reference-counted slab arena
//!
//! A single size class of fixed-capacity byte slots with explicit reference
//! counting. Freed slots go on a free list and are reused by later
//! allocations, so the steady-state write path performs no per-allocation
//! heap churn. Backing storage grows on demand up to a configured maximum;
//! hitting the maximum surfaces [`PoolError::ArenaExhausted`] to the caller
//! rather than silently falling back to the heap.
//!
//! # Generation counters
//!
//! Every slot carries a generation counter that advances each time the
//! slot's refcount reaches zero. Handles capture the generation at
//! allocation time, so a release through a handle whose slot has already
//! been freed reports [`PoolError::DoubleRelease`] instead of corrupting
//! whatever tenant occupies the slot now.
//!
//! # Slot bytes
//!
//! Slot contents are handed out as `Arc<Vec<u8>>` clones. A freed slot's
//! buffer is recycled in place only when the arena holds the sole reference;
//! if a stale reader still holds the `Arc`, the slot gets a fresh buffer and
//! the old bytes stay valid until the last clone drops. Use-after-free is
//! therefore unrepresentable: a stale view sees stale bytes, never another
//! tenant's data.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::PoolError;
use crate::metrics;

/// Handle to one allocation within an [`Arena`]
///
/// Captures the slot index and the slot generation observed at allocation
/// time. Copyable; copies share the same logical reference (cloning a
/// handle does not retain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    slot: u32,
    generation: u32,
}

impl SlotRef {
    /// Slot index within the owning arena (diagnostics only)
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Generation captured at allocation time (diagnostics only)
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// One fixed-capacity block plus its bookkeeping
#[derive(Debug)]
struct Slot {
    /// Block contents; clones are handed to readers
    bytes: Arc<Vec<u8>>,
    /// Live references; 0 means free and on the free list
    refcount: u32,
    /// Advances when the refcount reaches zero
    generation: u32,
}

#[derive(Debug)]
struct ArenaInner {
    slots: Vec<Slot>,
    /// Indices of slots with refcount 0, eligible for reuse
    free: Vec<u32>,
    /// Sum of refcounts across all slots
    live_refs: i64,
}

/// A reference-counted pool of fixed-size byte slots (one size class)
///
/// Multiple size classes are achieved by composing multiple arena
/// instances; see the sharded pool layer.
///
/// # Example
///
/// ```rust
/// use kuba_writecache::arena::Arena;
///
/// let arena = Arena::new(64, 1024);
/// let handle = arena.allocate(b"payload").unwrap();
/// arena.retain(&handle).unwrap();
/// assert!(!arena.release(&handle).unwrap()); // refcount 2 -> 1
/// assert!(arena.release(&handle).unwrap()); // refcount 1 -> 0, slot freed
/// assert!(arena.release(&handle).is_err()); // reported, not corrupted
/// ```
#[derive(Debug)]
pub struct Arena {
    /// Fixed capacity of every slot in this arena
    slot_size: usize,
    /// Maximum number of slots the backing store may grow to
    max_slots: usize,
    inner: Mutex<ArenaInner>,
}

impl Arena {
    /// Create an arena serving one size class
    ///
    /// `slot_size` is the fixed byte capacity of each slot; `max_slots`
    /// bounds backing-store growth. No slots are allocated up front.
    pub fn new(slot_size: usize, max_slots: usize) -> Self {
        Self {
            slot_size,
            max_slots,
            inner: Mutex::new(ArenaInner {
                slots: Vec::new(),
                free: Vec::new(),
                live_refs: 0,
            }),
        }
    }

    /// Slot capacity in bytes for this size class
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Configured maximum slot count
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Allocate a slot holding a copy of `data`, refcount = 1
    ///
    /// Draws from the free list first; grows the backing store if no free
    /// slot exists and the maximum has not been reached. Returns
    /// [`PoolError::ArenaExhausted`] once all `max_slots` slots are live and
    /// [`PoolError::AllocationTooLarge`] when `data` does not fit a slot.
    pub fn allocate(&self, data: &[u8]) -> Result<SlotRef, PoolError> {
        self.allocate_parts(&[data])
    }

    /// Allocate a slot holding the concatenation of `parts`
    ///
    /// Lets the pool layer prepend a metadata prefix without assembling an
    /// intermediate buffer.
    pub fn allocate_parts(&self, parts: &[&[u8]]) -> Result<SlotRef, PoolError> {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if total > self.slot_size {
            return Err(PoolError::AllocationTooLarge {
                requested: total,
                capacity: self.slot_size,
            });
        }

        let mut inner = self.inner.lock();

        if let Some(idx) = inner.free.pop() {
            let slot = &mut inner.slots[idx as usize];
            debug_assert_eq!(slot.refcount, 0, "free-list slot must be unreferenced");

            match Arc::get_mut(&mut slot.bytes) {
                Some(buf) => {
                    // Sole owner: recycle the buffer in place
                    buf.clear();
                    for part in parts {
                        buf.extend_from_slice(part);
                    }
                }
                None => {
                    // A stale view still holds the old bytes; give the slot
                    // a fresh buffer so those bytes are never overwritten
                    let mut buf = Vec::with_capacity(self.slot_size);
                    for part in parts {
                        buf.extend_from_slice(part);
                    }
                    slot.bytes = Arc::new(buf);
                }
            }

            slot.refcount = 1;
            let generation = slot.generation;
            inner.live_refs += 1;
            return Ok(SlotRef {
                slot: idx,
                generation,
            });
        }

        if inner.slots.len() >= self.max_slots {
            metrics::ARENA_EXHAUSTED_TOTAL.inc();
            warn!(
                slot_size = self.slot_size,
                max_slots = self.max_slots,
                "arena exhausted; rejecting allocation"
            );
            return Err(PoolError::ArenaExhausted {
                capacity: self.max_slots,
                slot_size: self.slot_size,
            });
        }

        let mut buf = Vec::with_capacity(self.slot_size);
        for part in parts {
            buf.extend_from_slice(part);
        }
        let idx = inner.slots.len() as u32;
        inner.slots.push(Slot {
            bytes: Arc::new(buf),
            refcount: 1,
            generation: 0,
        });
        inner.live_refs += 1;
        Ok(SlotRef {
            slot: idx,
            generation: 0,
        })
    }

    /// Increment the reference count behind `handle`
    ///
    /// No-op on content. Fails with [`PoolError::StaleHandle`] if the
    /// handle's slot lifetime has already ended.
    pub fn retain(&self, handle: &SlotRef) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        let slot = Self::live_slot(&mut inner, handle)?;
        slot.refcount += 1;
        inner.live_refs += 1;
        Ok(())
    }

    /// Decrement the reference count behind `handle`
    ///
    /// Returns `true` when the count reached zero and the slot was returned
    /// to the free list. A release through a handle whose slot already
    /// reached zero reports [`PoolError::DoubleRelease`].
    pub fn release(&self, handle: &SlotRef) -> Result<bool, PoolError> {
        let mut inner = self.inner.lock();

        let valid = inner
            .slots
            .get(handle.slot as usize)
            .map(|s| s.generation == handle.generation && s.refcount > 0)
            .unwrap_or(false);
        if !valid {
            metrics::DOUBLE_RELEASE_TOTAL.inc();
            warn!(
                slot = handle.slot,
                generation = handle.generation,
                "release of an already-freed slot"
            );
            return Err(PoolError::DoubleRelease {
                slot: handle.slot,
                generation: handle.generation,
            });
        }

        let slot = &mut inner.slots[handle.slot as usize];
        slot.refcount -= 1;
        inner.live_refs -= 1;
        if inner.slots[handle.slot as usize].refcount == 0 {
            // End of this slot lifetime: outstanding handles go stale
            inner.slots[handle.slot as usize].generation =
                inner.slots[handle.slot as usize].generation.wrapping_add(1);
            inner.free.push(handle.slot);
            return Ok(true);
        }
        Ok(false)
    }

    /// A shared view of the slot bytes behind `handle`
    ///
    /// The clone stays valid (and immutable) even if the slot is later
    /// freed and reused; in that case it holds the old bytes, detached from
    /// the arena.
    pub fn bytes(&self, handle: &SlotRef) -> Result<Arc<Vec<u8>>, PoolError> {
        let mut inner = self.inner.lock();
        let slot = Self::live_slot(&mut inner, handle)?;
        Ok(Arc::clone(&slot.bytes))
    }

    /// Sum of refcounts across all slots (diagnostics)
    pub fn live_refs(&self) -> i64 {
        self.inner.lock().live_refs
    }

    /// Number of slots currently on the free list
    pub fn free_slots(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Total slots allocated from the backing store so far
    pub fn total_slots(&self) -> usize {
        self.inner.lock().slots.len()
    }

    fn live_slot<'a>(
        inner: &'a mut ArenaInner,
        handle: &SlotRef,
    ) -> Result<&'a mut Slot, PoolError> {
        let slot = inner
            .slots
            .get_mut(handle.slot as usize)
            .ok_or(PoolError::StaleHandle {
                slot: handle.slot,
                generation: handle.generation,
            })?;
        if slot.generation != handle.generation || slot.refcount == 0 {
            return Err(PoolError::StaleHandle {
                slot: handle.slot,
                generation: handle.generation,
            });
        }
        Ok(slot)
    }
}
