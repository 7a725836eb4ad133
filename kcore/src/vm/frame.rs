//! Frame Table (spec.md §4.2): exclusive owner of the physical user-pool
//! frames, responsible for binding an SPTE to a frame and for eviction
//! when none are free. Grounded on `original_source/vm/frame.c`
//! (`frame_get`/`frame_map`/`frame_evict`/`frame_table_clear`); the
//! eviction scan is tightened to spec.md's explicit "not-mine, not-stack,
//! else reverse-scan any non-stack frame, else panic" policy rather than
//! the original's hardcoded "frame 50" fallback.

use kcore_support::Spinlock;

use crate::device::BlockDevice;
use crate::page::Page;
use crate::vm::hw::{HardwarePageTable, Pid};
use crate::vm::spt::Spte;
use crate::vm::swap::SwapTable;

pub type FrameIndex = usize;

struct FrameSlot {
    owner: Option<Pid>,
    spte: Option<Spte>,
}

/// A fixed-length array of physical user-pool frames (spec.md §2).
pub struct FrameTable {
    slots: Spinlock<Vec<FrameSlot>>,
    memory: Vec<Spinlock<Page>>,
}

impl FrameTable {
    pub fn new(frame_count: usize) -> Self {
        Self {
            slots: Spinlock::new((0..frame_count).map(|_| FrameSlot { owner: None, spte: None }).collect()),
            memory: (0..frame_count).map(|_| Spinlock::new(Page::zeroed())).collect(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.memory.len()
    }

    /// Direct access to a frame's backing bytes, used by the SPT to zero
    /// a fresh stack page or to read file contents into place — done
    /// outside the slot lock, per spec.md §5's "release the frame-table
    /// lock before issuing the file read".
    pub fn frame_data(&self, index: FrameIndex) -> &Spinlock<Page> {
        &self.memory[index]
    }

    /// Binds `spte` to a frame, evicting a victim if none is free. Reads
    /// the frame back from swap first if `spte` was swapped out. Installs
    /// the hardware mapping and marks `spte` valid before returning the
    /// bound frame's index (spec.md §4.2's `bind`).
    pub fn bind(
        &self,
        spte: &Spte,
        owner: Pid,
        hw: &dyn HardwarePageTable,
        swap: &SwapTable,
        swap_device: &dyn BlockDevice,
    ) -> FrameIndex {
        let index = {
            let mut slots = self.slots.lock();
            let free = slots.iter().position(|slot| slot.owner.is_none());
            let index = match free {
                Some(index) => index,
                None => self.evict_locked(&mut slots, owner, hw, swap, swap_device),
            };
            slots[index] = FrameSlot {
                owner: Some(owner),
                spte: Some(spte.clone()),
            };
            index
        };

        if let Some(slot) = spte.take_in_swap() {
            swap.read_into(swap_device, slot, &mut self.memory[index].lock()[..]);
        }

        let installed = hw.map(owner, spte.page(), index, spte.writable());
        assert!(installed, "frame {index}'s page was already mapped before bind completed");
        spte.set_valid(true);
        index
    }

    /// spec.md §4.2 `evict`: scan for a frame owned by some other process
    /// whose SPTE is not `is_stack`; failing that, reverse-scan for any
    /// non-stack frame; failing that, panic — the design never spills
    /// stack pages (spec.md §9).
    fn evict_locked(
        &self,
        slots: &mut [FrameSlot],
        requester: Pid,
        hw: &dyn HardwarePageTable,
        swap: &SwapTable,
        swap_device: &dyn BlockDevice,
    ) -> FrameIndex {
        let victim = slots
            .iter()
            .position(|slot| {
                slot.owner.is_some_and(|owner| owner != requester)
                    && slot.spte.as_ref().is_some_and(|spte| !spte.is_stack())
            })
            .or_else(|| {
                slots
                    .iter()
                    .enumerate()
                    .rev()
                    .find(|(_, slot)| slot.spte.as_ref().is_some_and(|spte| !spte.is_stack()))
                    .map(|(index, _)| index)
            })
            .expect("no evictable frame: every frame holds a stack page");

        let victim_owner = slots[victim].owner.expect("victim frame must be owned");
        let victim_spte = slots[victim].spte.take().expect("victim frame must be bound");
        hw.unmap(victim_owner, victim_spte.page());

        let slot_index = {
            let mut frame = self.memory[victim].lock();
            swap.reserve_and_write(swap_device, &mut frame[..])
                .expect("swap exhausted during eviction")
        };
        victim_spte.mark_swapped(slot_index);
        slots[victim].owner = None;
        victim
    }

    /// Finds the frame currently bound to `spte` under `owner` (spec.md
    /// §9 "arena + index": callers that need the raw bytes behind an
    /// already-bound SPTE, such as the loader writing the initial stack
    /// contents, look the index up rather than holding onto it
    /// themselves).
    pub fn index_of(&self, owner: Pid, spte: &Spte) -> Option<FrameIndex> {
        self.slots
            .lock()
            .iter()
            .position(|slot| slot.owner == Some(owner) && slot.spte.as_ref().is_some_and(|bound| bound.ptr_eq(spte)))
    }

    /// Marks every frame owned by `owner` unowned and forgets its SPTE
    /// back-pointer (spec.md §4.2 `release_all`; called at process exit).
    pub fn release_all(&self, owner: Pid) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.owner == Some(owner) {
                slot.owner = None;
                slot.spte = None;
            }
        }
    }
}
