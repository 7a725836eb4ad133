//! Supplemental Page Table (spec.md §3, §4.3): per-process virtual-page
//! metadata independent of the hardware PTEs. Grounded on
//! `original_source/vm/page.c` (`alloc_code_spte`/`alloc_blank_spte`/
//! `load_spte`/`get_spte`), generalized from a single global `spt` list
//! per `thread_current()` to an explicit `SptTable` owned by each
//! process's control block.
//!
//! An SPTE is shared, mutable state: the Frame Table's eviction scan
//! needs to flip the same entry the SPT hands back from `lookup`. Rather
//! than port `kernel-rs`'s branded/pinned unsafe arena for that sharing,
//! `Spte` is a plain `Arc<Spinlock<SpteState>>` handle — safe, and
//! faithful to spec.md §9's "arena + index" intent at the Frame Table
//! level, where frames are still a flat array indexed by frame number.

use std::collections::HashMap;
use std::sync::Arc;

use kcore_support::Spinlock;

use crate::device::BlockDevice;
use crate::param::PAGE_SIZE;
use crate::vm::addr::UserVirtAddr;
use crate::vm::frame::FrameTable;
use crate::vm::hw::{HardwarePageTable, Pid};
use crate::vm::swap::{SwapSlot, SwapTable};

/// The file an SPTE lazily reads from, consumed through this trait so
/// that `kcore::vm` never depends on `kcore::fs` directly (spec.md §1
/// keeps the filesystem and the VM as separate cooperating subsystems).
pub trait PageBackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number actually read (spec.md §4.3: `read_bytes` may come up short
    /// only at end of file, the remainder is zero-filled by the caller).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;
}

#[derive(Clone)]
enum SpteOrigin {
    Anonymous,
    Stack,
    File(FileBacking),
}

#[derive(Clone)]
struct FileBacking {
    file: Arc<dyn PageBackingFile>,
    offset: u64,
    read_bytes: usize,
    zero_bytes: usize,
    has_been_loaded: bool,
}

struct SpteState {
    page: UserVirtAddr,
    writable: bool,
    valid: bool,
    in_swap: bool,
    swap_slot: Option<SwapSlot>,
    origin: SpteOrigin,
    accessed: bool,
    dirty: bool,
}

/// A shared handle to one supplemental page-table entry.
#[derive(Clone)]
pub struct Spte(Arc<Spinlock<SpteState>>);

impl Spte {
    fn new(page: UserVirtAddr, writable: bool, origin: SpteOrigin) -> Self {
        Self(Arc::new(Spinlock::new(SpteState {
            page,
            writable,
            valid: false,
            in_swap: false,
            swap_slot: None,
            origin,
            accessed: false,
            dirty: false,
        })))
    }

    /// Used directly by tests and by `SptTable::alloc_stack_spte`.
    pub fn new_stack(page: UserVirtAddr) -> Self {
        Self::new(page, true, SpteOrigin::Stack)
    }

    pub fn page(&self) -> UserVirtAddr {
        self.0.lock().page
    }

    pub fn writable(&self) -> bool {
        self.0.lock().writable
    }

    pub fn valid(&self) -> bool {
        self.0.lock().valid
    }

    pub fn in_swap(&self) -> bool {
        self.0.lock().in_swap
    }

    pub fn is_stack(&self) -> bool {
        matches!(self.0.lock().origin, SpteOrigin::Stack)
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.0.lock().origin, SpteOrigin::File(_))
    }

    /// Whether `self` and `other` are handles to the same entry, used by
    /// [`FrameTable::index_of`](crate::vm::frame::FrameTable::index_of)
    /// to recover which frame an already-bound SPTE lives in.
    pub fn ptr_eq(&self, other: &Spte) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.0.lock().valid = valid;
    }

    /// If swapped out, clears the flag and returns the slot to read back
    /// from; `None` otherwise. Called once by `FrameTable::bind`.
    pub(crate) fn take_in_swap(&self) -> Option<SwapSlot> {
        let mut state = self.0.lock();
        if state.in_swap {
            state.in_swap = false;
            state.swap_slot.take()
        } else {
            None
        }
    }

    /// Records that this SPTE now lives in `slot` on the swap device
    /// (spec.md §4.2 eviction: `in_swap = true, valid = false`).
    pub(crate) fn mark_swapped(&self, slot: SwapSlot) {
        let mut state = self.0.lock();
        state.in_swap = true;
        state.valid = false;
        state.swap_slot = Some(slot);
    }

    /// If file-backed and not yet loaded, marks it loaded and returns the
    /// backing details; `None` otherwise (idempotence for `load`).
    fn take_unloaded_file_backing(&self) -> Option<(Arc<dyn PageBackingFile>, u64, usize, usize)> {
        let mut state = self.0.lock();
        match &mut state.origin {
            SpteOrigin::File(backing) if !backing.has_been_loaded => {
                backing.has_been_loaded = true;
                Some((backing.file.clone(), backing.offset, backing.read_bytes, backing.zero_bytes))
            }
            _ => None,
        }
    }

    pub fn mark_accessed(&self) {
        self.0.lock().accessed = true;
    }

    pub fn mark_dirty(&self) {
        self.0.lock().dirty = true;
    }
}

/// Per-process collection of SPTEs, keyed by page base (spec.md §3: "at
/// most one SPTE per (process, page)").
pub struct SptTable {
    owner: Pid,
    entries: Spinlock<HashMap<UserVirtAddr, Spte>>,
}

impl SptTable {
    pub fn new(owner: Pid) -> Self {
        Self {
            owner,
            entries: Spinlock::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> Pid {
        self.owner
    }

    /// spec.md §4.3 `alloc_file_spte`: lazy mapping, no frame bound yet.
    pub fn alloc_file_spte(
        &self,
        page: UserVirtAddr,
        file: Arc<dyn PageBackingFile>,
        offset: u64,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) {
        assert_eq!(read_bytes + zero_bytes, PAGE_SIZE);
        let spte = Spte::new(
            page.page_base(),
            writable,
            SpteOrigin::File(FileBacking {
                file,
                offset,
                read_bytes,
                zero_bytes,
                has_been_loaded: false,
            }),
        );
        self.entries.lock().insert(page.page_base(), spte);
    }

    /// spec.md §4.3 `alloc_stack_spte`: eagerly bind a zeroed frame.
    pub fn alloc_stack_spte(
        &self,
        page: UserVirtAddr,
        frame_table: &FrameTable,
        hw: &dyn HardwarePageTable,
        swap: &SwapTable,
        swap_device: &dyn BlockDevice,
    ) -> Spte {
        let spte = Spte::new_stack(page.page_base());
        let index = frame_table.bind(&spte, self.owner, hw, swap, swap_device);
        frame_table.frame_data(index).lock().fill(0);
        self.entries.lock().insert(page.page_base(), spte.clone());
        spte
    }

    /// spec.md §4.3 `lookup`: exact match on page base.
    pub fn lookup(&self, fault_addr: UserVirtAddr) -> Option<Spte> {
        self.entries.lock().get(&fault_addr.page_base()).cloned()
    }

    /// spec.md §4.3 `load`: idempotent; binds a frame (handling swap-in),
    /// then for a file-backed page not yet loaded, reads `read_bytes`
    /// from the backing file and zero-fills the rest.
    pub fn load(
        &self,
        spte: &Spte,
        frame_table: &FrameTable,
        hw: &dyn HardwarePageTable,
        swap: &SwapTable,
        swap_device: &dyn BlockDevice,
    ) {
        if spte.valid() {
            return;
        }
        let index = frame_table.bind(spte, self.owner, hw, swap, swap_device);
        if let Some((file, offset, read_bytes, zero_bytes)) = spte.take_unloaded_file_backing() {
            let mut frame = frame_table.frame_data(index).lock();
            let actual = file.read_at(offset, &mut frame[..read_bytes]);
            frame[actual..read_bytes].fill(0);
            frame[read_bytes..read_bytes + zero_bytes].fill(0);
        }
    }

    /// spec.md §4.3 `destroy`: clears every hardware mapping, releases
    /// swap slots, then releases the process's frames.
    pub fn destroy(&self, frame_table: &FrameTable, hw: &dyn HardwarePageTable, swap: &SwapTable) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for spte in entries.into_values() {
            let state = spte.0.lock();
            if state.valid {
                hw.unmap(self.owner, state.page);
            }
            if let Some(slot) = state.swap_slot {
                if state.in_swap {
                    swap.release(slot);
                }
            }
        }
        frame_table.release_all(self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::param::SECTORS_PER_PAGE;
    use crate::vm::hw::TestPageTable;

    struct StaticFile(Vec<u8>);

    impl PageBackingFile for StaticFile {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
            let offset = offset as usize;
            if offset >= self.0.len() {
                return 0;
            }
            let n = buf.len().min(self.0.len() - offset);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            n
        }
    }

    fn rig() -> (FrameTable, TestPageTable, SwapTable, MemBlockDevice) {
        let dev = MemBlockDevice::new(SECTORS_PER_PAGE * 8);
        let swap = SwapTable::new(&dev);
        (FrameTable::new(4), TestPageTable::new(), swap, dev)
    }

    #[test]
    fn file_backed_load_reads_content_and_zero_fills_the_tail() {
        let (frames, hw, swap, dev) = rig();
        let spt = SptTable::new(1);
        let file: Arc<dyn PageBackingFile> = Arc::new(StaticFile(vec![9u8; 10]));
        let page = UserVirtAddr::new(0x5000);
        spt.alloc_file_spte(page, file, 0, 10, PAGE_SIZE - 10, true);

        let spte = spt.lookup(page).unwrap();
        spt.load(&spte, &frames, &hw, &swap, &dev);

        assert!(spte.valid());
        let bound_index = 0;
        let frame = frames.frame_data(bound_index).lock();
        assert!(frame[..10].iter().all(|&b| b == 9));
        assert!(frame[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn load_is_idempotent_for_an_already_valid_entry() {
        let (frames, hw, swap, dev) = rig();
        let spt = SptTable::new(1);
        let page = UserVirtAddr::new(0x6000);
        let spte = spt.alloc_stack_spte(page, &frames, &hw, &swap, &dev);
        spt.load(&spte, &frames, &hw, &swap, &dev);
        assert!(spte.valid());
    }

    #[test]
    fn destroy_releases_frames_and_swap_slots() {
        let (frames, hw, swap, dev) = rig();
        let spt = SptTable::new(7);
        let page = UserVirtAddr::new(0x7000);
        spt.alloc_stack_spte(page, &frames, &hw, &swap, &dev);
        spt.destroy(&frames, &hw, &swap);
        assert!(!hw.is_mapped(7, page));
    }
}
