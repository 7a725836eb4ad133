//! Page-Fault Handler (spec.md §4.3): dispatches a hardware page fault to
//! an existing SPTE, stack growth, or process termination. Grounded on
//! spec.md's explicit four-step dispatch; `original_source` spreads the
//! same logic across `userprog/exception.c` (not included in the
//! retrieved source set) and `vm/page.c`'s `get_spte`/`load_spte`.

use crate::param::{PAGE_SIZE, PHYS_BASE, STACK_FAULT_HEURISTIC, STACK_GROWTH_LIMIT_PAGES};
use crate::vm::addr::UserVirtAddr;
use crate::vm::frame::FrameTable;
use crate::vm::hw::{HardwarePageTable, Pid};
use crate::vm::spt::SptTable;
use crate::vm::swap::SwapTable;
use crate::device::BlockDevice;

/// What the trap handler should do after a fault has been dispatched.
#[derive(Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    Resume,
    /// Terminate the faulting process with exit status -1 (spec.md §7).
    Terminate,
}

/// The access that faulted: whether it was a write, and whether it
/// originated from user mode (spec.md §4.3 step 1 only needs to know
/// `addr` is a user address; the write/user split governs steps 2-3).
pub struct FaultAccess {
    pub addr: UserVirtAddr,
    pub esp: UserVirtAddr,
    pub is_write: bool,
}

/// Dispatches one page fault per spec.md §4.3's four-step rule.
pub fn handle_fault(
    access: &FaultAccess,
    owner: Pid,
    spt: &SptTable,
    frame_table: &FrameTable,
    hw: &dyn HardwarePageTable,
    swap: &SwapTable,
    swap_device: &dyn BlockDevice,
) -> FaultOutcome {
    if access.addr.as_usize() >= PHYS_BASE {
        return FaultOutcome::Terminate;
    }

    if let Some(spte) = spt.lookup(access.addr) {
        if access.is_write && !spte.writable() {
            return FaultOutcome::Terminate;
        }
        spt.load(&spte, frame_table, hw, swap, swap_device);
        return FaultOutcome::Resume;
    }

    if is_plausible_stack_access(access.addr, access.esp) {
        spt.alloc_stack_spte(access.addr, frame_table, hw, swap, swap_device);
        return FaultOutcome::Resume;
    }

    FaultOutcome::Terminate
}

/// spec.md §4.3 step 3: `addr >= esp - 32` and `addr < PHYS_BASE`, and
/// the resulting stack must stay under the absolute growth cap.
fn is_plausible_stack_access(addr: UserVirtAddr, esp: UserVirtAddr) -> bool {
    if addr.as_usize() >= PHYS_BASE {
        return false;
    }
    let floor = esp.as_usize().saturating_sub(STACK_FAULT_HEURISTIC);
    if addr.as_usize() < floor {
        return false;
    }
    let growth_floor = PHYS_BASE.saturating_sub(STACK_GROWTH_LIMIT_PAGES * PAGE_SIZE);
    addr.as_usize() >= growth_floor
}
