//! Demand-paged user virtual memory (spec.md §3-4): the Supplemental
//! Page Table, Frame Table, Swap Table, and the page-fault dispatch that
//! ties them together, plus the hardware page-directory boundary they
//! overlay.

pub mod addr;
pub mod fault;
pub mod frame;
pub mod hw;
pub mod spt;
pub mod swap;

pub use addr::UserVirtAddr;
pub use fault::{handle_fault, FaultAccess, FaultOutcome};
pub use frame::{FrameIndex, FrameTable};
pub use hw::{HardwarePageTable, Pid, TestPageTable};
pub use spt::{PageBackingFile, Spte, SptTable};
pub use swap::{SwapSlot, SwapTable};
