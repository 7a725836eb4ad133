//! The hardware page directory the SPT overlays (spec.md §1: "the
//! lower-level hardware page directory that the SPT overlays" is an
//! external collaborator). `HardwarePageTable` is the consumed interface:
//! map/unmap a user page to a physical frame, and query whether a page
//! is mapped and writable. `TestPageTable` is a `HashMap`-backed stand-in
//! used by the test suite and by any embedder that hasn't wired in a
//! real MMU driver.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::vm::addr::UserVirtAddr;

pub type Pid = u32;

/// Per-process hardware page-table operations consumed by the Frame
/// Table and the page-fault handler (spec.md §4.2, §4.3).
pub trait HardwarePageTable: Send + Sync {
    /// Installs a mapping from `page` to `frame` in `owner`'s address
    /// space with the given writability. Returns `false` if `page` is
    /// already mapped in `owner`'s space (spec.md's `frame_map`
    /// precondition, via `original_source/vm/frame.c`).
    fn map(&self, owner: Pid, page: UserVirtAddr, frame: usize, writable: bool) -> bool;

    /// Removes `owner`'s mapping for `page`, if any.
    fn unmap(&self, owner: Pid, page: UserVirtAddr);

    /// Whether `owner` currently has `page` mapped.
    fn is_mapped(&self, owner: Pid, page: UserVirtAddr) -> bool;

    /// Whether `owner`'s mapping for `page` is writable. `false` if
    /// unmapped.
    fn is_writable(&self, owner: Pid, page: UserVirtAddr) -> bool;
}

#[derive(Clone, Copy)]
struct Mapping {
    frame: usize,
    writable: bool,
}

/// A `HashMap`-backed `HardwarePageTable`, standing in for real MMU
/// hardware in tests.
#[derive(Default)]
pub struct TestPageTable {
    mappings: Mutex<HashMap<(Pid, UserVirtAddr), Mapping>>,
}

impl TestPageTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HardwarePageTable for TestPageTable {
    fn map(&self, owner: Pid, page: UserVirtAddr, frame: usize, writable: bool) -> bool {
        let mut mappings = self.mappings.lock().unwrap();
        if mappings.contains_key(&(owner, page)) {
            return false;
        }
        mappings.insert((owner, page), Mapping { frame, writable });
        true
    }

    fn unmap(&self, owner: Pid, page: UserVirtAddr) {
        self.mappings.lock().unwrap().remove(&(owner, page));
    }

    fn is_mapped(&self, owner: Pid, page: UserVirtAddr) -> bool {
        self.mappings.lock().unwrap().contains_key(&(owner, page))
    }

    fn is_writable(&self, owner: Pid, page: UserVirtAddr) -> bool {
        self.mappings
            .lock()
            .unwrap()
            .get(&(owner, page))
            .is_some_and(|m| m.writable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_refuses_to_overwrite_an_existing_mapping() {
        let pt = TestPageTable::new();
        let page = UserVirtAddr::new(0x1000);
        assert!(pt.map(1, page, 5, true));
        assert!(!pt.map(1, page, 6, true));
        assert!(pt.is_mapped(1, page));
        assert!(pt.is_writable(1, page));
    }

    #[test]
    fn unmap_clears_the_mapping() {
        let pt = TestPageTable::new();
        let page = UserVirtAddr::new(0x2000);
        pt.map(1, page, 0, false);
        pt.unmap(1, page);
        assert!(!pt.is_mapped(1, page));
        assert!(!pt.is_writable(1, page));
    }
}
