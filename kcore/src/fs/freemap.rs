//! Free-sector bitmap (spec.md §3, §6): "bitmap covering every sector of
//! the file-system device." `original_source/filesys/free-map.c` persists
//! this bitmap in its own file at sector 0; `FileSystem::format` writes a
//! same-shaped inode there (spec.md §6's disk layout), but the bitmap
//! itself lives as in-memory singleton state guarded by one lock (spec.md
//! §9's "Global mutable state ... each is a singleton module with an
//! init/teardown pair and an internal lock"), since round-tripping every
//! `allocate`/`release` through the inode layer it allocates sectors
//! *for* would be circular without a mount-time scan this spec doesn't
//! otherwise need.

use kcore_support::Spinlock;

use crate::bitset::Bitset;
use crate::error::{KernelError, KernelResult};

pub struct FreeMap {
    inner: Spinlock<Bitset>,
}

impl FreeMap {
    /// `reserved` sectors (the free-map and root-directory inodes, per
    /// spec.md §6's disk layout) start pre-allocated.
    pub fn new(sector_count: usize, reserved: &[u32]) -> Self {
        let mut bits = Bitset::new(sector_count);
        for &sector in reserved {
            bits.set(sector as usize, true);
        }
        Self {
            inner: Spinlock::new(bits),
        }
    }

    pub fn allocate(&self) -> KernelResult<u32> {
        self.inner
            .lock()
            .scan_and_flip(true)
            .map(|index| index as u32)
            .ok_or(KernelError::NoSpace)
    }

    pub fn release(&self, sector: u32) {
        self.inner.lock().set(sector as usize, false);
    }

    pub fn is_free(&self, sector: u32) -> bool {
        !self.inner.lock().test(sector as usize)
    }

    /// Byte length of the on-disk free-map file (spec.md §6: the bitmap
    /// is persisted as its own file at `FREE_MAP_SECTOR`), one bit per
    /// sector rounded up to a whole byte.
    pub fn byte_len(&self) -> usize {
        self.inner.lock().len().div_ceil(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_sectors_are_not_handed_out() {
        let free_map = FreeMap::new(4, &[0, 1]);
        let first = free_map.allocate().unwrap();
        let second = free_map.allocate().unwrap();
        assert_eq!(first, 2);
        assert_eq!(second, 3);
        assert!(free_map.allocate().is_err());
    }

    #[test]
    fn released_sectors_are_reused() {
        let free_map = FreeMap::new(2, &[]);
        let sector = free_map.allocate().unwrap();
        free_map.release(sector);
        assert!(free_map.is_free(sector));
        assert_eq!(free_map.allocate().unwrap(), sector);
    }
}
