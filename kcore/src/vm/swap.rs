//! Swap Table (spec.md §4.1): a fixed-size bitmap over swap-device slots,
//! each slot sized to one page. Grounded on `original_source/vm/swap.c`'s
//! `swap_to_disk`/`swap_from_disk`/`swap_clear`, generalized from a free
//! function trio under one global lock to a struct wrapping
//! `kcore_support::Spinlock`.

use kcore_support::Spinlock;

use crate::bitset::Bitset;
use crate::device::BlockDevice;
use crate::param::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};

/// Index of a page-sized slot on the swap device.
pub type SwapSlot = usize;

struct Inner {
    occupied: Bitset,
}

/// The swap table. One instance per kernel; `spec.md` §5 calls this "a
/// single lock" shared by bit flips and device I/O.
pub struct SwapTable {
    inner: Spinlock<Inner>,
}

impl SwapTable {
    /// `device` must expose at least `slot_count * SECTORS_PER_PAGE`
    /// sectors (`original_source`'s `bitmap_create(block_size(...) /
    /// SECTORS_IN_PAGE)`).
    pub fn new(device: &dyn BlockDevice) -> Self {
        let slot_count = device.sector_count() / SECTORS_PER_PAGE;
        Self {
            inner: Spinlock::new(Inner {
                occupied: Bitset::new(slot_count),
            }),
        }
    }

    /// Atomically claims the first free slot, writes `frame` to it sector
    /// by sector, then zeroes `frame` so a stale copy of its contents
    /// cannot leak through a later eviction (spec.md §4.1). `None` when
    /// the table is full (`original_source`'s `BITMAP_ERROR`).
    pub fn reserve_and_write(&self, device: &dyn BlockDevice, frame: &mut [u8]) -> Option<SwapSlot> {
        assert_eq!(frame.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();
        let slot = inner.occupied.scan_and_flip(true)?;
        let base_sector = slot * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &frame[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            device.write_sector(base_sector + i, chunk);
        }
        frame.fill(0);
        Some(slot)
    }

    /// Reads `slot` back into `frame` and releases it. Panics if `slot`
    /// is not occupied — a fatal invariant violation per spec.md §4.1,
    /// matching `original_source`'s `PANIC("Frame not found in swap
    /// disk.\n")`.
    pub fn read_into(&self, device: &dyn BlockDevice, slot: SwapSlot, frame: &mut [u8]) {
        assert_eq!(frame.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();
        assert!(inner.occupied.test(slot), "swap slot {slot} is not occupied");
        let base_sector = slot * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &mut frame[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            device.read_sector(base_sector + i, chunk);
        }
        inner.occupied.set(slot, false);
    }

    /// Releases `slot` without reading it back (`swap_clear` in
    /// `original_source`, used when a swapped-out SPTE is destroyed
    /// without ever being faulted back in).
    pub fn release(&self, slot: SwapSlot) {
        let mut inner = self.inner.lock();
        inner.occupied.set(slot, false);
    }

    /// Number of slots currently occupied — used by the
    /// `sum(swap bitmap) = count(SPTE.in_swap)` testable property
    /// (spec.md §8).
    pub fn occupied_count(&self) -> usize {
        let inner = self.inner.lock();
        (0..inner.occupied.len()).filter(|&i| inner.occupied.test(i)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;

    fn device() -> MemBlockDevice {
        MemBlockDevice::new(SECTORS_PER_PAGE * 4)
    }

    #[test]
    fn write_then_read_round_trips_and_clears_the_slot() {
        let dev = device();
        let table = SwapTable::new(&dev);
        let mut frame = vec![0xAB; PAGE_SIZE];
        let slot = table.reserve_and_write(&dev, &mut frame).unwrap();
        assert!(frame.iter().all(|&b| b == 0), "source frame must be zeroed after swap-out");
        assert_eq!(table.occupied_count(), 1);

        let mut dest = vec![0u8; PAGE_SIZE];
        table.read_into(&dev, slot, &mut dest);
        assert!(dest.iter().all(|&b| b == 0xAB));
        assert_eq!(table.occupied_count(), 0);
    }

    #[test]
    fn reserve_and_write_returns_none_when_full() {
        let dev = device();
        let table = SwapTable::new(&dev);
        let mut frame = vec![0u8; PAGE_SIZE];
        for _ in 0..4 {
            table.reserve_and_write(&dev, &mut frame.clone()).unwrap();
        }
        assert!(table.reserve_and_write(&dev, &mut frame).is_none());
    }

    #[test]
    #[should_panic]
    fn read_into_an_unoccupied_slot_panics() {
        let dev = device();
        let table = SwapTable::new(&dev);
        let mut frame = vec![0u8; PAGE_SIZE];
        table.read_into(&dev, 0, &mut frame);
    }

    #[test]
    fn release_frees_the_slot_without_reading() {
        let dev = device();
        let table = SwapTable::new(&dev);
        let mut frame = vec![0u8; PAGE_SIZE];
        let slot = table.reserve_and_write(&dev, &mut frame).unwrap();
        table.release(slot);
        assert_eq!(table.occupied_count(), 0);
    }
}
