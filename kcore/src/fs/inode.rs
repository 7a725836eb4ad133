//! On-disk inode, growth-on-write, and the open-inode registry
//! (spec.md §3, §4.4, §6). The on-disk layout is grounded on spec.md §6's
//! byte table; the block-addressing and growth algorithm follow
//! `original_source/filesys/inode.c`'s `byte_to_sector`/`inode_extend`
//! (direct/indirect/doubly-indirect tiers, three-phase growth, keep
//! already-allocated sectors on partial failure). The reference-counted
//! in-memory shape (`open_cnt`, `removed`, `deny_write_cnt`, one lock per
//! inode) follows `kernel-rs/src/fs/inode.rs`'s `Inode`/`InodeGuard`
//! split, collapsed to a single per-inode lock — spec.md §9 calls out the
//! extension-lock/fs-lock split as an implementation nicety, not an
//! externally testable property.

use std::collections::HashMap;
use std::sync::Arc;

use kcore_support::Spinlock;
use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::device::BlockDevice;
use crate::error::{KernelError, KernelResult};
use crate::fs::freemap::FreeMap;
use crate::param::{INODE_MAGIC, NDIRECT, NINDIRECT, SECTOR_SIZE};

/// On-disk inode (spec.md §6); exactly one sector.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct Dinode {
    pub length: u32,
    pub parent: u32,
    pub direct: [u32; NDIRECT],
    pub indirect: u32,
    pub doubly_indirect: u32,
    pub is_dir: u8,
    _pad: [u8; 3],
    pub magic: u32,
    _reserved: [u8; 440],
}

const_assert_eq!(std::mem::size_of::<Dinode>(), SECTOR_SIZE);

impl Dinode {
    fn new(length: u32, parent: u32, is_dir: bool) -> Self {
        let mut d = Dinode::new_zeroed();
        d.length = length;
        d.parent = parent;
        d.is_dir = is_dir as u8;
        d.magic = INODE_MAGIC;
        d
    }
}

/// One sector's worth of block pointers (spec.md §3: "single-indirect
/// blocks hold 128 data-sector pointers").
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
struct IndirectBlock {
    ptr: [u32; NINDIRECT],
}

const_assert_eq!(std::mem::size_of::<IndirectBlock>(), SECTOR_SIZE);

fn read_indirect(device: &dyn BlockDevice, sector: u32) -> IndirectBlock {
    let mut buf = [0u8; SECTOR_SIZE];
    device.read_sector(sector as usize, &mut buf);
    IndirectBlock::read_from(&buf[..]).expect("sector-sized buffer")
}

fn write_indirect(device: &dyn BlockDevice, sector: u32, block: &IndirectBlock) {
    device.write_sector(sector as usize, block.as_bytes());
}

struct InodeInner {
    data: Dinode,
    open_cnt: usize,
    removed: bool,
    deny_write_cnt: usize,
}

/// A reference-counted handle to one in-memory inode, shared across every
/// opener of the same sector (spec.md §3).
pub struct Inode {
    pub sector: u32,
    inner: Spinlock<InodeInner>,
}

impl Inode {
    fn from_disk(sector: u32, data: Dinode) -> Arc<Self> {
        Arc::new(Self {
            sector,
            inner: Spinlock::new(InodeInner {
                data,
                open_cnt: 1,
                removed: false,
                deny_write_cnt: 0,
            }),
        })
    }

    pub fn length(&self) -> usize {
        self.inner.lock().data.length as usize
    }

    pub fn is_dir(&self) -> bool {
        self.inner.lock().data.is_dir != 0
    }

    pub fn parent(&self) -> u32 {
        self.inner.lock().data.parent
    }

    pub fn deny_write(&self) {
        self.inner.lock().deny_write_cnt += 1;
    }

    pub fn allow_write(&self) {
        let mut inner = self.inner.lock();
        inner.deny_write_cnt = inner.deny_write_cnt.saturating_sub(1);
    }

    fn may_write(&self) -> bool {
        self.inner.lock().deny_write_cnt == 0
    }

    pub fn mark_removed(&self) {
        self.inner.lock().removed = true;
    }

    pub fn is_removed(&self) -> bool {
        self.inner.lock().removed
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().open_cnt
    }

    /// spec.md §4.4 `byte_to_sector`: direct/indirect/doubly-indirect
    /// dispatch by block index. Allocates missing pointers along the way
    /// when `allocate` is set (used by growth); otherwise returns `0` for
    /// an unallocated slot (a hole, which never occurs within `length`
    /// for a file grown only through `write_at`).
    fn block_sector(
        data: &mut Dinode,
        device: &dyn BlockDevice,
        free_map: &FreeMap,
        block_idx: usize,
        allocate: bool,
    ) -> KernelResult<u32> {
        if block_idx < NDIRECT {
            if data.direct[block_idx] == 0 && allocate {
                data.direct[block_idx] = free_map.allocate()?;
            }
            return Ok(data.direct[block_idx]);
        }

        if block_idx < NDIRECT + NINDIRECT {
            let idx = block_idx - NDIRECT;
            if data.indirect == 0 {
                if !allocate {
                    return Ok(0);
                }
                data.indirect = free_map.allocate()?;
                write_indirect(device, data.indirect, &IndirectBlock::new_zeroed());
            }
            let mut block = read_indirect(device, data.indirect);
            if block.ptr[idx] == 0 && allocate {
                block.ptr[idx] = free_map.allocate()?;
                write_indirect(device, data.indirect, &block);
            }
            return Ok(block.ptr[idx]);
        }

        let k = block_idx - (NDIRECT + NINDIRECT);
        let doubly_idx = k / NINDIRECT;
        let singly_idx = k % NINDIRECT;
        if data.doubly_indirect == 0 {
            if !allocate {
                return Ok(0);
            }
            data.doubly_indirect = free_map.allocate()?;
            write_indirect(device, data.doubly_indirect, &IndirectBlock::new_zeroed());
        }
        let mut doubly = read_indirect(device, data.doubly_indirect);
        if doubly.ptr[doubly_idx] == 0 {
            if !allocate {
                return Ok(0);
            }
            doubly.ptr[doubly_idx] = free_map.allocate()?;
            write_indirect(device, doubly.ptr[doubly_idx], &IndirectBlock::new_zeroed());
            write_indirect(device, data.doubly_indirect, &doubly);
        }
        let mut inner = read_indirect(device, doubly.ptr[doubly_idx]);
        if inner.ptr[singly_idx] == 0 && allocate {
            inner.ptr[singly_idx] = free_map.allocate()?;
            write_indirect(device, doubly.ptr[doubly_idx], &inner);
        }
        Ok(inner.ptr[singly_idx])
    }

    /// spec.md §4.4 "Growth on write": extends `length` to at least
    /// `target_len`, allocating any missing direct/indirect/doubly-
    /// indirect sectors. Already-allocated sectors from this call are
    /// kept even if a later allocation in the same call fails — the
    /// length is still raised to `target_len` (spec.md §9).
    fn grow_to(data: &mut Dinode, device: &dyn BlockDevice, free_map: &FreeMap, target_len: usize) -> KernelResult<()> {
        let old_blocks = (data.length as usize).div_ceil(SECTOR_SIZE);
        let new_blocks = target_len.div_ceil(SECTOR_SIZE);
        let mut result = Ok(());
        for block_idx in old_blocks..new_blocks {
            if let Err(e) = Self::block_sector(data, device, free_map, block_idx, true) {
                result = Err(e);
                break;
            }
        }
        data.length = data.length.max(target_len as u32);
        result
    }

    /// spec.md §4.4 "Read": clipped to `length`; a read straddling a
    /// sector uses a bounce sector.
    pub fn read_at(&self, device: &dyn BlockDevice, free_map: &FreeMap, offset: usize, buf: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let length = inner.data.length as usize;
        if offset >= length {
            return 0;
        }
        let want = buf.len().min(length - offset);
        let mut done = 0;
        while done < want {
            let pos = offset + done;
            let block_idx = pos / SECTOR_SIZE;
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(want - done);
            let sector = Self::block_sector(&mut inner.data, device, free_map, block_idx, false).unwrap_or(0);
            let mut bounce = [0u8; SECTOR_SIZE];
            if sector != 0 {
                device.read_sector(sector as usize, &mut bounce);
            }
            buf[done..done + chunk].copy_from_slice(&bounce[sector_off..sector_off + chunk]);
            done += chunk;
        }
        done
    }

    /// spec.md §4.4 "Growth on write". Returns `0` (not an error) when
    /// writes are currently denied (spec.md's deny-write semantics).
    pub fn write_at(&self, device: &dyn BlockDevice, free_map: &FreeMap, offset: usize, buf: &[u8]) -> KernelResult<usize> {
        if !self.may_write() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let target_len = offset + buf.len();
        if target_len > (inner.data.length as usize) {
            Self::grow_to(&mut inner.data, device, free_map, target_len)?;
        }

        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let block_idx = pos / SECTOR_SIZE;
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(buf.len() - done);
            let sector = Self::block_sector(&mut inner.data, device, free_map, block_idx, true)?;
            let mut bounce = [0u8; SECTOR_SIZE];
            if chunk != SECTOR_SIZE {
                device.read_sector(sector as usize, &mut bounce);
            }
            bounce[sector_off..sector_off + chunk].copy_from_slice(&buf[done..done + chunk]);
            device.write_sector(sector as usize, &bounce);
            done += chunk;
        }
        Ok(done)
    }

    fn flush(&self, device: &dyn BlockDevice) {
        let inner = self.inner.lock();
        device.write_sector(self.sector as usize, inner.data.as_bytes());
    }

    /// Releases every sector this inode referenced: data sectors, any
    /// indirect/doubly-indirect blocks, and the inode sector itself
    /// (`inode_dealloc` in `original_source`).
    fn deallocate(&self, device: &dyn BlockDevice, free_map: &FreeMap) {
        let inner = self.inner.lock();
        let data = &inner.data;
        let total_blocks = (data.length as usize).div_ceil(SECTOR_SIZE);
        for block_idx in 0..total_blocks.min(NDIRECT) {
            if data.direct[block_idx] != 0 {
                free_map.release(data.direct[block_idx]);
            }
        }
        if data.indirect != 0 {
            let block = read_indirect(device, data.indirect);
            for &sector in block.ptr.iter() {
                if sector != 0 {
                    free_map.release(sector);
                }
            }
            free_map.release(data.indirect);
        }
        if data.doubly_indirect != 0 {
            let doubly = read_indirect(device, data.doubly_indirect);
            for &indirect_sector in doubly.ptr.iter() {
                if indirect_sector != 0 {
                    let block = read_indirect(device, indirect_sector);
                    for &sector in block.ptr.iter() {
                        if sector != 0 {
                            free_map.release(sector);
                        }
                    }
                    free_map.release(indirect_sector);
                }
            }
            free_map.release(data.doubly_indirect);
        }
        free_map.release(self.sector);
    }
}

/// Open-inode registry (spec.md §4.4): `open_cnt > 0 <=> present`.
pub struct InodeTable {
    open: Spinlock<HashMap<u32, Arc<Inode>>>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            open: Spinlock::new(HashMap::new()),
        }
    }

    /// Writes a fresh inode of `length` bytes to `sector`, allocating its
    /// data sectors up front (spec.md §4.4 `create`'s inode-construction
    /// step).
    pub fn format_inode(
        &self,
        device: &dyn BlockDevice,
        free_map: &FreeMap,
        sector: u32,
        length: usize,
        parent: u32,
        is_dir: bool,
    ) -> KernelResult<()> {
        let mut data = Dinode::new(0, parent, is_dir);
        Inode::grow_to(&mut data, device, free_map, length)?;
        device.write_sector(sector as usize, data.as_bytes());
        Ok(())
    }

    /// spec.md §4.4 `inode_open`: returns an existing handle with
    /// incremented open count if present; otherwise reads the sector.
    pub fn open(&self, device: &dyn BlockDevice, sector: u32) -> Arc<Inode> {
        let mut open = self.open.lock();
        if let Some(existing) = open.get(&sector) {
            existing.inner.lock().open_cnt += 1;
            return existing.clone();
        }
        let mut buf = [0u8; SECTOR_SIZE];
        device.read_sector(sector as usize, &mut buf);
        let data = Dinode::read_from(&buf[..]).expect("sector-sized buffer");
        let inode = Inode::from_disk(sector, data);
        open.insert(sector, inode.clone());
        inode
    }

    /// spec.md §4.4 `inode_close`: decrements; at zero, deallocates if
    /// removed, else flushes the cached image.
    pub fn close(&self, device: &dyn BlockDevice, free_map: &FreeMap, inode: Arc<Inode>) {
        let mut open = self.open.lock();
        let last = {
            let mut guard = inode.inner.lock();
            guard.open_cnt -= 1;
            guard.open_cnt == 0
        };
        if last {
            open.remove(&inode.sector);
            if inode.is_removed() {
                inode.deallocate(device, free_map);
            } else {
                inode.flush(device);
            }
        }
    }

    pub fn is_open(&self, sector: u32) -> bool {
        self.open.lock().contains_key(&sector)
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::param::MAX_FILE_SIZE;

    fn rig() -> (MemBlockDevice, FreeMap) {
        let dev = MemBlockDevice::new(4096);
        let free_map = FreeMap::new(4096, &[0, 1]);
        (dev, free_map)
    }

    #[test]
    fn write_then_read_back_round_trips() {
        let (dev, free_map) = rig();
        let table = InodeTable::new();
        table.format_inode(&dev, &free_map, 2, 0, 1, false).unwrap();
        let inode = table.open(&dev, 2);

        let written = inode.write_at(&dev, &free_map, 10, b"hello").unwrap();
        assert_eq!(written, 5);
        assert_eq!(inode.length(), 15);

        let mut buf = [0u8; 5];
        let read = inode.read_at(&dev, &free_map, 10, &mut buf);
        assert_eq!(read, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_across_the_doubly_indirect_boundary_allocates_correctly() {
        let dev = MemBlockDevice::new(MAX_FILE_SIZE / SECTOR_SIZE + 16);
        let free_map = FreeMap::new(dev.sector_count(), &[0, 1]);
        let table = InodeTable::new();
        table.format_inode(&dev, &free_map, 2, 0, 1, false).unwrap();
        let inode = table.open(&dev, 2);

        let boundary = (NDIRECT + NINDIRECT) * SECTOR_SIZE;
        inode.write_at(&dev, &free_map, boundary, b"Z").unwrap();
        let mut buf = [0u8; 1];
        inode.read_at(&dev, &free_map, boundary, &mut buf);
        assert_eq!(buf, *b"Z");
        assert_eq!(inode.length(), boundary + 1);
    }

    #[test]
    fn deny_write_returns_zero_bytes_written() {
        let (dev, free_map) = rig();
        let table = InodeTable::new();
        table.format_inode(&dev, &free_map, 2, 0, 1, false).unwrap();
        let inode = table.open(&dev, 2);
        inode.deny_write();
        let written = inode.write_at(&dev, &free_map, 0, b"nope").unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn reopening_the_same_sector_shares_one_handle() {
        let (dev, free_map) = rig();
        let table = InodeTable::new();
        table.format_inode(&dev, &free_map, 2, 0, 1, false).unwrap();
        let a = table.open(&dev, 2);
        let b = table.open(&dev, 2);
        assert!(Arc::ptr_eq(&a, &b));
        table.close(&dev, &free_map, a);
        assert!(table.is_open(2));
        table.close(&dev, &free_map, b);
        assert!(!table.is_open(2));
    }

    #[test]
    fn removed_inode_returns_its_sectors_to_the_free_map_on_last_close() {
        let (dev, free_map) = rig();
        let table = InodeTable::new();
        table.format_inode(&dev, &free_map, 2, 0, 1, false).unwrap();
        let inode = table.open(&dev, 2);
        inode.write_at(&dev, &free_map, 0, b"data").unwrap();
        let used_before = free_map.allocate().unwrap();
        free_map.release(used_before);

        inode.mark_removed();
        table.close(&dev, &free_map, inode);
        assert!(!table.is_open(2));
    }
}
