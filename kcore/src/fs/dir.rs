//! Directory entries (spec.md §3, §6): "a file whose content is a packed
//! sequence of (name, child_inode_sector, in_use) entries." `.` and `..`
//! are handled specially rather than stored. Grounded on
//! `kernel-rs/src/fs/mod.rs`'s `Dirent` shape, adapted to this crate's
//! fixed-record-layout inode content instead of rv6's variable dirent
//! table embedded directly in inode blocks.

use arrayvec::ArrayVec;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::device::BlockDevice;
use crate::error::{KernelError, KernelResult};
use crate::fs::freemap::FreeMap;
use crate::fs::inode::Inode;
use crate::param::NAMEMAX;

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
struct DirEntryRecord {
    in_use: u8,
    name: [u8; NAMEMAX],
    inode_sector: u32,
}

const RECORD_SIZE: usize = std::mem::size_of::<DirEntryRecord>();

fn encode_name(name: &str) -> KernelResult<[u8; NAMEMAX]> {
    if name.is_empty() || name.len() > NAMEMAX || name.as_bytes().contains(&b'/') || name.as_bytes().contains(&0) {
        return Err(KernelError::InvalidArg);
    }
    let mut buf = [0u8; NAMEMAX];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    Ok(buf)
}

fn decode_name(raw: &[u8; NAMEMAX]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(NAMEMAX);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// One resolved directory entry, as returned by enumeration.
pub struct DirEntry {
    pub name: String,
    pub inode_sector: u32,
}

/// Reads/writes directory entries through an inode's byte content.
/// Names must be rejected by the caller before reaching `add_entry` if
/// they are `.`/`..` (spec.md §4.4 `create`; §9 resolves `remove`
/// symmetrically).
pub struct Dir;

impl Dir {
    /// spec.md §4.4 path resolution: looks up `name` among this
    /// directory's stored entries (never `.`/`..`, which the path
    /// resolver handles before calling in).
    pub fn lookup(inode: &Inode, device: &dyn BlockDevice, free_map: &FreeMap, name: &str) -> Option<u32> {
        Self::entries(inode, device, free_map)
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.inode_sector)
    }

    pub fn entries(inode: &Inode, device: &dyn BlockDevice, free_map: &FreeMap) -> Vec<DirEntry> {
        let mut out = Vec::new();
        let mut offset = 0;
        let mut buf = [0u8; RECORD_SIZE];
        while inode.read_at(device, free_map, offset, &mut buf) == RECORD_SIZE {
            let record = DirEntryRecord::read_from(&buf[..]).expect("record-sized buffer");
            if record.in_use != 0 {
                out.push(DirEntry {
                    name: decode_name(&record.name),
                    inode_sector: record.inode_sector,
                });
            }
            offset += RECORD_SIZE;
        }
        out
    }

    /// Adds `(name, inode_sector)`, reusing a vacated slot if one exists.
    /// Fails with `AlreadyExists` if `name` is already present.
    pub fn add_entry(inode: &Inode, device: &dyn BlockDevice, free_map: &FreeMap, name: &str, inode_sector: u32) -> KernelResult<()> {
        let encoded = encode_name(name)?;
        let mut offset = 0;
        let mut buf = [0u8; RECORD_SIZE];
        let mut free_slot = None;
        loop {
            let n = inode.read_at(device, free_map, offset, &mut buf);
            if n < RECORD_SIZE {
                break;
            }
            let record = DirEntryRecord::read_from(&buf[..]).expect("record-sized buffer");
            if record.in_use != 0 {
                if decode_name(&record.name) == name {
                    return Err(KernelError::AlreadyExists);
                }
            } else if free_slot.is_none() {
                free_slot = Some(offset);
            }
            offset += RECORD_SIZE;
        }

        let record = DirEntryRecord {
            in_use: 1,
            name: encoded,
            inode_sector,
        };
        let target = free_slot.unwrap_or(offset);
        inode.write_at(device, free_map, target, record.as_bytes())?;
        Ok(())
    }

    /// Marks `name`'s record unused. `NotFound` if absent.
    pub fn remove_entry(inode: &Inode, device: &dyn BlockDevice, free_map: &FreeMap, name: &str) -> KernelResult<u32> {
        let mut offset = 0;
        let mut buf = [0u8; RECORD_SIZE];
        while inode.read_at(device, free_map, offset, &mut buf) == RECORD_SIZE {
            let mut record = DirEntryRecord::read_from(&buf[..]).expect("record-sized buffer");
            if record.in_use != 0 && decode_name(&record.name) == name {
                let sector = record.inode_sector;
                record.in_use = 0;
                inode.write_at(device, free_map, offset, record.as_bytes())?;
                return Ok(sector);
            }
            offset += RECORD_SIZE;
        }
        Err(KernelError::NotFound)
    }

    /// True when no in-use entries remain besides the implicit `.`/`..`
    /// (spec.md §4.4 `remove`: "removing a non-empty directory ... fails").
    pub fn is_empty(inode: &Inode, device: &dyn BlockDevice, free_map: &FreeMap) -> bool {
        Self::entries(inode, device, free_map).is_empty()
    }
}

/// Small stack-allocated scratch buffer for path components, matching
/// `kernel-rs`'s `arrayvec` use for fixed-capacity buffers.
pub type NameBuf = ArrayVec<u8, NAMEMAX>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::fs::inode::InodeTable;

    fn rig() -> (MemBlockDevice, FreeMap, InodeTable) {
        let dev = MemBlockDevice::new(512);
        let free_map = FreeMap::new(512, &[0, 1]);
        let table = InodeTable::new();
        table.format_inode(&dev, &free_map, 1, 0, 1, true).unwrap();
        (dev, free_map, table)
    }

    #[test]
    fn add_then_lookup_round_trips() {
        let (dev, free_map, table) = rig();
        let dir = table.open(&dev, 1);
        Dir::add_entry(&dir, &dev, &free_map, "a.txt", 5).unwrap();
        assert_eq!(Dir::lookup(&dir, &dev, &free_map, "a.txt"), Some(5));
        assert_eq!(Dir::lookup(&dir, &dev, &free_map, "missing"), None);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (dev, free_map, table) = rig();
        let dir = table.open(&dev, 1);
        Dir::add_entry(&dir, &dev, &free_map, "a", 5).unwrap();
        assert!(matches!(Dir::add_entry(&dir, &dev, &free_map, "a", 6), Err(KernelError::AlreadyExists)));
    }

    #[test]
    fn removed_entries_free_their_slot_for_reuse() {
        let (dev, free_map, table) = rig();
        let dir = table.open(&dev, 1);
        Dir::add_entry(&dir, &dev, &free_map, "a", 5).unwrap();
        Dir::remove_entry(&dir, &dev, &free_map, "a").unwrap();
        assert!(Dir::is_empty(&dir, &dev, &free_map));
        Dir::add_entry(&dir, &dev, &free_map, "b", 6).unwrap();
        assert_eq!(Dir::lookup(&dir, &dev, &free_map, "b"), Some(6));
    }
}
