//! The file-system façade (spec.md §4.4): `open`/`create`/`remove` and
//! the path resolver sitting on top of the inode layer, free map, and
//! directory content codec. Grounded on `kernel-rs/src/fs/mod.rs`'s
//! module-level `open`/`create` functions, adapted to this crate's
//! explicit `FileSystem` struct (no global singleton — each test/embedder
//! builds its own against its own `BlockDevice`).

pub mod dir;
pub mod freemap;
pub mod inode;
pub mod path;

use std::sync::Arc;

use scopeguard::guard;

use crate::device::BlockDevice;
use crate::error::{KernelError, KernelResult};
use crate::param::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};
use crate::vm::spt::PageBackingFile;
use dir::Dir;
use freemap::FreeMap;
use inode::{Inode, InodeTable};

pub struct FileSystem {
    pub device: Arc<dyn BlockDevice>,
    pub free_map: Arc<FreeMap>,
    pub inode_table: Arc<InodeTable>,
}

impl FileSystem {
    /// Formats a fresh device: the free map reserves sectors 0 and 1
    /// (spec.md §6), and an empty root directory is written to sector 1
    /// with itself as parent (`.` and `..` both resolve to the root).
    pub fn format(device: Arc<dyn BlockDevice>) -> KernelResult<Self> {
        let free_map = Arc::new(FreeMap::new(device.sector_count(), &[FREE_MAP_SECTOR, ROOT_DIR_SECTOR]));
        let inode_table = Arc::new(InodeTable::new());
        // The free map's own inode is formatted here so sector 0 carries a
        // real on-disk inode (spec.md §6); its data sectors are sized to
        // the bitmap but never written back to, since the bitmap itself
        // stays in-memory (kcore::fs::freemap).
        inode_table.format_inode(device.as_ref(), &free_map, FREE_MAP_SECTOR, free_map.byte_len(), FREE_MAP_SECTOR, false)?;
        inode_table.format_inode(device.as_ref(), &free_map, ROOT_DIR_SECTOR, 0, ROOT_DIR_SECTOR, true)?;
        Ok(Self {
            device,
            free_map,
            inode_table,
        })
    }

    pub fn root_sector(&self) -> u32 {
        ROOT_DIR_SECTOR
    }

    /// spec.md §4.4 path resolution: left-to-right from the root for an
    /// absolute path, from `cwd` for a relative one. `.` is a no-op;
    /// `..` advances to the directory's stored `parent` sector.
    pub fn resolve(&self, cwd: u32, path: &str) -> KernelResult<u32> {
        if path.is_empty() {
            return Err(KernelError::InvalidArg);
        }
        let mut current = if path::is_absolute(path) { self.root_sector() } else { cwd };
        for component in path::components(path) {
            if component == "." {
                continue;
            }
            let dir = self.inode_table.open(self.device.as_ref(), current);
            if !dir.is_dir() {
                self.inode_table.close(self.device.as_ref(), &self.free_map, dir);
                return Err(KernelError::NotFound);
            }
            let next = if component == ".." {
                dir.parent()
            } else {
                Dir::lookup(&dir, self.device.as_ref(), &self.free_map, component).ok_or(KernelError::NotFound)?
            };
            self.inode_table.close(self.device.as_ref(), &self.free_map, dir);
            current = next;
        }
        Ok(current)
    }

    /// spec.md §4.4 `create`: resolves `dir_of(path)`, rejects `.`/`..`
    /// basenames, allocates an inode and its data sectors, and links it
    /// into the parent directory. Any failure unwinds the allocated
    /// inode sector.
    pub fn create(&self, cwd: u32, path: &str, size: usize, is_dir: bool) -> KernelResult<u32> {
        let base = path::basename(path);
        if base == "." || base == ".." {
            return Err(KernelError::InvalidArg);
        }
        let dir_path = path::dir_of(path);
        let parent_sector = if dir_path.is_empty() { cwd } else { self.resolve(cwd, dir_path)? };
        let parent = self.inode_table.open(self.device.as_ref(), parent_sector);
        if !parent.is_dir() {
            self.inode_table.close(self.device.as_ref(), &self.free_map, parent);
            return Err(KernelError::InvalidArg);
        }

        let new_sector = self.free_map.allocate()?;
        let rollback = guard(Some(new_sector), |sector| {
            if let Some(sector) = sector {
                self.free_map.release(sector);
            }
        });

        let result: KernelResult<()> = (|| {
            self.inode_table
                .format_inode(self.device.as_ref(), &self.free_map, new_sector, size, parent_sector, is_dir)?;
            Dir::add_entry(&parent, self.device.as_ref(), &self.free_map, base, new_sector)?;
            Ok(())
        })();

        self.inode_table.close(self.device.as_ref(), &self.free_map, parent);
        result?;
        scopeguard::ScopeGuard::into_inner(rollback);
        Ok(new_sector)
    }

    /// spec.md §4.4 `remove`: refuses a non-empty directory or an inode
    /// held open elsewhere (cwd counts as an open reference, per the
    /// open-inode registry it shares — spec.md §9's directory-removal
    /// open question resolved that way). Reclamation happens when the
    /// last reference closes.
    pub fn remove(&self, cwd: u32, path: &str) -> KernelResult<()> {
        let base = path::basename(path);
        let dir_path = path::dir_of(path);
        let parent_sector = if dir_path.is_empty() { cwd } else { self.resolve(cwd, dir_path)? };
        let parent = self.inode_table.open(self.device.as_ref(), parent_sector);

        let target_sector = match Dir::lookup(&parent, self.device.as_ref(), &self.free_map, base) {
            Some(sector) => sector,
            None => {
                self.inode_table.close(self.device.as_ref(), &self.free_map, parent);
                return Err(KernelError::NotFound);
            }
        };

        let target = self.inode_table.open(self.device.as_ref(), target_sector);
        let refused = (target.is_dir() && !Dir::is_empty(&target, self.device.as_ref(), &self.free_map)) || target.open_count() > 1;
        if refused {
            self.inode_table.close(self.device.as_ref(), &self.free_map, target);
            self.inode_table.close(self.device.as_ref(), &self.free_map, parent);
            return Err(KernelError::PermissionDenied);
        }

        Dir::remove_entry(&parent, self.device.as_ref(), &self.free_map, base)?;
        target.mark_removed();
        self.inode_table.close(self.device.as_ref(), &self.free_map, target);
        self.inode_table.close(self.device.as_ref(), &self.free_map, parent);
        Ok(())
    }

    pub fn open(&self, sector: u32) -> Arc<Inode> {
        self.inode_table.open(self.device.as_ref(), sector)
    }

    pub fn close(&self, inode: Arc<Inode>) {
        self.inode_table.close(self.device.as_ref(), &self.free_map, inode);
    }
}

/// A file handle open against a particular `FileSystem`: the unit the
/// loader reads executable segments from and a process's open-file table
/// holds positions against (spec.md §3, §4.5).
pub struct OpenFile {
    device: Arc<dyn BlockDevice>,
    free_map: Arc<FreeMap>,
    pub inode: Arc<Inode>,
}

impl OpenFile {
    pub fn new(fs: &FileSystem, inode: Arc<Inode>) -> Self {
        Self {
            device: fs.device.clone(),
            free_map: fs.free_map.clone(),
            inode,
        }
    }

    pub fn len(&self) -> usize {
        self.inode.length()
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(self.device.as_ref(), &self.free_map, offset, buf)
    }

    pub fn write_at(&self, offset: usize, buf: &[u8]) -> KernelResult<usize> {
        self.inode.write_at(self.device.as_ref(), &self.free_map, offset, buf)
    }
}

impl PageBackingFile for OpenFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        OpenFile::read_at(self, offset as usize, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;

    fn fs() -> FileSystem {
        FileSystem::format(Arc::new(MemBlockDevice::new(4096))).unwrap()
    }

    #[test]
    fn create_then_resolve_finds_the_new_file() {
        let fs = fs();
        let root = fs.root_sector();
        let sector = fs.create(root, "/hello.txt", 0, false).unwrap();
        assert_eq!(fs.resolve(root, "/hello.txt").unwrap(), sector);
    }

    #[test]
    fn nested_directories_resolve_with_dot_dot() {
        let fs = fs();
        let root = fs.root_sector();
        let a = fs.create(root, "/a", 0, true).unwrap();
        fs.create(a, "b.txt", 0, false).unwrap();
        let via_dotdot = fs.resolve(a, "../a/b.txt").unwrap();
        let direct = fs.resolve(root, "/a/b.txt").unwrap();
        assert_eq!(via_dotdot, direct);
    }

    #[test]
    fn empty_path_fails_to_resolve() {
        let fs = fs();
        assert!(fs.resolve(fs.root_sector(), "").is_err());
    }

    #[test]
    fn removing_a_non_empty_directory_fails() {
        let fs = fs();
        let root = fs.root_sector();
        let a = fs.create(root, "/a", 0, true).unwrap();
        fs.create(a, "b.txt", 0, false).unwrap();
        assert!(fs.remove(root, "/a").is_err());
    }

    #[test]
    fn removing_an_open_file_is_refused() {
        let fs = fs();
        let root = fs.root_sector();
        let sector = fs.create(root, "/f", 0, false).unwrap();
        let handle = fs.open(sector);
        assert!(fs.remove(root, "/f").is_err());
        fs.close(handle);
        assert!(fs.remove(root, "/f").is_ok());
    }

    #[test]
    fn create_rejects_dot_and_dot_dot_basenames() {
        let fs = fs();
        let root = fs.root_sector();
        assert!(fs.create(root, "/.", 0, false).is_err());
        assert!(fs.create(root, "/..", 0, false).is_err());
    }

    #[test]
    fn format_writes_a_real_inode_at_the_free_map_sector() {
        let fs = fs();
        let free_map_inode = fs.open(FREE_MAP_SECTOR);
        assert!(!free_map_inode.is_dir());
        assert_eq!(free_map_inode.length(), fs.free_map.byte_len());
        fs.close(free_map_inode);
    }
}
