//! Per-process open-file-descriptor table (spec.md §3, §4.7). Grounded
//! on `kernel-rs/src/proc/mod.rs`'s fixed `[Option<RcFile>; NOFILE]`
//! array per process, kept as a growable `Vec` here since `kcore` has no
//! static upper bound on open files to size an array-backed arena to.
//!
//! Fds 0 and 1 never appear in this table (spec.md §6: they name the
//! console directly); the lowest fd this table hands out is
//! [`FIRST_FD`].

use std::sync::Arc;

use kcore_support::Spinlock;

use crate::error::KernelResult;
use crate::fs::OpenFile;

/// The first fd number this table allocates; 0 and 1 are reserved for
/// the console and handled by the caller before reaching this table.
pub const FIRST_FD: usize = 2;

struct FdEntry {
    file: Arc<OpenFile>,
    position: usize,
}

/// A process's open files, keyed by fd (spec.md §4.7 `open`/`read`/
/// `write`/`seek`/`tell`/`close`).
#[derive(Default)]
pub struct FdTable {
    entries: Spinlock<Vec<Option<FdEntry>>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(fd: usize) -> Option<usize> {
        fd.checked_sub(FIRST_FD)
    }

    /// spec.md §4.7 `open`: installs `file` at the lowest fd that fd
    /// table reuse leaves free, or appends a new slot.
    pub fn open(&self, file: Arc<OpenFile>) -> usize {
        let mut entries = self.entries.lock();
        let entry = Some(FdEntry { file, position: 0 });
        match entries.iter().position(|slot| slot.is_none()) {
            Some(index) => {
                entries[index] = entry;
                index + FIRST_FD
            }
            None => {
                entries.push(entry);
                entries.len() - 1 + FIRST_FD
            }
        }
    }

    /// Closes `fd`, returning the closed file so the caller can release
    /// it against the filesystem. `None` if `fd` was never open.
    pub fn close(&self, fd: usize) -> Option<Arc<OpenFile>> {
        let index = Self::index(fd)?;
        let mut entries = self.entries.lock();
        entries.get_mut(index).and_then(|slot| slot.take()).map(|entry| entry.file)
    }

    pub fn filesize(&self, fd: usize) -> Option<usize> {
        let index = Self::index(fd)?;
        let entries = self.entries.lock();
        entries.get(index)?.as_ref().map(|entry| entry.file.len())
    }

    /// spec.md §4.7 `read`: reads at the fd's current position, then
    /// advances it by however many bytes actually came back.
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Option<usize> {
        let index = Self::index(fd)?;
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(index)?.as_mut()?;
        let n = entry.file.read_at(entry.position, buf);
        entry.position += n;
        Some(n)
    }

    /// spec.md §4.7 `write`: writes at the fd's current position and
    /// advances it; propagates filesystem errors (e.g. a deny-written
    /// executable) rather than silently truncating.
    pub fn write(&self, fd: usize, buf: &[u8]) -> Option<KernelResult<usize>> {
        let index = Self::index(fd)?;
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(index)?.as_mut()?;
        Some(match entry.file.write_at(entry.position, buf) {
            Ok(n) => {
                entry.position += n;
                Ok(n)
            }
            Err(err) => Err(err),
        })
    }

    pub fn seek(&self, fd: usize, position: usize) -> bool {
        let Some(index) = Self::index(fd) else { return false };
        let mut entries = self.entries.lock();
        match entries.get_mut(index).and_then(|slot| slot.as_mut()) {
            Some(entry) => {
                entry.position = position;
                true
            }
            None => false,
        }
    }

    pub fn tell(&self, fd: usize) -> Option<usize> {
        let index = Self::index(fd)?;
        let entries = self.entries.lock();
        entries.get(index)?.as_ref().map(|entry| entry.position)
    }

    /// Closes every open fd, returning their files for the caller to
    /// release (spec.md §4.6 `exit`: "closes every open file descriptor").
    pub fn close_all(&self) -> Vec<Arc<OpenFile>> {
        std::mem::take(&mut *self.entries.lock())
            .into_iter()
            .flatten()
            .map(|entry| entry.file)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::fs::FileSystem;

    fn open_file(fs: &FileSystem, root: u32, name: &str) -> Arc<OpenFile> {
        let sector = fs.create(root, name, 0, false).unwrap();
        Arc::new(OpenFile::new(fs, fs.open(sector)))
    }

    #[test]
    fn open_hands_out_fds_starting_at_first_fd_and_reuses_closed_slots() {
        let fs = FileSystem::format(Arc::new(MemBlockDevice::new(256))).unwrap();
        let root = fs.root_sector();
        let table = FdTable::new();

        let fd0 = table.open(open_file(&fs, root, "/a"));
        let fd1 = table.open(open_file(&fs, root, "/b"));
        assert_eq!(fd0, FIRST_FD);
        assert_eq!(fd1, FIRST_FD + 1);

        table.close(fd0);
        let fd2 = table.open(open_file(&fs, root, "/c"));
        assert_eq!(fd2, fd0);
    }

    #[test]
    fn write_then_read_round_trips_through_independent_positions() {
        let fs = FileSystem::format(Arc::new(MemBlockDevice::new(256))).unwrap();
        let root = fs.root_sector();
        let table = FdTable::new();
        let fd = table.open(open_file(&fs, root, "/f"));

        table.write(fd, b"hello").unwrap().unwrap();
        assert_eq!(table.tell(fd), Some(5));

        table.seek(fd, 0);
        let mut buf = [0u8; 5];
        table.read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn operations_on_an_unopened_fd_return_none() {
        let table = FdTable::new();
        assert_eq!(table.filesize(FIRST_FD), None);
        assert_eq!(table.tell(FIRST_FD), None);
        assert!(!table.seek(FIRST_FD, 0));
    }
}
