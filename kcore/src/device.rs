//! External-collaborator boundaries (spec.md §1, §6): the raw block
//! device and the console are explicitly out of scope, with only their
//! consumed interfaces specified. `BlockDevice` and `Console` are those
//! interfaces; `MemBlockDevice`/`MemConsole` are the in-memory
//! implementations the test suite and any embedding binary can use.
//!
//! Grounded on `kernel-rs/src/bio.rs`/`buf.rs` (one buffer per sector)
//! and `original_source/vm/swap.h` (`block_read`/`block_write` being the
//! device's entire public contract).

use crate::error::{KernelError, KernelResult};
use crate::param::SECTOR_SIZE;

/// A blocking, sector-atomic block device (spec.md §6). Both the
/// filesystem device and the swap device are `BlockDevice`s; the swap
/// device is simply one addressed as a flat byte pool from sector 0.
pub trait BlockDevice: Send + Sync {
    /// Total number of `SECTOR_SIZE`-byte sectors on the device.
    fn sector_count(&self) -> usize;

    /// Reads sector `sector` into `buf`, which must be exactly
    /// `SECTOR_SIZE` bytes.
    fn read_sector(&self, sector: usize, buf: &mut [u8]);

    /// Writes `buf` (exactly `SECTOR_SIZE` bytes) to sector `sector`.
    fn write_sector(&self, sector: usize, buf: &[u8]);
}

/// A `Vec<u8>`-backed block device, used for both the test filesystem
/// device and the test swap device (spec.md §6 describes the swap device
/// as "a pure byte pool", which this models directly).
pub struct MemBlockDevice {
    sectors: spin::Mutex<Vec<u8>>,
    sector_count: usize,
}

impl MemBlockDevice {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: spin::Mutex::new(vec![0u8; sector_count * SECTOR_SIZE]),
            sector_count,
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let data = self.sectors.lock();
        let start = sector * SECTOR_SIZE;
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut data = self.sectors.lock();
        let start = sector * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
    }
}

/// The console (spec.md §6): fd 0 reads one character at a time, fd 1
/// writes a whole buffer in one call.
pub trait Console: Send + Sync {
    /// Reads one character, or `None` at end of input.
    fn read_char(&self) -> Option<u8>;

    /// Writes `buf` to the console in a single call.
    fn write_all(&self, buf: &[u8]);
}

/// An in-memory console: `write_all` appends to an output log, and
/// `read_char` drains a pre-seeded input queue. Used by tests and by
/// `kprintln!`'s default target.
#[derive(Default)]
pub struct MemConsole {
    input: spin::Mutex<std::collections::VecDeque<u8>>,
    output: spin::Mutex<Vec<u8>>,
}

impl MemConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: spin::Mutex::new(input.iter().copied().collect()),
            output: spin::Mutex::new(Vec::new()),
        }
    }

    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }
}

impl Console for MemConsole {
    fn read_char(&self) -> Option<u8> {
        self.input.lock().pop_front()
    }

    fn write_all(&self, buf: &[u8]) {
        self.output.lock().extend_from_slice(buf);
    }
}

/// Reads `buf.len()` bytes at `sector * SECTOR_SIZE + offset` spanning
/// however many sectors that covers, via a "bounce sector" the way
/// `spec.md` §4.4 describes for reads that straddle a sector boundary.
pub fn read_bytes_at(device: &dyn BlockDevice, byte_offset: usize, buf: &mut [u8]) {
    let mut done = 0;
    while done < buf.len() {
        let pos = byte_offset + done;
        let sector = pos / SECTOR_SIZE;
        let sector_off = pos % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - sector_off).min(buf.len() - done);
        let mut bounce = [0u8; SECTOR_SIZE];
        device.read_sector(sector, &mut bounce);
        buf[done..done + chunk].copy_from_slice(&bounce[sector_off..sector_off + chunk]);
        done += chunk;
    }
}

/// Writes `buf` at `byte_offset`, read-modify-writing through a bounce
/// sector for any sector the write only partially covers.
pub fn write_bytes_at(device: &dyn BlockDevice, byte_offset: usize, buf: &[u8]) {
    let mut done = 0;
    while done < buf.len() {
        let pos = byte_offset + done;
        let sector = pos / SECTOR_SIZE;
        let sector_off = pos % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - sector_off).min(buf.len() - done);
        let mut bounce = [0u8; SECTOR_SIZE];
        if chunk != SECTOR_SIZE {
            device.read_sector(sector, &mut bounce);
        }
        bounce[sector_off..sector_off + chunk].copy_from_slice(&buf[done..done + chunk]);
        device.write_sector(sector, &bounce);
        done += chunk;
    }
}

/// Validates that `sector` names an in-range sector of `device`,
/// returning [`KernelError::NoSpace`] otherwise — used by allocators that
/// hand out sector numbers from a free map sized to the device.
pub fn check_sector_in_range(device: &dyn BlockDevice, sector: usize) -> KernelResult<()> {
    if sector < device.sector_count() {
        Ok(())
    } else {
        Err(KernelError::NoSpace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_round_trip() {
        let dev = MemBlockDevice::new(4);
        let mut buf = [7u8; SECTOR_SIZE];
        dev.write_sector(2, &buf);
        buf.fill(0);
        dev.read_sector(2, &mut buf);
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn byte_access_straddles_sector_boundary() {
        let dev = MemBlockDevice::new(4);
        let payload: Vec<u8> = (0..20).collect();
        write_bytes_at(&dev, SECTOR_SIZE - 5, &payload);
        let mut out = vec![0u8; 20];
        read_bytes_at(&dev, SECTOR_SIZE - 5, &mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn console_captures_writes_and_drains_input() {
        let console = MemConsole::with_input(b"hi");
        console.write_all(b"echo");
        assert_eq!(console.output_string(), "echo");
        assert_eq!(console.read_char(), Some(b'h'));
        assert_eq!(console.read_char(), Some(b'i'));
        assert_eq!(console.read_char(), None);
    }
}
