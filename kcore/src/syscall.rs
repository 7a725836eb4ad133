//! Per-syscall semantics (spec.md §4.7). The syntactic fetch of argument
//! bytes out of user memory is external per spec.md §1 — callers here
//! already have Rust-native buffers and typed arguments — but the
//! *validation* that a user-supplied address range is actually
//! accessible is in scope, via [`probe_range`].
//!
//! Grounded on `kernel-rs/src/syscall/{file,proc}.rs`'s per-syscall free
//! functions, adapted from that crate's raw-pointer/register-passing
//! convention to typed arguments, and on `original_source/userprog/
//! syscall.c`'s exact per-syscall return-value and error conventions.

use crate::device::BlockDevice;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::proc::fdtable::FIRST_FD;
use crate::vm::addr::UserVirtAddr;
use crate::vm::fault::{handle_fault, FaultAccess, FaultOutcome};
use crate::vm::frame::FrameTable;
use crate::vm::hw::{HardwarePageTable, Pid};
use crate::vm::spt::SptTable;
use crate::vm::swap::SwapTable;

/// spec.md §4.3's pointer-validity check, reused from the fault handler:
/// walks `[addr, addr + len)` page by page, faulting in any page that
/// has no SPTE yet (so a plausible stack-growth access still succeeds)
/// and rejecting the whole range the moment one page would terminate
/// the process.
pub fn probe_range(
    spt: &SptTable,
    frame_table: &FrameTable,
    hw: &dyn HardwarePageTable,
    swap: &SwapTable,
    swap_device: &dyn BlockDevice,
    owner: Pid,
    esp: UserVirtAddr,
    addr: UserVirtAddr,
    len: usize,
    for_write: bool,
) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    let start = addr.as_usize();
    let end = start.checked_add(len).ok_or(KernelError::BadPointer)?;
    let mut page = UserVirtAddr::new(start).page_base();
    loop {
        match spt.lookup(page) {
            Some(spte) if for_write && !spte.writable() => return Err(KernelError::BadPointer),
            Some(_) => {}
            None => {
                let access = FaultAccess {
                    addr: page,
                    esp,
                    is_write: for_write,
                };
                if handle_fault(&access, owner, spt, frame_table, hw, swap, swap_device) == FaultOutcome::Terminate {
                    return Err(KernelError::BadPointer);
                }
            }
        }
        if page.as_usize() + crate::param::PAGE_SIZE >= end {
            break;
        }
        page = page + crate::param::PAGE_SIZE;
    }
    Ok(())
}

/// spec.md §4.7 `create`.
pub fn sys_create(kernel: &Kernel, caller: Pid, path: &str, initial_size: usize) -> bool {
    let process = kernel.process(caller);
    kernel.fs.create(process.cwd(), path, initial_size, false).is_ok()
}

/// spec.md §4.7 `remove`.
pub fn sys_remove(kernel: &Kernel, caller: Pid, path: &str) -> bool {
    let process = kernel.process(caller);
    kernel.fs.remove(process.cwd(), path).is_ok()
}

/// spec.md §4.7 `chdir`, grounded on `original_source/filesys/filesys.c`'s
/// `filesys_chdir`: resolves `path` against the caller's cwd, opens the
/// target (rejecting and closing it again if it isn't a directory), and
/// swaps it in as the new cwd — closing the one it replaces.
pub fn sys_chdir(kernel: &Kernel, caller: Pid, path: &str) -> bool {
    let process = kernel.process(caller);
    let Ok(sector) = kernel.fs.resolve(process.cwd(), path) else {
        return false;
    };
    let inode = kernel.fs.open(sector);
    if !inode.is_dir() {
        kernel.fs.close(inode);
        return false;
    }
    let previous = process.set_cwd(inode);
    kernel.fs.close(previous);
    true
}

/// spec.md §4.7 `open`: `-1` on any failure, including opening a
/// directory as a plain file.
pub fn sys_open(kernel: &Kernel, caller: Pid, path: &str) -> i32 {
    let process = kernel.process(caller);
    let Ok(sector) = kernel.fs.resolve(process.cwd(), path) else {
        return -1;
    };
    let inode = kernel.fs.open(sector);
    let file = std::sync::Arc::new(crate::fs::OpenFile::new(&kernel.fs, inode));
    process.fd_table.open(file) as i32
}

/// spec.md §4.7 `filesize`: `-1` for a closed or console fd.
pub fn sys_filesize(kernel: &Kernel, caller: Pid, fd: i32) -> i32 {
    if fd < FIRST_FD as i32 {
        return -1;
    }
    let process = kernel.process(caller);
    process.fd_table.filesize(fd as usize).map(|n| n as i32).unwrap_or(-1)
}

/// spec.md §4.7 `read`: fd 0 reads the console one character at a time
/// until it returns `None`; any other fd reads through the fd table.
pub fn sys_read(kernel: &Kernel, caller: Pid, fd: i32, buf: &mut [u8]) -> i32 {
    if fd == 0 {
        let mut n = 0;
        while n < buf.len() {
            match kernel.console.read_char() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        return n as i32;
    }
    if fd < FIRST_FD as i32 {
        return -1;
    }
    let process = kernel.process(caller);
    process.fd_table.read(fd as usize, buf).map(|n| n as i32).unwrap_or(-1)
}

/// spec.md §4.7 `write`: fd 1 writes the whole buffer to the console in
/// one call; any other fd writes through the fd table. A write that
/// terminates the process per spec.md §7 (a deny-write executable,
/// e.g.) is surfaced as `-1` here — the caller is expected to already
/// have decided the process survives far enough to ask.
pub fn sys_write(kernel: &Kernel, caller: Pid, fd: i32, buf: &[u8]) -> i32 {
    if fd == 1 {
        kernel.console.write_all(buf);
        return buf.len() as i32;
    }
    if fd < FIRST_FD as i32 {
        return -1;
    }
    let process = kernel.process(caller);
    match process.fd_table.write(fd as usize, buf) {
        Some(Ok(n)) => n as i32,
        _ => -1,
    }
}

/// spec.md §4.7 `seek`: silently ignored for a closed fd, matching
/// `original_source`'s `syscall.c` (seek has no failure return value).
pub fn sys_seek(kernel: &Kernel, caller: Pid, fd: i32, position: usize) {
    if fd < FIRST_FD as i32 {
        return;
    }
    kernel.process(caller).fd_table.seek(fd as usize, position);
}

/// spec.md §4.7 `tell`: `-1` for a closed fd (no dedicated error value
/// in the original syscall's contract, so failure is folded into the
/// same convention as `open`/`read`/`write`).
pub fn sys_tell(kernel: &Kernel, caller: Pid, fd: i32) -> i32 {
    if fd < FIRST_FD as i32 {
        return -1;
    }
    kernel.process(caller).fd_table.tell(fd as usize).map(|n| n as i32).unwrap_or(-1)
}

/// spec.md §4.7 `close`: releases the fd table slot and the filesystem's
/// open reference together.
pub fn sys_close(kernel: &Kernel, caller: Pid, fd: i32) {
    if fd < FIRST_FD as i32 {
        return;
    }
    let process = kernel.process(caller);
    if let Some(file) = process.fd_table.close(fd as usize) {
        kernel.fs.close(file.inode.clone());
    }
}

/// spec.md §4.7 `halt`: powers off immediately. Genuinely terminates the
/// host process, so it is never exercised by the test suite.
pub fn sys_halt() -> ! {
    std::process::exit(0)
}
