//! Error kinds (spec.md §7). Plain data, no `thiserror`/`anyhow`:
//! `kernel-rs`'s own modules (`fs::inode`, `exec.rs`) return
//! `Result<T, ()>` throughout, so a small hand-written enum that just
//! names the kinds spec.md §7 distinguishes is the faithful
//! generalization — distinguishable kinds are needed here to pick the
//! right syscall return convention, something `kernel-rs` never reaches
//! for an error crate to provide.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Unmapped or kernel-space user pointer, or the unwritable target of
    /// a write. Always terminates the offending process (spec.md §7).
    BadPointer,
    /// File-system or swap exhaustion.
    NoSpace,
    /// Path, file descriptor, or child pid not found.
    NotFound,
    /// Empty name, reserved basename (`.`/`..`), or malformed ELF.
    InvalidArg,
    /// Writing a non-writable page, or writing a deny-write file.
    /// Terminates the offending process (spec.md §7).
    PermissionDenied,
    /// No frames available and every frame is pinned by a stack page.
    /// Fatal to the kernel when raised from the page-fault handler
    /// (spec.md §7).
    ResourceExhausted,
    /// A directory entry with that name already exists.
    AlreadyExists,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::BadPointer => "bad pointer",
            KernelError::NoSpace => "no space",
            KernelError::NotFound => "not found",
            KernelError::InvalidArg => "invalid argument",
            KernelError::PermissionDenied => "permission denied",
            KernelError::ResourceExhausted => "resource exhausted",
            KernelError::AlreadyExists => "already exists",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for KernelError {}

pub type KernelResult<T> = Result<T, KernelError>;

/// Whether `err` is one of the two kinds that spec.md §7 says terminate
/// the offending process outright, rather than surfacing as an ordinary
/// syscall return value.
pub fn terminates_process(err: KernelError) -> bool {
    matches!(err, KernelError::BadPointer | KernelError::PermissionDenied)
}
