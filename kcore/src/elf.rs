//! ELF-like executable header and program-header validation (spec.md
//! §4.5, §6). Grounded on `kernel-rs/src/elf.rs`'s `ElfHdr`/`ProgHdr`
//! shape, narrowed from RISC-V64's 64-bit fields to the 32-bit IA-32-like
//! layout spec.md §6 specifies, and its acceptance rule implemented as a
//! `validate` function rather than the loader inlining field checks.

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{KernelError, KernelResult};
use crate::param::{ELF_CLASS_VERSION_DATA, ELF_MACHINE_IA32, ELF_MAX_PHNUM, ELF_TYPE_EXEC, ELF_VERSION};

/// 32-bit ELF file header (`Elf32_Ehdr`).
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct ElfHeader {
    pub ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

pub const ELF_HEADER_SIZE: usize = std::mem::size_of::<ElfHeader>();
pub const PROGRAM_HEADER_SIZE: usize = std::mem::size_of::<ProgramHeader>();

/// 32-bit ELF program header (`Elf32_Phdr`).
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_SHLIB: u32 = 5;
pub const PT_PHDR: u32 = 6;
pub const PT_STACK: u32 = 0x6474_e551;

bitflags! {
    /// `p_flags` bits (spec.md §4.5 step 4: "write permission from
    /// `p_flags & W`").
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ProgFlags: u32 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// What the loader should do with one program header (spec.md §4.5 step
/// 4).
pub enum PhAction {
    Ignore,
    Reject,
    Load,
}

/// spec.md §6 "ELF acceptance": magic, type, machine, version,
/// `e_phentsize` equal to the program-header size, `e_phnum <= 1024`.
pub fn validate_header(bytes: &[u8]) -> KernelResult<ElfHeader> {
    let header = ElfHeader::read_from_prefix(bytes).ok_or(KernelError::InvalidArg)?;
    let magic_ok = header.ident[0..4] == [0x7F, b'E', b'L', b'F'];
    let class_version_data_ok = header.ident[4..7] == ELF_CLASS_VERSION_DATA;
    if !magic_ok || !class_version_data_ok {
        return Err(KernelError::InvalidArg);
    }
    if header.e_type != ELF_TYPE_EXEC
        || header.e_machine != ELF_MACHINE_IA32
        || header.e_version != ELF_VERSION
        || header.e_phentsize as usize != PROGRAM_HEADER_SIZE
        || header.e_phnum > ELF_MAX_PHNUM
    {
        return Err(KernelError::InvalidArg);
    }
    Ok(header)
}

/// spec.md §4.5 step 4: ignore `NULL`/`NOTE`/`PHDR`/`STACK`; reject
/// `DYNAMIC`/`INTERP`/`SHLIB`; everything else that isn't `LOAD` is also
/// rejected rather than silently skipped.
pub fn classify(ph: &ProgramHeader) -> PhAction {
    match ph.p_type {
        PT_NULL | PT_NOTE | PT_PHDR | PT_STACK => PhAction::Ignore,
        PT_LOAD => PhAction::Load,
        PT_DYNAMIC | PT_INTERP | PT_SHLIB => PhAction::Reject,
        _ => PhAction::Reject,
    }
}

/// spec.md §4.5 step 4's `LOAD`-segment validation: `p_offset`/`p_vaddr`
/// share a page offset, the segment fits in user space, is non-empty,
/// and page 0 is forbidden.
pub fn validate_load_segment(ph: &ProgramHeader, page_size: usize, phys_base: usize) -> KernelResult<()> {
    if ph.p_offset as usize % page_size != ph.p_vaddr as usize % page_size {
        return Err(KernelError::InvalidArg);
    }
    if ph.p_vaddr == 0 {
        return Err(KernelError::InvalidArg);
    }
    if ph.p_memsz == 0 {
        return Err(KernelError::InvalidArg);
    }
    let end = (ph.p_vaddr as usize).checked_add(ph.p_memsz as usize).ok_or(KernelError::InvalidArg)?;
    if end > phys_base {
        return Err(KernelError::InvalidArg);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header(phnum: u16) -> ElfHeader {
        let mut header = ElfHeader::new_zeroed();
        header.ident[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        header.ident[4..7].copy_from_slice(&ELF_CLASS_VERSION_DATA);
        header.e_type = ELF_TYPE_EXEC;
        header.e_machine = ELF_MACHINE_IA32;
        header.e_version = ELF_VERSION;
        header.e_phentsize = PROGRAM_HEADER_SIZE as u16;
        header.e_phnum = phnum;
        header
    }

    #[test]
    fn a_well_formed_header_validates() {
        let header = valid_header(3);
        assert!(validate_header(header.as_bytes()).is_ok());
    }

    #[test]
    fn a_bad_magic_is_rejected() {
        let mut header = valid_header(1);
        header.ident[0] = 0;
        assert!(validate_header(header.as_bytes()).is_err());
    }

    #[test]
    fn too_many_program_headers_is_rejected() {
        let header = valid_header(2000);
        assert!(validate_header(header.as_bytes()).is_err());
    }

    #[test]
    fn load_segments_classify_for_mapping_and_dynamic_is_rejected() {
        let mut load = ProgramHeader::new_zeroed();
        load.p_type = PT_LOAD;
        assert!(matches!(classify(&load), PhAction::Load));

        let mut dynamic = ProgramHeader::new_zeroed();
        dynamic.p_type = PT_DYNAMIC;
        assert!(matches!(classify(&dynamic), PhAction::Reject));

        let mut stack = ProgramHeader::new_zeroed();
        stack.p_type = PT_STACK;
        assert!(matches!(classify(&stack), PhAction::Ignore));
    }

    #[test]
    fn page_zero_is_forbidden() {
        let mut ph = ProgramHeader::new_zeroed();
        ph.p_type = PT_LOAD;
        ph.p_vaddr = 0;
        ph.p_memsz = 4096;
        assert!(validate_load_segment(&ph, 4096, 0xC000_0000).is_err());
    }
}
