//! Executable loading (spec.md §4.5): turns a path plus a command line
//! into a demand-paged address space and an initial stack, without
//! actually transferring control to it (running the loaded program is a
//! scheduler/CPU concern, out of scope per spec.md §1).
//!
//! Grounded on `original_source/userprog/process.c`'s `load`/
//! `load_segment`/`setup_stack`/`push_to_stack` and on
//! `kernel-rs/src/exec.rs`'s `izip!`-based argv/stack-pointer
//! construction, generalized from xv6's eager `uvmalloc`-style copy into
//! this crate's demand paging: segment contents are described as
//! `alloc_file_spte` mappings rather than copied in up front, and only
//! the initial stack page is ever eagerly bound.

use std::sync::Arc;

use itertools::izip;
#[cfg(test)]
use zerocopy::FromZeroes;
use zerocopy::FromBytes;

use crate::device::BlockDevice;
use crate::elf::{self, PhAction, ProgramHeader, PROGRAM_HEADER_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::fs::{FileSystem, OpenFile};
use crate::param::{MAXARG, PAGE_SIZE, PHYS_BASE};
use crate::vm::addr::UserVirtAddr;
use crate::vm::frame::FrameTable;
use crate::vm::hw::HardwarePageTable;
use crate::vm::spt::{PageBackingFile, SptTable};
use crate::vm::swap::SwapTable;

/// The address-space entry point and starting stack pointer `exec`
/// hands back to the (out-of-scope) scheduler, plus the executable file
/// the process must hold a deny-write lock on for its lifetime.
pub struct LoadedExecutable {
    pub entry: UserVirtAddr,
    pub initial_sp: UserVirtAddr,
    pub file: Arc<OpenFile>,
    pub program_name: String,
}

impl std::fmt::Debug for LoadedExecutable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedExecutable")
            .field("entry", &self.entry)
            .field("initial_sp", &self.initial_sp)
            .field("program_name", &self.program_name)
            .finish()
    }
}

/// spec.md §4.5: splits `cmdline` on whitespace, resolves the first word
/// as a path, validates and maps its `LOAD` segments, then builds the
/// initial stack out of the full argument list. On any failure the
/// executable's deny-write lock is released and the file closed before
/// returning the error.
pub fn load(
    fs: &FileSystem,
    spt: &SptTable,
    frame_table: &FrameTable,
    hw: &dyn HardwarePageTable,
    swap: &SwapTable,
    swap_device: &dyn BlockDevice,
    cwd: u32,
    cmdline: &str,
) -> KernelResult<LoadedExecutable> {
    let argv: Vec<&str> = cmdline.split_whitespace().collect();
    let program_path = *argv.first().ok_or(KernelError::InvalidArg)?;
    if argv.len() > MAXARG {
        return Err(KernelError::InvalidArg);
    }

    let sector = fs.resolve(cwd, program_path)?;
    let inode = fs.open(sector);
    inode.deny_write();
    let file = Arc::new(OpenFile::new(fs, inode));

    let result = load_segments(&file, spt).and_then(|entry| {
        let sp = setup_stack(program_path, &argv, spt, frame_table, hw, swap, swap_device)?;
        Ok((entry, sp))
    });

    match result {
        Ok((entry, initial_sp)) => Ok(LoadedExecutable {
            entry,
            initial_sp,
            file,
            program_name: truncate_program_name(program_path),
        }),
        Err(err) => {
            file.inode.allow_write();
            fs.close(file.inode.clone());
            Err(err)
        }
    }
}

fn truncate_program_name(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.chars().take(crate::param::MAXPROCNAME).collect()
}

/// Validates the ELF header and every program header, mapping each
/// `LOAD` segment's pages as lazily file-backed SPTEs (spec.md §4.5
/// steps 1-4). Returns the entry point on success.
fn load_segments(file: &Arc<OpenFile>, spt: &SptTable) -> KernelResult<UserVirtAddr> {
    let mut header_bytes = vec![0u8; elf::ELF_HEADER_SIZE];
    file.read_at(0, &mut header_bytes);
    let header = elf::validate_header(&header_bytes)?;

    for i in 0..header.e_phnum as usize {
        let ph_offset = header.e_phoff as usize + i * PROGRAM_HEADER_SIZE;
        let mut ph_bytes = vec![0u8; PROGRAM_HEADER_SIZE];
        file.read_at(ph_offset, &mut ph_bytes);
        let ph = ProgramHeader::read_from_prefix(&ph_bytes).ok_or(KernelError::InvalidArg)?;

        match elf::classify(&ph) {
            PhAction::Ignore => continue,
            PhAction::Reject => return Err(KernelError::InvalidArg),
            PhAction::Load => map_load_segment(file, spt, &ph)?,
        }
    }

    Ok(UserVirtAddr::new(header.e_entry as usize))
}

/// spec.md §4.5 step 4's per-page accounting, lifted directly from
/// `process.c`'s `load_segment`: `file_page`/`mem_page` walk in lockstep
/// while `read_bytes`/`zero_bytes` are consumed one page at a time.
fn map_load_segment(file: &Arc<OpenFile>, spt: &SptTable, ph: &ProgramHeader) -> KernelResult<()> {
    elf::validate_load_segment(ph, PAGE_SIZE, PHYS_BASE)?;

    let writable = ph.p_flags & elf::ProgFlags::WRITE.bits() != 0;
    let page_offset = ph.p_vaddr as usize % PAGE_SIZE;
    let mut file_page = ph.p_offset as usize - page_offset;
    let mut mem_page = ph.p_vaddr as usize - page_offset;

    let (mut read_bytes, mut zero_bytes) = if ph.p_filesz > 0 {
        let read_bytes = page_offset + ph.p_filesz as usize;
        let zero_bytes = round_up(page_offset + ph.p_memsz as usize, PAGE_SIZE) - read_bytes;
        (read_bytes, zero_bytes)
    } else {
        (0, round_up(page_offset + ph.p_memsz as usize, PAGE_SIZE))
    };

    let backing: Arc<dyn PageBackingFile> = file.clone();
    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PAGE_SIZE);
        let page_zero = PAGE_SIZE - page_read;
        spt.alloc_file_spte(
            UserVirtAddr::new(mem_page),
            backing.clone(),
            file_page as u64,
            page_read,
            page_zero,
            writable,
        );
        read_bytes -= page_read;
        zero_bytes -= page_zero;
        file_page += PAGE_SIZE;
        mem_page += PAGE_SIZE;
    }
    Ok(())
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// spec.md §4.5 step 5: eagerly binds the top user page as the stack,
/// then writes argv strings, their pointer array, `argc`, and a fake
/// return address onto it, mirroring `push_to_stack`'s exact push order.
fn setup_stack(
    program_name: &str,
    argv: &[&str],
    spt: &SptTable,
    frame_table: &FrameTable,
    hw: &dyn HardwarePageTable,
    swap: &SwapTable,
    swap_device: &dyn BlockDevice,
) -> KernelResult<UserVirtAddr> {
    let stack_page = UserVirtAddr::new(PHYS_BASE - PAGE_SIZE);
    let stack_spte = spt.alloc_stack_spte(stack_page, frame_table, hw, swap, swap_device);
    let index = frame_table
        .index_of(spt.owner(), &stack_spte)
        .expect("stack SPTE was just bound by alloc_stack_spte");
    let mut frame = frame_table.frame_data(index).lock();

    let base = stack_page.as_usize();
    let mut sp = PAGE_SIZE;

    // spec.md §4.5 step 5: overflow of the initial stack page is an error,
    // not a panic — a long argument list must not underflow `sp` or run
    // the slice write past the page.
    let mut push_bytes = |sp: &mut usize, bytes: &[u8]| -> KernelResult<()> {
        if bytes.len() > *sp {
            return Err(KernelError::NoSpace);
        }
        *sp -= bytes.len();
        frame[*sp..*sp + bytes.len()].copy_from_slice(bytes);
        Ok(())
    };

    let _ = program_name;
    let mut pointers = vec![0u32; argv.len()];
    for (arg, slot) in izip!(argv, &mut pointers) {
        push_bytes(&mut sp, &[0u8])?;
        push_bytes(&mut sp, arg.as_bytes())?;
        *slot = (base + sp) as u32;
    }

    while sp % 4 != 0 {
        push_bytes(&mut sp, &[0u8])?;
    }

    push_bytes(&mut sp, &0u32.to_ne_bytes())?;
    for &pointer in pointers.iter().rev() {
        push_bytes(&mut sp, &pointer.to_ne_bytes())?;
    }

    let argv_base = (base + sp) as u32;
    push_bytes(&mut sp, &argv_base.to_ne_bytes())?;
    push_bytes(&mut sp, &(argv.len() as u32).to_ne_bytes())?;
    push_bytes(&mut sp, &0u32.to_ne_bytes())?;

    Ok(UserVirtAddr::new(base + sp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::param::SECTORS_PER_PAGE;
    use crate::vm::hw::TestPageTable;
    use zerocopy::AsBytes;

    fn rig() -> (FileSystem, FrameTable, TestPageTable, SwapTable, MemBlockDevice) {
        let fs = FileSystem::format(Arc::new(MemBlockDevice::new(4096))).unwrap();
        let swap_dev = MemBlockDevice::new(SECTORS_PER_PAGE * 8);
        let swap = SwapTable::new(&swap_dev);
        (fs, FrameTable::new(8), TestPageTable::new(), swap, swap_dev)
    }

    fn write_tiny_executable(fs: &FileSystem, root: u32, name: &str, entry: u32) -> u32 {
        use crate::elf::{ElfHeader, ProgramHeader, PT_LOAD};

        let mut header = ElfHeader::new_zeroed();
        header.ident[0..4].copy_from_slice(&crate::param::ELF_MAGIC);
        header.ident[4..7].copy_from_slice(&crate::param::ELF_CLASS_VERSION_DATA);
        header.e_type = crate::param::ELF_TYPE_EXEC;
        header.e_machine = crate::param::ELF_MACHINE_IA32;
        header.e_version = crate::param::ELF_VERSION;
        header.e_phentsize = elf::PROGRAM_HEADER_SIZE as u16;
        header.e_phnum = 1;
        header.e_phoff = elf::ELF_HEADER_SIZE as u32;
        header.e_entry = entry;

        let mut ph = ProgramHeader::new_zeroed();
        ph.p_type = PT_LOAD;
        ph.p_offset = 0;
        ph.p_vaddr = 0x1000;
        ph.p_filesz = 4;
        ph.p_memsz = 4;
        ph.p_flags = elf::ProgFlags::READ.bits() | elf::ProgFlags::EXEC.bits();

        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(ph.as_bytes());
        bytes.extend_from_slice(&[0xCA, 0xFE, 0xBA, 0xBE]);

        let sector = fs.create(root, name, bytes.len(), false).unwrap();
        let inode = fs.open(sector);
        inode.write_at(fs.device.as_ref(), &fs.free_map, 0, &bytes).unwrap();
        fs.close(inode);
        sector
    }

    #[test]
    fn loading_a_tiny_executable_maps_its_load_segment_and_sets_up_a_stack() {
        let (fs, frames, hw, swap, swap_dev) = rig();
        let root = fs.root_sector();
        write_tiny_executable(&fs, root, "/prog", 0x1000);

        let spt = SptTable::new(1);
        let loaded = load(&fs, &spt, &frames, &hw, &swap, &swap_dev, root, "prog arg1 arg2").unwrap();

        assert_eq!(loaded.entry, UserVirtAddr::new(0x1000));
        assert!(loaded.initial_sp.as_usize() < PHYS_BASE);
        assert!(!loaded.file.inode.is_dir());
        assert_eq!(loaded.program_name, "prog");

        let spte = spt.lookup(UserVirtAddr::new(0x1000)).unwrap();
        assert!(spte.is_file_backed());
    }

    #[test]
    fn a_nonexistent_program_path_fails_without_leaking_the_deny_write_lock() {
        let (fs, frames, hw, swap, swap_dev) = rig();
        let root = fs.root_sector();
        let spt = SptTable::new(1);
        assert!(load(&fs, &spt, &frames, &hw, &swap, &swap_dev, root, "missing").is_err());
    }

    #[test]
    fn an_empty_command_line_is_rejected() {
        let (fs, frames, hw, swap, swap_dev) = rig();
        let root = fs.root_sector();
        let spt = SptTable::new(1);
        assert!(load(&fs, &spt, &frames, &hw, &swap, &swap_dev, root, "   ").is_err());
    }

    #[test]
    fn an_argument_too_long_for_the_stack_page_is_an_error_not_a_panic() {
        let (fs, frames, hw, swap, swap_dev) = rig();
        let root = fs.root_sector();
        write_tiny_executable(&fs, root, "/prog", 0x1000);

        let spt = SptTable::new(1);
        let huge_arg = "a".repeat(PAGE_SIZE);
        let cmdline = format!("prog {huge_arg}");
        assert_eq!(
            load(&fs, &spt, &frames, &hw, &swap, &swap_dev, root, &cmdline).unwrap_err(),
            KernelError::NoSpace
        );
    }
}
