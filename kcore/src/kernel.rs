//! The kernel object (spec.md §2's "Glue"): single owner of every
//! subsystem singleton, and home of the process-lifecycle operations
//! (`exec`/`wait`/`exit`) that need to reach across several of them at
//! once. Grounded on `kernel-rs/src/kernel.rs`'s `Kernel`/`KernelBuilder`
//! — simplified from its two-phase pinned-builder init (needed there
//! only to construct a kernel before a heap exists) to an ordinary
//! constructor, since `std` gives this crate a heap from process start.

use std::sync::Arc;

use kcore_support::gate::Gate;

use crate::device::{BlockDevice, Console};
use crate::error::KernelResult;
use crate::fs::FileSystem;
use crate::kprintln;
use crate::loader;
use crate::proc::{ChildRecord, Process, ProcessTable};
use crate::vm::frame::FrameTable;
use crate::vm::hw::{HardwarePageTable, Pid};
use crate::vm::swap::SwapTable;

/// Name given to the first process the kernel boots with (spec.md §9:
/// every other process is `exec`'d as a child of this one or of one of
/// its descendants).
pub const INIT_PROCESS_NAME: &str = "init";

/// The kernel: owns the filesystem, the VM subsystems, the swap device,
/// the hardware page table, the console, and the process table.
pub struct Kernel {
    pub fs: FileSystem,
    pub frame_table: FrameTable,
    pub swap_table: SwapTable,
    pub swap_device: Arc<dyn BlockDevice>,
    pub hw: Arc<dyn HardwarePageTable>,
    pub console: Arc<dyn Console>,
    pub processes: ProcessTable,
}

impl Kernel {
    /// Formats `fs_device` fresh, builds the frame and swap tables, and
    /// registers pid 1 at the filesystem root — mirroring
    /// `original_source/userprog/process.c`'s very first process having
    /// no parent and no executable to hold open.
    pub fn boot(
        fs_device: Arc<dyn BlockDevice>,
        swap_device: Arc<dyn BlockDevice>,
        hw: Arc<dyn HardwarePageTable>,
        console: Arc<dyn Console>,
        frame_count: usize,
    ) -> KernelResult<Arc<Self>> {
        let fs = FileSystem::format(fs_device)?;
        let swap_table = SwapTable::new(swap_device.as_ref());
        let root = fs.root_sector();
        let processes = ProcessTable::new();

        let kernel = Arc::new(Self {
            fs,
            frame_table: FrameTable::new(frame_count),
            swap_table,
            swap_device,
            hw,
            console,
            processes,
        });

        let init_pid = kernel.processes.alloc_pid();
        let init_cwd = kernel.fs.open(root);
        let init = Arc::new(Process::new(init_pid, None, INIT_PROCESS_NAME, init_cwd));
        kernel.processes.insert(init);
        Ok(kernel)
    }

    pub fn process(&self, pid: Pid) -> Arc<Process> {
        self.processes.get(pid).expect("caller pid must name a live process")
    }

    /// spec.md §4.5/§4.6 `exec`: spawns the load on its own thread
    /// (modeling `process_execute`'s "new kernel thread", §4.5 note),
    /// blocks the caller on the load-status gate, and discards the
    /// child record entirely if loading failed — matching
    /// `process_execute`'s `list_remove`+`child_process_free` on
    /// failure rather than leaving a zombie `wait` could still observe.
    pub fn exec(self: &Arc<Self>, caller: Pid, cmdline: &str) -> i32 {
        let parent = self.process(caller);
        let child_pid = self.processes.alloc_pid();
        let load_gate = Arc::new(Gate::new());
        let exited_gate = Arc::new(Gate::new());
        parent.add_child(ChildRecord {
            pid: child_pid,
            load_gate: load_gate.clone(),
            exited_gate,
        });

        let kernel = self.clone();
        let cwd = parent.cwd();
        let cmdline = cmdline.to_string();
        let thread_gate = load_gate.clone();
        std::thread::spawn(move || kernel.start_process(child_pid, caller, cwd, cmdline, thread_gate));

        if load_gate.wait() < 0 {
            parent.take_child(child_pid);
            return -1;
        }
        child_pid as i32
    }

    /// The body of the spawned "kernel thread": registers the child
    /// process, loads the executable into it, and signals the parent's
    /// load gate with the outcome.
    fn start_process(self: Arc<Self>, pid: Pid, parent: Pid, cwd: u32, cmdline: String, load_gate: Arc<Gate>) {
        // Inherits the parent's cwd by opening a second reference to the
        // same directory, not by sharing the parent's handle.
        let cwd_inode = self.fs.open(cwd);
        let process = Arc::new(Process::new(pid, Some(parent), &cmdline, cwd_inode));
        self.processes.insert(process.clone());

        match loader::load(
            &self.fs,
            &process.spt,
            &self.frame_table,
            self.hw.as_ref(),
            &self.swap_table,
            self.swap_device.as_ref(),
            cwd,
            &cmdline,
        ) {
            Ok(loaded) => {
                process.set_name(&loaded.program_name);
                process.claim_executable(loaded.file);
                load_gate.signal(0);
            }
            Err(_) => {
                self.processes.remove(pid);
                load_gate.signal(-1);
            }
        }
    }

    /// spec.md §4.6 `wait`: blocks on the child's exited gate and
    /// consumes the child record so a second `wait` on the same pid
    /// fails, matching `process_wait`'s "may be called at most once".
    pub fn wait(&self, caller: Pid, child_pid: Pid) -> i32 {
        let parent = self.process(caller);
        let Some(child) = parent.take_child(child_pid) else {
            return -1;
        };
        child.exited_gate.wait()
    }

    /// spec.md §4.6 `exit`: prints the required `"<name>: exit(<status>)"`
    /// line, releases every resource the process held, and signals its
    /// parent if one is still waiting to find out.
    pub fn exit(&self, pid: Pid, status: i32) {
        let process = self.process(pid);
        let _ = kprintln!(self.console, "{}: exit({})\n", process.name(), status);

        for file in process.fd_table.close_all() {
            self.fs.close(file.inode.clone());
        }
        if let Some(executable) = process.release_executable() {
            executable.inode.allow_write();
            self.fs.close(executable.inode.clone());
        }
        self.fs.close(process.cwd_inode());
        process.spt.destroy(&self.frame_table, self.hw.as_ref(), &self.swap_table);

        if let Some(parent) = process.parent().and_then(|parent_pid| self.processes.get(parent_pid)) {
            if let Some(gate) = parent.find_child(pid) {
                gate.signal(status);
            }
        }

        self.processes.remove(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MemBlockDevice, MemConsole};
    use crate::elf::{self, ElfHeader, ProgramHeader, PT_LOAD};
    use crate::param::SECTORS_PER_PAGE;
    use crate::vm::hw::TestPageTable;
    use zerocopy::{AsBytes, FromZeroes};

    fn boot() -> Arc<Kernel> {
        let fs_device: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(4096));
        let swap_device: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(SECTORS_PER_PAGE * 8));
        let hw: Arc<dyn HardwarePageTable> = Arc::new(TestPageTable::new());
        let console: Arc<dyn Console> = Arc::new(MemConsole::new());
        Kernel::boot(fs_device, swap_device, hw, console, 8).unwrap()
    }

    fn write_tiny_executable(kernel: &Kernel, name: &str) {
        let mut header = ElfHeader::new_zeroed();
        header.ident[0..4].copy_from_slice(&crate::param::ELF_MAGIC);
        header.ident[4..7].copy_from_slice(&crate::param::ELF_CLASS_VERSION_DATA);
        header.e_type = crate::param::ELF_TYPE_EXEC;
        header.e_machine = crate::param::ELF_MACHINE_IA32;
        header.e_version = crate::param::ELF_VERSION;
        header.e_phentsize = elf::PROGRAM_HEADER_SIZE as u16;
        header.e_phnum = 1;
        header.e_phoff = elf::ELF_HEADER_SIZE as u32;
        header.e_entry = 0x1000;

        let mut ph = ProgramHeader::new_zeroed();
        ph.p_type = PT_LOAD;
        ph.p_vaddr = 0x1000;
        ph.p_filesz = 4;
        ph.p_memsz = 4;
        ph.p_flags = elf::ProgFlags::READ.bits() | elf::ProgFlags::EXEC.bits();

        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(ph.as_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);

        let root = kernel.fs.root_sector();
        let sector = kernel.fs.create(root, name, bytes.len(), false).unwrap();
        let inode = kernel.fs.open(sector);
        inode.write_at(kernel.fs.device.as_ref(), &kernel.fs.free_map, 0, &bytes).unwrap();
        kernel.fs.close(inode);
    }

    #[test]
    fn exec_then_wait_reports_the_exit_status_the_child_sets() {
        let kernel = boot();
        write_tiny_executable(&kernel, "/child");

        let child_pid = kernel.exec(1, "/child") as Pid;
        assert!(child_pid > 1);

        kernel.exit(child_pid, 42);
        assert_eq!(kernel.wait(1, child_pid), 42);
    }

    #[test]
    fn waiting_twice_on_the_same_child_fails_the_second_time() {
        let kernel = boot();
        write_tiny_executable(&kernel, "/child");
        let child_pid = kernel.exec(1, "/child") as Pid;
        kernel.exit(child_pid, 0);

        assert_eq!(kernel.wait(1, child_pid), 0);
        assert_eq!(kernel.wait(1, child_pid), -1);
    }

    #[test]
    fn exec_of_a_missing_program_fails_and_leaves_no_child_to_wait_on() {
        let kernel = boot();
        let result = kernel.exec(1, "/missing");
        assert_eq!(result, -1);
        assert_eq!(kernel.wait(1, result as Pid), -1);
    }
}
