//! Process control blocks and the process table (spec.md §3, §4.6).
//! Grounded on `kernel-rs/src/proc/mod.rs`/`procs.rs`'s per-process
//! table and parent/child bookkeeping, with the scheduler-integrated
//! `WaitChannel` replaced by [`kcore_support::gate::Gate`] (this crate
//! models synchronization directly on OS threads, not a cooperative
//! scheduler) and the fixed-size process array replaced by a
//! `HashMap<Pid, Arc<Process>>` since pids are not drawn from a bounded
//! arena the way frames are (spec.md §9).

pub mod fdtable;

use std::collections::HashMap;
use std::sync::Arc;

use kcore_support::gate::Gate;
use kcore_support::Spinlock;

use crate::fs::inode::Inode;
use crate::fs::OpenFile;
use crate::param::MAXPROCNAME;
use crate::vm::hw::Pid;
use crate::vm::spt::SptTable;
use fdtable::FdTable;

/// What a parent keeps about one child (spec.md §4.6): enough to wait on
/// it exactly once and to discard it if `exec` never got it loaded.
pub struct ChildRecord {
    pub pid: Pid,
    pub load_gate: Arc<Gate>,
    pub exited_gate: Arc<Gate>,
}

/// One process's control block.
pub struct Process {
    pid: Pid,
    parent: Option<Pid>,
    name: Spinlock<String>,
    cwd: Spinlock<Arc<Inode>>,
    pub spt: SptTable,
    pub fd_table: FdTable,
    children: Spinlock<Vec<ChildRecord>>,
    executable: Spinlock<Option<Arc<OpenFile>>>,
}

impl Process {
    /// `cwd` is an already-open reference (spec.md §F in SPEC_FULL.md:
    /// a process's cwd holds an open reference on its inode for as long
    /// as it is cwd) — callers open it via `FileSystem::open` before
    /// constructing the process, and the process closes it on exit.
    pub fn new(pid: Pid, parent: Option<Pid>, name: &str, cwd: Arc<Inode>) -> Self {
        Self {
            pid,
            parent,
            name: Spinlock::new(truncate_name(name)),
            cwd: Spinlock::new(cwd),
            spt: SptTable::new(pid),
            fd_table: FdTable::new(),
            children: Spinlock::new(Vec::new()),
            executable: Spinlock::new(None),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = truncate_name(name);
    }

    pub fn cwd(&self) -> u32 {
        self.cwd.lock().sector
    }

    pub fn cwd_inode(&self) -> Arc<Inode> {
        self.cwd.lock().clone()
    }

    /// Swaps in a newly opened cwd, returning the one it replaces so the
    /// caller can close it (`sys_chdir`; spec.md §F).
    pub fn set_cwd(&self, cwd: Arc<Inode>) -> Arc<Inode> {
        std::mem::replace(&mut *self.cwd.lock(), cwd)
    }

    pub fn add_child(&self, record: ChildRecord) {
        self.children.lock().push(record);
    }

    /// Removes and returns the record for `pid`, used by `wait` (a
    /// child is waited on at most once, per spec.md §4.6) and by a
    /// failed `exec` discarding a child that never finished loading.
    pub fn take_child(&self, pid: Pid) -> Option<ChildRecord> {
        let mut children = self.children.lock();
        let index = children.iter().position(|child| child.pid == pid)?;
        Some(children.remove(index))
    }

    /// Finds the gate for `pid` without removing it, used by `exit` to
    /// signal a parent that may or may not ever call `wait`.
    pub fn find_child(&self, pid: Pid) -> Option<Arc<Gate>> {
        self.children.lock().iter().find(|child| child.pid == pid).map(|child| child.exited_gate.clone())
    }

    /// spec.md §4.5: the deny-write lock on the running executable is
    /// held for the process's lifetime. `None` if a prior executable is
    /// already claimed (callers must `release_executable` first).
    pub fn claim_executable(&self, file: Arc<OpenFile>) {
        *self.executable.lock() = Some(file);
    }

    pub fn release_executable(&self) -> Option<Arc<OpenFile>> {
        self.executable.lock().take()
    }
}

fn truncate_name(name: &str) -> String {
    name.chars().take(MAXPROCNAME).collect()
}

/// The kernel's single table of live processes (spec.md §3: "exactly one
/// `Process` per pid currently known to the kernel").
#[derive(Default)]
pub struct ProcessTable {
    next_pid: Spinlock<Pid>,
    processes: Spinlock<HashMap<Pid, Arc<Process>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            next_pid: Spinlock::new(1),
            processes: Spinlock::new(HashMap::new()),
        }
    }

    pub fn alloc_pid(&self) -> Pid {
        let mut next = self.next_pid.lock();
        let pid = *next;
        *next += 1;
        pid
    }

    pub fn insert(&self, process: Arc<Process>) {
        self.processes.lock().insert(process.pid(), process);
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().get(&pid).cloned()
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().remove(&pid)
    }
}
