//! Generic support types shared by `kcore`'s subsystems: a named
//! spinlock wrapper and exec/wait gates.

pub mod gate;
pub mod lock;

pub use gate::Gate;
pub use lock::{Spinlock, SpinlockGuard};
